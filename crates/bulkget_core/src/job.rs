use crate::Locator;

pub type JobIndex = usize;

/// One unit of work: a locator tagged with its position in the input list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub index: JobIndex,
    pub locator: Locator,
}

impl Job {
    pub fn new(index: JobIndex, locator: Locator) -> Self {
        Self { index, locator }
    }
}

/// Turn an ordered locator list into jobs `0..n` in input order.
pub fn jobs_from(locators: Vec<Locator>) -> impl Iterator<Item = Job> {
    locators
        .into_iter()
        .enumerate()
        .map(|(index, locator)| Job::new(index, locator))
}

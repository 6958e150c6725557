//! Bulkget core: pure job, locator and digest types shared by the engine and the CLI.
mod digest;
mod job;
mod locator;
mod strategy;
mod summary;

pub use digest::{digest_payloads, PayloadDigest};
pub use job::{jobs_from, Job, JobIndex};
pub use locator::{parse_locator, parse_locator_list, Locator, LocatorError};
pub use strategy::{ParseStrategyError, Strategy};
pub use summary::{RunStatus, RunSummary};

use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::FetchError;

/// A set of tasks that fail together.
///
/// The first task to return an error records it and cancels the group token,
/// so every sibling racing that token unwinds. [`TaskGroup::wait`] joins all
/// tasks and returns the recorded error.
pub struct TaskGroup {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    first_error: Arc<OnceLock<FetchError>>,
}

impl TaskGroup {
    /// A group whose token is a child of `parent`: cancelling the parent
    /// cancels the group, a failure inside the group does not reach the parent.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            first_error: Arc::new(OnceLock::new()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), FetchError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let first_error = Arc::clone(&self.first_error);
        self.tasks.spawn(async move {
            if let Err(err) = task.await {
                record_failure(&first_error, &cancel, err);
            }
        });
    }

    pub async fn wait(mut self) -> Result<(), FetchError> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(join_err) = joined {
                record_failure(
                    &self.first_error,
                    &self.cancel,
                    FetchError::Task(join_err.to_string()),
                );
            }
        }
        match self.first_error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn record_failure(first_error: &OnceLock<FetchError>, cancel: &CancellationToken, err: FetchError) {
    let _ = first_error.set(err);
    cancel.cancel();
}

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::{PayloadDigest, Strategy};

/// How a run ended, as surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded { digest: String },
    Failed { error: String },
}

/// Operator-facing summary of one bulk retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub elapsed_ms: u64,
    pub job_count: usize,
    pub strategy: Strategy,
    pub workers: usize,
    #[serde(flatten)]
    pub status: RunStatus,
}

/// Milliseconds in `elapsed`, saturating at `u64::MAX`.
fn whole_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl RunSummary {
    pub fn succeeded(
        elapsed: Duration,
        job_count: usize,
        strategy: Strategy,
        workers: usize,
        digest: PayloadDigest,
    ) -> Self {
        Self {
            elapsed_ms: whole_millis(elapsed),
            job_count,
            strategy,
            workers,
            status: RunStatus::Succeeded {
                digest: digest.to_hex(),
            },
        }
    }

    pub fn failed(
        elapsed: Duration,
        job_count: usize,
        strategy: Strategy,
        workers: usize,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            elapsed_ms: whole_millis(elapsed),
            job_count,
            strategy,
            workers,
            status: RunStatus::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded { .. })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            RunStatus::Succeeded { digest } => write!(
                f,
                "downloaded elapsed={}ms n={} method={} threads={} csum={}",
                self.elapsed_ms, self.job_count, self.strategy, self.workers, digest
            ),
            RunStatus::Failed { error } => write!(
                f,
                "failed elapsed={}ms n={} method={} threads={} error={}",
                self.elapsed_ms, self.job_count, self.strategy, self.workers, error
            ),
        }
    }
}

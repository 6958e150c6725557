use bulkget_logging::{bulk_debug, bulk_warn};
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{FetchError, JobResult};

/// Index-ordered payloads plus the first job error seen.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub slots: Vec<Option<Bytes>>,
    pub first_error: Option<FetchError>,
    pub completed: usize,
}

/// Drain `results` until every sender is gone, placing each payload at its job index.
///
/// Keeps draining after the first error so that no worker ever blocks on an
/// abandoned queue, and so every payload that did arrive is kept.
pub async fn aggregate(mut results: mpsc::UnboundedReceiver<JobResult>, job_count: usize) -> Aggregation {
    let mut aggregation = Aggregation {
        slots: vec![None; job_count],
        first_error: None,
        completed: 0,
    };

    while let Some(JobResult { job, outcome }) = results.recv().await {
        match outcome {
            Ok(payload) => match aggregation.slots.get_mut(job.index) {
                Some(slot) if slot.is_none() => {
                    *slot = Some(payload);
                    aggregation.completed += 1;
                }
                Some(_) => {
                    bulk_warn!("aggregate: duplicate result for job {} ignored", job.index);
                }
                None => {
                    bulk_warn!(
                        "aggregate: result for job {} outside 0..{} ignored",
                        job.index,
                        job_count
                    );
                }
            },
            Err(err) => {
                bulk_debug!("aggregate: job {} ({}) failed: {}", job.index, job.locator, err);
                if aggregation.first_error.is_none() {
                    aggregation.first_error = Some(err);
                }
            }
        }
    }

    aggregation
}

use std::sync::Arc;

use bulkget_core::{digest_payloads, jobs_from, Job, Locator, PayloadDigest, Strategy};
use bulkget_logging::{bulk_debug, bulk_info, bulk_warn};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::aggregate::aggregate;
use crate::group::TaskGroup;
use crate::store::ObjectStore;
use crate::transport::{Connector, Endpoint, TcpConnector};
use crate::worker::{JobQueue, NaiveWorker, PipelinedWorker, Worker};
use crate::{EngineConfig, FetchError};

/// Ordered payloads of a run and the error that failed it, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub slots: Vec<Option<Bytes>>,
    pub error: Option<FetchError>,
    labels: Vec<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// All payloads in input order, or the error that failed the run.
    pub fn into_payloads(self) -> Result<Vec<Bytes>, FetchError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let labels = self.labels;
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| FetchError::Integrity {
                    index,
                    locator: labels.get(index).cloned().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Digest of the complete payload set; `None` unless the run succeeded.
    pub fn digest(&self) -> Option<PayloadDigest> {
        if self.error.is_some() || self.slots.iter().any(Option::is_none) {
            return None;
        }
        Some(digest_payloads(self.slots.iter().flatten()))
    }
}

/// Runs bulk retrievals against one object store with one strategy.
pub struct BulkFetcher {
    store: Arc<dyn ObjectStore>,
    connector: Arc<dyn Connector>,
    config: EngineConfig,
}

impl BulkFetcher {
    /// Validates `config` and derives the pipelined dial target from the
    /// store endpoint.
    pub fn new(store: Arc<dyn ObjectStore>, config: EngineConfig) -> Result<Self, FetchError> {
        config.validate()?;
        let endpoint = Endpoint::from_url(store.endpoint())?;
        let connector = Arc::new(TcpConnector::new(endpoint, config.connect_timeout)?);
        Ok(Self {
            store,
            connector,
            config,
        })
    }

    /// Like [`BulkFetcher::new`], dialing through `connector` instead.
    pub fn with_connector(
        store: Arc<dyn ObjectStore>,
        connector: Arc<dyn Connector>,
        config: EngineConfig,
    ) -> Result<Self, FetchError> {
        config.validate()?;
        Ok(Self {
            store,
            connector,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn fetch_all(&self, locators: Vec<Locator>) -> RunOutcome {
        self.fetch_all_until(locators, &CancellationToken::new()).await
    }

    /// Like [`BulkFetcher::fetch_all`]; cancelling `cancel` unwinds the run.
    pub async fn fetch_all_until(
        &self,
        locators: Vec<Locator>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        bulk_info!(
            "starting {} run: {} jobs, {} workers",
            self.config.strategy,
            locators.len(),
            self.config.workers
        );
        run_workers(locators, self.workers(), cancel).await
    }

    fn workers(&self) -> Vec<Box<dyn Worker>> {
        (0..self.config.workers)
            .map(|_| match self.config.strategy {
                Strategy::Concurrent => {
                    Box::new(NaiveWorker::new(Arc::clone(&self.store))) as Box<dyn Worker>
                }
                Strategy::Pipelined => Box::new(PipelinedWorker::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.connector),
                    self.config.pipeline_settings(),
                )),
            })
            .collect()
    }
}

/// Fan `locators` out to `workers` and fan their results back in, in input order.
///
/// The job source, every worker and a completion task share one task group:
/// the first worker error cancels the rest. The returned error is that fatal
/// error if there was one, else the first job error, else an integrity error
/// naming the first slot nobody filled.
pub async fn run_workers(
    locators: Vec<Locator>,
    workers: Vec<Box<dyn Worker>>,
    cancel: &CancellationToken,
) -> RunOutcome {
    let job_count = locators.len();
    let labels: Vec<String> = locators.iter().map(ToString::to_string).collect();

    let (job_tx, job_rx) = mpsc::channel::<Job>(1);
    let (result_tx, result_rx) = mpsc::unbounded_channel();
    let aggregator = tokio::spawn(aggregate(result_rx, job_count));

    let mut group = TaskGroup::new(cancel);
    let token = group.token().clone();

    let source_cancel = token.clone();
    group.spawn(async move {
        for job in jobs_from(locators) {
            tokio::select! {
                biased;
                _ = source_cancel.cancelled() => return Err(FetchError::Cancelled),
                sent = job_tx.send(job) => {
                    if sent.is_err() {
                        // Every worker is gone; they have reported why.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    });

    let jobs = JobQueue::new(job_rx);
    let tracker = TaskTracker::new();
    for worker in workers {
        let jobs = jobs.clone();
        let results = result_tx.clone();
        let cancel = token.clone();
        group.spawn(tracker.track_future(worker.run(jobs, results, cancel)));
    }
    drop(jobs);
    tracker.close();

    // Closes the result queue once the last worker is done, so the
    // aggregator can finish.
    group.spawn(async move {
        tracker.wait().await;
        drop(result_tx);
        Ok(())
    });

    let fatal = group.wait().await.err();
    let aggregation = match aggregator.await {
        Ok(aggregation) => aggregation,
        Err(join_err) => {
            return RunOutcome {
                slots: vec![None; job_count],
                error: Some(FetchError::Task(join_err.to_string())),
                labels,
            }
        }
    };

    bulk_debug!(
        "aggregation done: {}/{} payloads",
        aggregation.completed,
        job_count
    );

    let error = fatal.or(aggregation.first_error).or_else(|| {
        aggregation
            .slots
            .iter()
            .position(Option::is_none)
            .map(|index| FetchError::Integrity {
                index,
                locator: labels[index].clone(),
            })
    });
    if let Some(err) = &error {
        bulk_warn!("run failed: {}", err);
    }

    RunOutcome {
        slots: aggregation.slots,
        error,
        labels,
    }
}

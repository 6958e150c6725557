use std::sync::Arc;

use bulkget_core::Job;
use bulkget_logging::{bulk_debug, bulk_trace};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineSettings;
use crate::pipeline::{PipelinedConnection, ResponseOutcome};
use crate::store::ObjectStore;
use crate::transport::Connector;
use crate::{FetchError, JobResult};

/// Where workers emit one [`JobResult`] per job they took.
pub type ResultSink = mpsc::UnboundedSender<JobResult>;

/// The shared job stream. Every worker holds a clone; each job is handed to
/// exactly one of them.
#[derive(Clone)]
pub struct JobQueue {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobQueue {
    pub fn new(rx: mpsc::Receiver<Job>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Next job, `Ok(None)` once the source is exhausted, or
    /// [`FetchError::Cancelled`] if `cancel` fires first.
    pub async fn next(&self, cancel: &CancellationToken) -> Result<Option<Job>, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            job = async { self.rx.lock().await.recv().await } => Ok(job),
        }
    }
}

/// A member of the worker set. Returning an error is fatal to the whole run;
/// per-job failures go to the sink instead.
#[async_trait::async_trait]
pub trait Worker: Send {
    async fn run(
        self: Box<Self>,
        jobs: JobQueue,
        results: ResultSink,
        cancel: CancellationToken,
    ) -> Result<(), FetchError>;
}

/// One store round trip per job.
pub struct NaiveWorker {
    store: Arc<dyn ObjectStore>,
}

impl NaiveWorker {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Worker for NaiveWorker {
    async fn run(
        self: Box<Self>,
        jobs: JobQueue,
        results: ResultSink,
        cancel: CancellationToken,
    ) -> Result<(), FetchError> {
        while let Some(job) = jobs.next(&cancel).await? {
            bulk_trace!("naive worker: fetching job {} ({})", job.index, job.locator);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.store.get_object(&job.locator) => outcome,
            };
            let _ = results.send(JobResult::new(job, outcome));
        }
        Ok(())
    }
}

/// Feeds every job it takes through one pipelined connection of its own.
pub struct PipelinedWorker {
    store: Arc<dyn ObjectStore>,
    connector: Arc<dyn Connector>,
    settings: PipelineSettings,
}

impl PipelinedWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        connector: Arc<dyn Connector>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            connector,
            settings,
        }
    }

    async fn feed(
        &self,
        conn: &mut PipelinedConnection,
        jobs: &JobQueue,
        results: &ResultSink,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        while let Some(job) = jobs.next(cancel).await? {
            let request = match self.store.build_request(&job.locator) {
                Ok(request) => request,
                Err(err) => {
                    let _ = results.send(JobResult::new(job, Err(err.clone())));
                    return Err(err);
                }
            };

            let store = Arc::clone(&self.store);
            let results = results.clone();
            let handler = move |outcome: ResponseOutcome| {
                let outcome =
                    outcome.and_then(|response| store.unmarshal_response(&job.locator, response));
                let _ = results.send(JobResult::new(job, outcome));
            };

            if conn.queue_request(request, handler).await.is_err() {
                // The connection is going down; close() reports why.
                break;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Worker for PipelinedWorker {
    async fn run(
        self: Box<Self>,
        jobs: JobQueue,
        results: ResultSink,
        cancel: CancellationToken,
    ) -> Result<(), FetchError> {
        let transport = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            transport = self.connector.connect() => transport?,
        };
        bulk_debug!("pipelined worker: connected, depth {}", self.settings.depth);

        let mut conn = PipelinedConnection::new(transport, self.settings, &cancel);
        let fed = self.feed(&mut conn, &jobs, &results, &cancel).await;
        let closed = conn.close().await;
        closed.and(fed)
    }
}

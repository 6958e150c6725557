//! Bulkget engine: job fan-out, pipelined HTTP/1.1 connections and ordered result fan-in.
mod aggregate;
mod config;
mod engine;
mod group;
mod http1;
mod pipeline;
mod store;
mod transport;
mod types;
mod worker;

pub use aggregate::{aggregate, Aggregation};
pub use config::{EngineConfig, PipelineSettings, DEFAULT_PIPELINE_DEPTH};
pub use engine::{run_workers, BulkFetcher, RunOutcome};
pub use group::TaskGroup;
pub use http1::{encode_request, read_response, RawResponse, StoreRequest};
pub use pipeline::{CompletionHandler, PipelinedConnection, ResponseOutcome};
pub use store::{
    HttpStore, ObjectStore, RequestSigner, StaticAuthorization, StoreSettings, Unsigned,
};
pub use transport::{BoxTransport, Connector, Endpoint, TcpConnector, Transport};
pub use types::{FetchError, JobResult, StoreError};
pub use worker::{JobQueue, NaiveWorker, PipelinedWorker, ResultSink, Worker};

use std::path::PathBuf;
use std::sync::Arc;

use bulkget_core::Strategy;
use bulkget_engine::{
    EngineConfig, FetchError, RequestSigner, StaticAuthorization, StoreError, StoreSettings,
    Unsigned, DEFAULT_PIPELINE_DEPTH,
};
use bulkget_logging::LogDestination;
use clap::{ArgAction, Parser};
use log::LevelFilter;
use url::Url;

/// Fetch a list of objects and print a digest over their contents.
#[derive(Debug, Clone, Parser)]
#[command(name = "bulkget", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
pub struct Cli {
    /// Retrieval strategy: `concurrent` (one request per object) or `pipelined`.
    #[arg(long = "mode", default_value_t = Strategy::Concurrent)]
    pub strategy: Strategy,

    /// Number of workers; for `pipelined`, the number of connections.
    #[arg(long, default_value_t = 32)]
    pub threads: usize,

    /// File with one `s3://bucket/key` locator per line.
    #[arg(long, default_value = "/dev/stdin")]
    pub files: PathBuf,

    /// Region of the public S3 endpoint, unless `--endpoint` is given.
    #[arg(long, default_value = "us-west-2")]
    pub region: String,

    /// Path-style object store endpoint, e.g. `http://127.0.0.1:9000`.
    #[arg(long)]
    pub endpoint: Option<Url>,

    /// Requests kept in flight per pipelined connection.
    #[arg(long, default_value_t = DEFAULT_PIPELINE_DEPTH)]
    pub depth: usize,

    /// Value sent verbatim as the `Authorization` header of every request.
    #[arg(long, env = "BULKGET_AUTHORIZATION", hide_env_values = true)]
    pub authorization: Option<String>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Also write logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Keep logs off the terminal; they still go to `--log-file` if given.
    #[arg(short, long)]
    pub quiet: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            strategy: self.strategy,
            workers: self.threads,
            pipeline_depth: self.depth,
            ..EngineConfig::default()
        }
    }

    pub fn store_settings(&self) -> Result<StoreSettings, FetchError> {
        let mut settings = match &self.endpoint {
            Some(endpoint) => StoreSettings::new(endpoint.clone()),
            None => StoreSettings::for_region(&self.region)?,
        };
        settings.connect_timeout = self.engine_config().connect_timeout;
        Ok(settings)
    }

    pub fn signer(&self) -> Result<Arc<dyn RequestSigner>, StoreError> {
        Ok(match &self.authorization {
            Some(value) => Arc::new(StaticAuthorization::new(value)?),
            None => Arc::new(Unsigned),
        })
    }

    pub fn log_destination(&self) -> LogDestination {
        match (&self.log_file, self.quiet) {
            (Some(path), true) => LogDestination::File(path.clone()),
            (Some(path), false) => LogDestination::Both(path.clone()),
            (None, _) => LogDestination::Terminal,
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.quiet && self.log_file.is_none() {
            return LevelFilter::Off;
        }
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

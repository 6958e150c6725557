use std::time::Duration;

use bulkget_core::Strategy;

use crate::FetchError;

/// Outstanding requests per pipelined connection unless configured otherwise.
pub const DEFAULT_PIPELINE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: Strategy,
    pub workers: usize,
    pub pipeline_depth: usize,
    pub connect_timeout: Duration,
    /// Upper bound on a single response body read off a pipelined connection.
    pub max_response_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            workers: 32,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            connect_timeout: Duration::from_secs(10),
            max_response_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.workers == 0 {
            return Err(FetchError::Config("worker count must be at least 1".into()));
        }
        if self.pipeline_depth == 0 {
            return Err(FetchError::Config(
                "pipeline depth must be at least 1".into(),
            ));
        }
        if self.max_response_bytes == 0 {
            return Err(FetchError::Config(
                "max response size must be at least 1 byte".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            depth: self.pipeline_depth,
            max_body_bytes: self.max_response_bytes,
        }
    }
}

/// Per-connection knobs for [`crate::PipelinedConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub depth: usize,
    pub max_body_bytes: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            depth: DEFAULT_PIPELINE_DEPTH,
            max_body_bytes: 1024 * 1024 * 1024,
        }
    }
}

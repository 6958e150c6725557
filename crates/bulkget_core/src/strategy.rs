use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// How a run retrieves its objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One request/response exchange per job through the store client.
    #[default]
    Concurrent,
    /// Many outstanding requests per worker over one persistent connection.
    Pipelined,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid getter: {0}")]
pub struct ParseStrategyError(pub String);

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Concurrent => "concurrent",
            Strategy::Pipelined => "pipelined",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" | "naive" => Ok(Strategy::Concurrent),
            "pipelined" | "pipeline" => Ok(Strategy::Pipelined),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

//! Error types for cone-slam

use thiserror::Error;

/// cone-slam error type
#[derive(Error, Debug)]
pub enum SlamError {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed line in a map or path file
    #[error("Parse error at line {line}: {reason}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Pose graph construction violated a structural rule
    #[error("Graph error: {0}")]
    Graph(String),

    /// Undecodable wire message
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<toml::de::Error> for SlamError {
    fn from(e: toml::de::Error) -> Self {
        SlamError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for SlamError {
    fn from(e: serde_json::Error) -> Self {
        SlamError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SlamError>;

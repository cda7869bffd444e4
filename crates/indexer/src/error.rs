use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoverageError>;

#[derive(Error, Debug)]
pub enum CoverageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Empty workspace: no monitored roots")]
    EmptyWorkspace,

    #[error("Failed to load coverage for {}: {message}", root.display())]
    Load { root: PathBuf, message: String },

    #[error("Coverage command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] covtree_protocol::ProtocolError),

    #[error("{0}")]
    Other(String),
}

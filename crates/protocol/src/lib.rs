use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

mod config;
mod coverage;
pub mod path_filters;

pub use config::{RootConfig, RootConfigOverride, DEFAULT_DEBOUNCE_MS};
pub use coverage::{
    CoverageLevel, CoverageLevelThresholds, CoverageRecord, CoverageRecordSet, FunctionDetail,
};
pub use path_filters::CoverageFileFilter;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid coverage thresholds: sufficient={sufficient}, low={low} (expected 0 <= low <= sufficient <= 100)")]
    InvalidThresholds { sufficient: f64, low: f64 },

    #[error("invalid coverage file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Why the coverage tree is being recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    Manual,
    ConfigUpdated,
    CoverageCreated,
    CoverageUpdated,
    CoverageDeleted,
}

impl RefreshReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "<RefreshCommand>",
            Self::ConfigUpdated => "<ConfigUpdated>",
            Self::CoverageCreated => "<CoverageCreated>",
            Self::CoverageUpdated => "<CoverageUpdated>",
            Self::CoverageDeleted => "<CoverageDeleted>",
        }
    }
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event of a watched coverage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageFileEvent {
    Created,
    Updated,
    Deleted,
}

impl From<CoverageFileEvent> for RefreshReason {
    fn from(event: CoverageFileEvent) -> Self {
        match event {
            CoverageFileEvent::Created => Self::CoverageCreated,
            CoverageFileEvent::Updated => Self::CoverageUpdated,
            CoverageFileEvent::Deleted => Self::CoverageDeleted,
        }
    }
}

/// A top-level directory tracked with its own configuration and coverage data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitoredRoot {
    pub name: String,
    pub path: PathBuf,
}

impl MonitoredRoot {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Names the root after its last path component.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

pub fn serialize_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Into::into)
}

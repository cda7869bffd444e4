use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Non-fatal anomaly found while indexing. The tree is still built around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexDiagnostic {
    /// More than one live file ends with the reported path.
    AmbiguousPath {
        root: String,
        reported: String,
        candidates: Vec<String>,
    },
    /// No live file ends with the reported path.
    UnmatchedPath { root: String, reported: String },
    /// The indexed file does not exist on disk.
    MissingFile { root: String, path: PathBuf },
    /// Two reported paths resolved to the same file; the record reported as `kept` wins.
    PathCollision {
        root: String,
        path: String,
        kept: String,
        dropped: String,
    },
    /// A path segment collides with a node of the wrong kind; the record was skipped.
    StructuralInconsistency {
        root: String,
        reported: String,
        conflict: String,
    },
    LoadFailed { root: String, message: String },
    ListingFailed { root: String, message: String },
}

impl fmt::Display for IndexDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousPath {
                root,
                reported,
                candidates,
            } => write!(
                f,
                "[{root}] {reported} matches {} files",
                candidates.len()
            ),
            Self::UnmatchedPath { root, reported } => {
                write!(f, "[{root}] {reported} matches no file")
            }
            Self::MissingFile { root, path } => write!(
                f,
                "[{root}] file {} does not exist; with several roots make sure each one is registered",
                path.display()
            ),
            Self::PathCollision {
                root,
                path,
                kept,
                dropped,
            } => write!(
                f,
                "[{root}] {kept} and {dropped} both resolve to {path}; ignoring {dropped}"
            ),
            Self::StructuralInconsistency {
                root,
                reported,
                conflict,
            } => write!(
                f,
                "[{root}] skipped {reported}: could not find a folder node at {conflict}"
            ),
            Self::LoadFailed { root, message } => {
                write!(f, "[{root}] coverage load failed: {message}")
            }
            Self::ListingFailed { root, message } => {
                write!(f, "[{root}] file listing failed: {message}")
            }
        }
    }
}

/// Summary of one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub roots: usize,
    pub files: usize,
    pub functions: usize,
    pub time_ms: u64,
    pub diagnostics: Vec<IndexDiagnostic>,
}

impl IndexReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_diagnostic(&mut self, diagnostic: IndexDiagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = IndexDiagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

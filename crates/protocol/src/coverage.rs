use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hit statistics for one function of a covered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDetail {
    pub name: String,
    /// Source line the function starts on.
    pub line: u32,
    pub hit: u64,
}

/// Line and function coverage for one source file, as reported by the coverage tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    /// Path as reported; may be relative, truncated or use foreign separators.
    pub file_path: String,
    pub lines_found: u64,
    pub lines_hit: u64,
    #[serde(default)]
    pub functions: Vec<FunctionDetail>,
}

impl CoverageRecord {
    pub fn new(file_path: impl Into<String>, lines_found: u64, lines_hit: u64) -> Self {
        Self {
            file_path: file_path.into(),
            lines_found,
            lines_hit,
            functions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_function(mut self, name: impl Into<String>, line: u32, hit: u64) -> Self {
        self.functions.push(FunctionDetail {
            name: name.into(),
            line,
            hit,
        });
        self
    }
}

/// Coverage records of one monitored root, keyed by file path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageRecordSet {
    records: BTreeMap<String, CoverageRecord>,
}

impl CoverageRecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record` under its `file_path`, returning the record it replaced.
    pub fn insert(&mut self, record: CoverageRecord) -> Option<CoverageRecord> {
        self.records.insert(record.file_path.clone(), record)
    }

    pub fn get(&self, file_path: &str) -> Option<&CoverageRecord> {
        self.records.get(file_path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CoverageRecord)> {
        self.records.iter().map(|(key, record)| (key.as_str(), record))
    }

    pub fn records(&self) -> impl Iterator<Item = &CoverageRecord> {
        self.records.values()
    }
}

impl FromIterator<CoverageRecord> for CoverageRecordSet {
    fn from_iter<T: IntoIterator<Item = CoverageRecord>>(iter: T) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageLevel {
    Low,
    Medium,
    High,
}

impl CoverageLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for CoverageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage cut-offs used to classify coverage. Always `0 <= low <= sufficient <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageLevelThresholds {
    sufficient: f64,
    low: f64,
}

impl CoverageLevelThresholds {
    pub fn new(sufficient: f64, low: f64) -> Result<Self, ProtocolError> {
        let in_range = |value: f64| (0.0..=100.0).contains(&value);
        if !in_range(sufficient) || !in_range(low) || low > sufficient {
            return Err(ProtocolError::InvalidThresholds { sufficient, low });
        }
        Ok(Self { sufficient, low })
    }

    pub const fn sufficient(&self) -> f64 {
        self.sufficient
    }

    pub const fn low(&self) -> f64 {
        self.low
    }

    pub fn classify(&self, percent: f64) -> CoverageLevel {
        if percent >= self.sufficient {
            CoverageLevel::High
        } else if percent >= self.low {
            CoverageLevel::Medium
        } else {
            CoverageLevel::Low
        }
    }
}

impl Default for CoverageLevelThresholds {
    fn default() -> Self {
        Self {
            sufficient: 70.0,
            low: 50.0,
        }
    }
}

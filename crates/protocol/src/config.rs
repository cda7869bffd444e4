use crate::{CoverageLevelThresholds, ProtocolError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_MS: u64 = 3_000;

/// Settings of one monitored root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RootConfig {
    /// Forward coverage file events to the tree. Manual and config refreshes ignore this flag.
    pub auto_refresh: bool,
    /// Throttle window applied to coverage file events.
    pub auto_refresh_debounce_ms: u64,
    /// Globs, relative to the root, selecting the files that hold coverage data.
    pub coverage_file_patterns: Vec<String>,
    pub sufficient_coverage_threshold: f64,
    pub low_coverage_threshold: f64,
    /// Shell command that regenerates coverage, run from the root directory.
    pub coverage_command: Option<String>,
}

impl Default for RootConfig {
    fn default() -> Self {
        let thresholds = CoverageLevelThresholds::default();
        Self {
            auto_refresh: true,
            auto_refresh_debounce_ms: DEFAULT_DEBOUNCE_MS,
            coverage_file_patterns: vec![
                "**/coverage/**".to_string(),
                "**/lcov.info".to_string(),
                "**/coverage.json".to_string(),
            ],
            sufficient_coverage_threshold: thresholds.sufficient(),
            low_coverage_threshold: thresholds.low(),
            coverage_command: None,
        }
    }
}

impl RootConfig {
    pub fn thresholds(&self) -> Result<CoverageLevelThresholds, ProtocolError> {
        CoverageLevelThresholds::new(
            self.sufficient_coverage_threshold,
            self.low_coverage_threshold,
        )
    }

    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.auto_refresh_debounce_ms)
    }

    /// Trimmed, non-empty coverage command.
    pub fn command(&self) -> Option<&str> {
        self.coverage_command
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }
}

/// Partial [`RootConfig`] used for per-root overrides; unset fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfigOverride {
    pub auto_refresh: Option<bool>,
    pub auto_refresh_debounce_ms: Option<u64>,
    pub coverage_file_patterns: Option<Vec<String>>,
    pub sufficient_coverage_threshold: Option<f64>,
    pub low_coverage_threshold: Option<f64>,
    pub coverage_command: Option<String>,
}

impl RootConfigOverride {
    #[must_use]
    pub fn apply(&self, base: &RootConfig) -> RootConfig {
        RootConfig {
            auto_refresh: self.auto_refresh.unwrap_or(base.auto_refresh),
            auto_refresh_debounce_ms: self
                .auto_refresh_debounce_ms
                .unwrap_or(base.auto_refresh_debounce_ms),
            coverage_file_patterns: self
                .coverage_file_patterns
                .clone()
                .unwrap_or_else(|| base.coverage_file_patterns.clone()),
            sufficient_coverage_threshold: self
                .sufficient_coverage_threshold
                .unwrap_or(base.sufficient_coverage_threshold),
            low_coverage_threshold: self
                .low_coverage_threshold
                .unwrap_or(base.low_coverage_threshold),
            coverage_command: self
                .coverage_command
                .clone()
                .or_else(|| base.coverage_command.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn override_keeps_unset_fields() {
        let base = RootConfig {
            coverage_command: Some("make cov".to_string()),
            ..RootConfig::default()
        };
        let patch = RootConfigOverride {
            auto_refresh: Some(false),
            low_coverage_threshold: Some(20.0),
            ..RootConfigOverride::default()
        };

        let merged = patch.apply(&base);
        assert!(!merged.auto_refresh);
        assert_eq!(merged.low_coverage_threshold, 20.0);
        assert_eq!(merged.auto_refresh_debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(merged.command(), Some("make cov"));
    }

    #[test]
    fn blank_command_is_treated_as_missing() {
        let config = RootConfig {
            coverage_command: Some("   ".to_string()),
            ..RootConfig::default()
        };
        assert_eq!(config.command(), None);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: RootConfig = serde_json::from_str(r#"{"auto_refresh_debounce_ms":100}"#).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert!(config.auto_refresh);
        assert!(config.thresholds().is_ok());
    }
}

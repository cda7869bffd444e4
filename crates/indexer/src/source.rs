use crate::config::ConfigStore;
use crate::scanner::FileScanner;
use crate::{CoverageError, Result};
use async_trait::async_trait;
use covtree_protocol::{CoverageFileFilter, CoverageRecord, CoverageRecordSet, MonitoredRoot};
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Produces the current coverage records of a root. Discovery and parsing happen behind it.
#[async_trait]
pub trait CoverageSource: Send + Sync {
    async fn load_coverage(&self, root: &MonitoredRoot) -> Result<CoverageRecordSet>;
}

/// Reads pre-parsed coverage: JSON arrays of [`CoverageRecord`] stored in the root's
/// coverage files (the `.json` files matched by `coverage_file_patterns`).
#[derive(Clone)]
pub struct JsonCoverageSource {
    config: ConfigStore,
}

impl JsonCoverageSource {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }

    fn discover(root: &MonitoredRoot, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let filter = CoverageFileFilter::new(patterns)?;
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        Ok(FileScanner::new(&root.path)
            .scan_matching(&filter)
            .into_iter()
            .filter(|path| is_json(path))
            .collect())
    }
}

#[async_trait]
impl CoverageSource for JsonCoverageSource {
    async fn load_coverage(&self, root: &MonitoredRoot) -> Result<CoverageRecordSet> {
        let patterns = self.config.get(root).coverage_file_patterns;
        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || Self::discover(&scan_root, &patterns))
            .await
            .map_err(|err| CoverageError::Other(format!("coverage discovery failed: {err}")))??;

        let mut set = CoverageRecordSet::new();
        for file in files {
            let bytes = tokio::fs::read(&file).await?;
            let records: Vec<CoverageRecord> =
                serde_json::from_slice(&bytes).map_err(|err| CoverageError::Load {
                    root: root.path.clone(),
                    message: format!("{}: {err}", file.display()),
                })?;
            debug!("Loaded {} coverage records from {}", records.len(), file.display());
            for record in records {
                if let Some(previous) = set.insert(record) {
                    warn!(
                        "Coverage for {} reported twice; using {}",
                        previous.file_path,
                        file.display()
                    );
                }
            }
        }
        Ok(set)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

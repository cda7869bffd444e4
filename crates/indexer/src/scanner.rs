use crate::{CoverageError, Result};
use async_trait::async_trait;
use covtree_protocol::{CoverageFileFilter, MonitoredRoot};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Source of the live file listing used to reconcile coverage paths.
#[async_trait]
pub trait FileLister: Send + Sync {
    /// Absolute paths of every file currently in `root`.
    async fn list_files(&self, root: &MonitoredRoot) -> Result<Vec<PathBuf>>;
}

/// [`FileLister`] backed by [`FileScanner`], run on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkFileLister;

#[async_trait]
impl FileLister for WalkFileLister {
    async fn list_files(&self, root: &MonitoredRoot) -> Result<Vec<PathBuf>> {
        let path = root.path.clone();
        tokio::task::spawn_blocking(move || FileScanner::new(path).scan())
            .await
            .map_err(|err| CoverageError::Other(format!("file scan task failed: {err}")))?
    }
}

/// Walks a root directory.
pub struct FileScanner {
    root: PathBuf,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Every file of the root, including hidden and ignored ones. Only VCS metadata is skipped.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(CoverageError::Configuration(format!(
                "root {} is not a directory",
                self.root.display()
            )));
        }

        let files = self.collect(self.unfiltered_walk(), |_| true);
        log::debug!("Found {} files in {}", files.len(), self.root.display());
        Ok(files)
    }

    /// Files matching `filter`. Ignore files are not honoured: coverage output is usually ignored.
    pub fn scan_matching(&self, filter: &CoverageFileFilter) -> Vec<PathBuf> {
        let root = self.root.clone();
        self.collect(self.unfiltered_walk(), |path| filter.matches(&root, path))
    }

    fn unfiltered_walk(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false);
        builder.filter_entry(|entry| !Self::is_vcs_dir(entry.path()));
        builder
    }

    fn collect(&self, builder: WalkBuilder, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }
                    let path = entry.path();
                    if keep(path) {
                        files.push(path.to_path_buf());
                    }
                }
                Err(e) => log::warn!("Failed to read entry under {}: {e}", self.root.display()),
            }
        }
        files.sort();
        files
    }

    fn is_vcs_dir(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| matches!(name, ".git" | ".hg" | ".svn"))
    }
}

//! Owns the live coverage tree and rebuilds it on request.

use crate::builder::{build_tree, RootCoverage};
use crate::command::CommandRunner;
use crate::config::ConfigStore;
use crate::orchestrator::RefreshStream;
use crate::reconcile::reconcile_paths;
use crate::report::{IndexDiagnostic, IndexReport};
use crate::scanner::FileLister;
use crate::source::CoverageSource;
use crate::tree::TreeNode;
use crate::{CoverageError, Result};
use covtree_protocol::{CoverageLevelThresholds, CoverageRecordSet, MonitoredRoot, RefreshReason};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Immutable snapshot published after every rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageTree {
    pub root: TreeNode,
    /// `None` until the first rebuild.
    pub reason: Option<RefreshReason>,
    pub report: IndexReport,
}

impl CoverageTree {
    pub fn empty() -> Self {
        Self {
            root: TreeNode::root(),
            reason: None,
            report: IndexReport::new(),
        }
    }

    pub fn root_children(&self) -> Vec<&TreeNode> {
        self.root.sorted_children()
    }
}

#[derive(Clone)]
pub struct CoverageTreeProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    roots: Vec<MonitoredRoot>,
    config: ConfigStore,
    source: Arc<dyn CoverageSource>,
    lister: Arc<dyn FileLister>,
    runner: Arc<dyn CommandRunner>,
    tree: watch::Sender<Arc<CoverageTree>>,
    build_lock: Mutex<()>,
}

impl CoverageTreeProvider {
    pub fn new(
        roots: Vec<MonitoredRoot>,
        config: ConfigStore,
        source: Arc<dyn CoverageSource>,
        lister: Arc<dyn FileLister>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let (tree, _) = watch::channel(Arc::new(CoverageTree::empty()));
        Self {
            inner: Arc::new(ProviderInner {
                roots,
                config,
                source,
                lister,
                runner,
                tree,
                build_lock: Mutex::new(()),
            }),
        }
    }

    pub fn roots(&self) -> &[MonitoredRoot] {
        &self.inner.roots
    }

    pub fn current(&self) -> Arc<CoverageTree> {
        self.inner.tree.borrow().clone()
    }

    /// Fires after every published rebuild.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CoverageTree>> {
        self.inner.tree.subscribe()
    }

    /// Sorted children of `node`, or of the current tree's root when `node` is `None`.
    pub fn children(&self, node: Option<&TreeNode>) -> Vec<TreeNode> {
        match node {
            Some(node) => node.sorted_children().into_iter().cloned().collect(),
            None => self.root_children(),
        }
    }

    pub fn root_children(&self) -> Vec<TreeNode> {
        self.current()
            .root_children()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Loads every root, rebuilds the tree and swaps it in. Rebuilds never overlap:
    /// a call made while another build runs waits for it and then does its own.
    pub async fn rebuild(&self, reason: RefreshReason) -> Arc<CoverageTree> {
        let _build = self.inner.build_lock.lock().await;
        let started = Instant::now();
        let mut report = IndexReport::new();

        let mut inputs = Vec::with_capacity(self.inner.roots.len());
        for root in &self.inner.roots {
            inputs.push(self.load_root(root, &mut report).await);
        }

        let (root, diagnostics) = build_tree(&inputs);
        report.extend(diagnostics);
        report.roots = inputs.len();
        report.files = root.file_count();
        report.functions = root.function_count();
        #[allow(clippy::cast_possible_truncation)]
        let time_ms = started.elapsed().as_millis() as u64;
        report.time_ms = time_ms;
        info!(
            "Coverage tree rebuilt in {}ms after {reason}: {} roots, {} files, {} diagnostics",
            report.time_ms,
            report.roots,
            report.files,
            report.diagnostics.len()
        );

        let tree = Arc::new(CoverageTree {
            root,
            reason: Some(reason),
            report,
        });
        self.inner.tree.send_replace(tree.clone());
        tree
    }

    async fn load_root(&self, root: &MonitoredRoot, report: &mut IndexReport) -> RootCoverage {
        let config = self.inner.config.get(root);
        let thresholds = config.thresholds().unwrap_or_else(|err| {
            warn!("{}: {err}; using default thresholds", root.name);
            CoverageLevelThresholds::default()
        });

        let records = match self.inner.source.load_coverage(root).await {
            Ok(records) => records,
            Err(err) => {
                warn!("Failed to load coverage for {}: {err}", root.name);
                report.add_diagnostic(IndexDiagnostic::LoadFailed {
                    root: root.name.clone(),
                    message: err.to_string(),
                });
                CoverageRecordSet::new()
            }
        };

        let (records, live_files) = match self.inner.lister.list_files(root).await {
            Ok(live_files) => {
                let reconciled = reconcile_paths(root, &records, &live_files);
                report.extend(reconciled.diagnostics);
                (reconciled.records, live_files)
            }
            Err(err) => {
                warn!("Failed to list files of {}: {err}", root.name);
                report.add_diagnostic(IndexDiagnostic::ListingFailed {
                    root: root.name.clone(),
                    message: err.to_string(),
                });
                (records, Vec::new())
            }
        };

        RootCoverage {
            root: root.clone(),
            thresholds,
            records,
            live_files,
        }
    }

    /// Rebuilds once per refresh request until the stream closes.
    pub fn run(&self, mut refreshes: RefreshStream) -> JoinHandle<()> {
        let provider = self.clone();
        tokio::spawn(async move {
            while let Some(reason) = refreshes.recv().await {
                provider.rebuild(reason).await;
            }
            debug!("Refresh stream closed; provider loop stopped");
        })
    }

    /// Runs every root's `coverage_command` concurrently and joins their output.
    pub async fn generate_coverage(&self) -> Result<String> {
        if self.inner.roots.is_empty() {
            return Err(CoverageError::EmptyWorkspace);
        }

        let mut jobs = Vec::with_capacity(self.inner.roots.len());
        for root in &self.inner.roots {
            let config = self.inner.config.get(root);
            let Some(command) = config.command() else {
                return Err(CoverageError::Configuration(format!(
                    "no coverage_command configured for {}",
                    root.name
                )));
            };
            jobs.push((command.to_string(), root.path.clone()));
        }

        let handles: Vec<JoinHandle<Result<String>>> = jobs
            .into_iter()
            .map(|(command, cwd)| {
                let runner = self.inner.runner.clone();
                tokio::spawn(async move { runner.run(&command, &cwd).await })
            })
            .collect();

        let mut outputs = Vec::with_capacity(handles.len());
        let mut pending = handles.into_iter();
        while let Some(handle) = pending.next() {
            let outcome = handle
                .await
                .map_err(|err| CoverageError::Other(format!("coverage command task failed: {err}")))
                .and_then(|result| result);
            match outcome {
                Ok(stdout) => outputs.push(stdout),
                Err(err) => {
                    for rest in pending.by_ref() {
                        rest.abort();
                    }
                    return Err(err);
                }
            }
        }
        Ok(outputs.join("\n"))
    }
}

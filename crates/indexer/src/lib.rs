//! # Coverage Indexer
//!
//! Live, directory-shaped coverage trees for one or more monitored roots.
//!
//! ## Pipeline
//!
//! ```text
//! manual / config / coverage file events
//!     │
//!     └──> Refresh Orchestrator (per-root throttle, auto_refresh gate)
//!            └─> RefreshReason stream
//!                  │
//!                  └──> CoverageTreeProvider::rebuild
//!                         ├─> CoverageSource   (records per root)
//!                         ├─> FileLister       (live files, VCS metadata skipped)
//!                         ├─> reconcile_paths  (reported path -> real path)
//!                         └─> build_tree       (folders, files, functions)
//!                               └─> CoverageTree snapshot (watch channel)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use covtree_indexer::{
//!     ConfigStore, CoverageTreeProvider, JsonCoverageSource, NotifyEventSource,
//!     RefreshOrchestrator, ShellCommandRunner, WalkFileLister,
//! };
//! use covtree_protocol::{MonitoredRoot, RefreshReason, RootConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> covtree_indexer::Result<()> {
//!     let roots = vec![MonitoredRoot::from_path("/path/to/project")];
//!     let config = ConfigStore::new(RootConfig::default());
//!     let provider = CoverageTreeProvider::new(
//!         roots.clone(),
//!         config.clone(),
//!         Arc::new(JsonCoverageSource::new(config.clone())),
//!         Arc::new(WalkFileLister),
//!         Arc::new(ShellCommandRunner),
//!     );
//!     let (orchestrator, refreshes) =
//!         RefreshOrchestrator::start(&roots, &config, Arc::new(NotifyEventSource::default()))?;
//!     let worker = provider.run(refreshes);
//!     orchestrator.force_refresh(RefreshReason::Manual).await?;
//!
//!     let mut updates = provider.subscribe();
//!     updates.changed().await.ok();
//!     println!("{} files indexed", provider.current().report.files);
//!
//!     orchestrator.shutdown().await;
//!     worker.await.ok();
//!     Ok(())
//! }
//! ```

mod builder;
mod command;
mod config;
mod error;
mod events;
mod orchestrator;
mod provider;
mod reconcile;
mod report;
mod scanner;
mod source;
mod tree;

pub use builder::{build_tree, RootCoverage};
pub use command::{CommandRunner, ShellCommandRunner};
pub use config::{ConfigChange, ConfigStore, CoverageConfig, CONFIG_FILE_NAME};
pub use error::{CoverageError, Result};
pub use events::{
    classify_event, ChangeEventSource, ChangeSubscription, ChannelEventSource, NotifyEventSource,
};
pub use orchestrator::{RefreshOrchestrator, RefreshStream};
pub use provider::{CoverageTree, CoverageTreeProvider};
pub use reconcile::{reconcile_paths, Reconciliation};
pub use report::{IndexDiagnostic, IndexReport};
pub use scanner::{FileLister, FileScanner, WalkFileLister};
pub use source::{CoverageSource, JsonCoverageSource};
pub use tree::{locale_compare, NodeKind, TreeNode, Walk};

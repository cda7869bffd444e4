//! Merges manual triggers, configuration changes and per-root coverage file events
//! into one stream of refresh requests.
//!
//! ```text
//! force_refresh ───────────────────────────────┐
//! ConfigStore::changes ── ConfigUpdated ───────┤
//! root A events ── throttle(A) ── auto_refresh ┼──> RefreshStream
//! root B events ── throttle(B) ── auto_refresh ┘
//! ```
//!
//! Each root's throttle window follows the root's current `auto_refresh_debounce_ms`;
//! a new value swaps in a fresh window without dropping the raw subscription.

use crate::config::{ConfigChange, ConfigStore};
use crate::events::{ChangeEventSource, ChangeSubscription};
use crate::{CoverageError, Result};
use covtree_protocol::{MonitoredRoot, RefreshReason, RootConfig};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const REFRESH_CAPACITY: usize = 64;

/// Owns every source subscription and the tasks that funnel them into the refresh stream.
pub struct RefreshOrchestrator {
    refresh_tx: Option<mpsc::Sender<RefreshReason>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Receiving end of the merged refresh signal.
pub struct RefreshStream {
    rx: mpsc::Receiver<RefreshReason>,
    disposed: watch::Receiver<bool>,
}

impl RefreshStream {
    /// Next refresh request; `None` once the orchestrator is disposed.
    pub async fn recv(&mut self) -> Option<RefreshReason> {
        if *self.disposed.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.disposed.changed() => None,
            reason = self.rx.recv() => reason,
        }
    }
}

impl RefreshOrchestrator {
    /// Subscribes to every source and starts forwarding. Must run inside a tokio runtime.
    pub fn start(
        roots: &[MonitoredRoot],
        config: &ConfigStore,
        source: Arc<dyn ChangeEventSource>,
    ) -> Result<(Self, RefreshStream)> {
        if roots.is_empty() {
            warn!("Empty workspace");
            return Err(CoverageError::EmptyWorkspace);
        }

        let mut watched = Vec::with_capacity(roots.len());
        for root in roots {
            let config_rx = config.subscribe(root);
            let patterns = config_rx.borrow().coverage_file_patterns.clone();
            let subscription = source.subscribe(root, &patterns)?;
            watched.push((root.clone(), config_rx, subscription));
        }

        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(roots.len() + 1);

        tasks.push(tokio::spawn(forward_config_changes(
            config.changes(),
            refresh_tx.clone(),
            shutdown_rx.clone(),
        )));

        for (root, config_rx, subscription) in watched {
            let watcher = RootWatcher {
                root,
                source: source.clone(),
                subscription,
                config_rx,
                refresh_tx: refresh_tx.clone(),
                shutdown: shutdown_rx.clone(),
            };
            tasks.push(tokio::spawn(watcher.run()));
        }

        Ok((
            Self {
                refresh_tx: Some(refresh_tx),
                shutdown_tx,
                tasks,
            },
            RefreshStream {
                rx: refresh_rx,
                disposed: shutdown_rx,
            },
        ))
    }

    /// Explicit refresh; forwarded regardless of `auto_refresh`.
    pub async fn force_refresh(&self, reason: RefreshReason) -> Result<()> {
        let tx = self
            .refresh_tx
            .as_ref()
            .ok_or_else(|| CoverageError::Other("refresh orchestrator is disposed".to_string()))?;
        let mut shutdown = self.shutdown_tx.subscribe();
        if forward(tx, reason, &mut shutdown).await {
            Ok(())
        } else {
            Err(CoverageError::Other(
                "refresh stream receiver was dropped".to_string(),
            ))
        }
    }

    /// Stops every task and releases every raw subscription before returning.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        self.refresh_tx.take();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("Refresh task ended abnormally: {err}");
                }
            }
        }
        info!("Refresh orchestrator disposed");
    }
}

impl Drop for RefreshOrchestrator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Sends `reason` unless shutdown starts first; `false` means the caller should stop.
async fn forward(
    tx: &mpsc::Sender<RefreshReason>,
    reason: RefreshReason,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    info!("Refreshing due to {reason}...");
    tokio::select! {
        biased;
        _ = shutdown.changed() => false,
        sent = tx.send(reason) => sent.is_ok(),
    }
}

async fn forward_config_changes(
    mut changes: broadcast::Receiver<ConfigChange>,
    refresh_tx: mpsc::Sender<RefreshReason>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            change = changes.recv() => match change {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if !forward(&refresh_tx, RefreshReason::ConfigUpdated, &mut shutdown).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Leading-edge throttle: the first event opens a window, events inside it are dropped.
#[derive(Debug, Clone, Copy)]
struct Throttle {
    interval: Duration,
    window_end: Option<Instant>,
}

impl Throttle {
    const fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_end: None,
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        match self.window_end {
            Some(end) if now < end => false,
            _ => {
                self.window_end = Some(now + self.interval);
                true
            }
        }
    }
}

struct RootWatcher {
    root: MonitoredRoot,
    source: Arc<dyn ChangeEventSource>,
    subscription: ChangeSubscription,
    config_rx: watch::Receiver<RootConfig>,
    refresh_tx: mpsc::Sender<RefreshReason>,
    shutdown: watch::Receiver<bool>,
}

impl RootWatcher {
    async fn run(mut self) {
        let (mut interval, mut patterns) = {
            let config = self.config_rx.borrow_and_update();
            (config.debounce(), config.coverage_file_patterns.clone())
        };
        let mut throttle = Throttle::new(interval);
        let mut config_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                changed = self.config_rx.changed(), if config_open => {
                    if changed.is_err() {
                        config_open = false;
                        continue;
                    }
                    let (next_interval, next_patterns) = {
                        let config = self.config_rx.borrow_and_update();
                        (config.debounce(), config.coverage_file_patterns.clone())
                    };
                    if next_interval != interval {
                        info!(
                            "Throttle for {} swapped from {}ms to {}ms",
                            self.root.name,
                            interval.as_millis(),
                            next_interval.as_millis()
                        );
                        interval = next_interval;
                        throttle = Throttle::new(interval);
                    }
                    if next_patterns != patterns {
                        self.resubscribe(&next_patterns);
                        patterns = next_patterns;
                    }
                }
                event = self.subscription.recv() => {
                    let Some(event) = event else {
                        warn!("Coverage watch for {} closed", self.root.name);
                        break;
                    };
                    if !throttle.admit(Instant::now()) {
                        debug!("Throttled {event:?} in {}", self.root.name);
                        continue;
                    }
                    if !self.config_rx.borrow().auto_refresh {
                        debug!("Auto refresh disabled for {}; ignoring {event:?}", self.root.name);
                        continue;
                    }
                    if !forward(&self.refresh_tx, event.into(), &mut self.shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!("Watcher task for {} stopped", self.root.name);
    }

    /// Replaces the raw subscription; the previous one is released once the new one is live.
    fn resubscribe(&mut self, patterns: &[String]) {
        match self.source.subscribe(&self.root, patterns) {
            Ok(subscription) => {
                info!(
                    "Coverage patterns of {} changed; watching {}",
                    self.root.name,
                    patterns.join(",")
                );
                self.subscription = subscription;
            }
            Err(err) => warn!(
                "Keeping previous coverage watch for {}: {err}",
                self.root.name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_admits_leading_event_only() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        assert!(throttle.admit(start));
        assert!(!throttle.admit(start + Duration::from_millis(99)));
        assert!(throttle.admit(start + Duration::from_millis(100)));
        assert!(!throttle.admit(start + Duration::from_millis(150)));
    }

    #[test]
    fn zero_interval_never_throttles() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.admit(start));
        assert!(throttle.admit(start));
    }
}

//! Raw coverage-file change sources.

use crate::Result;
use covtree_protocol::{CoverageFileEvent, CoverageFileFilter, MonitoredRoot};
use log::{debug, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

const SUBSCRIPTION_CAPACITY: usize = 256;

/// One live subscription to a root's coverage files. Dropping it releases the underlying watch.
pub struct ChangeSubscription {
    events: mpsc::Receiver<CoverageFileEvent>,
    _guard: Box<dyn Send>,
}

impl ChangeSubscription {
    pub fn new(events: mpsc::Receiver<CoverageFileEvent>, guard: impl Send + 'static) -> Self {
        Self {
            events,
            _guard: Box::new(guard),
        }
    }

    pub async fn recv(&mut self) -> Option<CoverageFileEvent> {
        self.events.recv().await
    }
}

/// Produces create/update/delete events for the files of a root matching `patterns`.
pub trait ChangeEventSource: Send + Sync {
    fn subscribe(&self, root: &MonitoredRoot, patterns: &[String]) -> Result<ChangeSubscription>;
}

/// File-system backed source built on `notify`.
#[derive(Debug, Clone, Copy)]
pub struct NotifyEventSource {
    poll_interval: std::time::Duration,
}

impl Default for NotifyEventSource {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(2),
        }
    }
}

impl NotifyEventSource {
    pub fn with_poll_interval(poll_interval: std::time::Duration) -> Self {
        Self { poll_interval }
    }
}

impl ChangeEventSource for NotifyEventSource {
    fn subscribe(&self, root: &MonitoredRoot, patterns: &[String]) -> Result<ChangeSubscription> {
        let filter = CoverageFileFilter::new(patterns)?;
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let watch_root = root.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(evt) => {
                    let Some(kind) = classify_event(&evt.kind) else {
                        return;
                    };
                    if evt.paths.iter().any(|p| filter.matches(&watch_root, p)) {
                        if let Err(err) = sender.try_send(kind) {
                            debug!("Dropping coverage event {kind:?}: {err}");
                        }
                    }
                }
                Err(err) => warn!("Watcher error: {err}"),
            },
            NotifyConfig::default().with_poll_interval(self.poll_interval),
        )?;
        watcher.watch(&root.path, RecursiveMode::Recursive)?;
        info!(
            "Watching {} for coverage files ({})",
            root.path.display(),
            patterns.join(",")
        );

        Ok(ChangeSubscription::new(
            receiver,
            WatchGuard {
                _watcher: watcher,
                root: root.path.clone(),
            },
        ))
    }
}

struct WatchGuard {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        info!("Dispose watcher for {}", self.root.display());
    }
}

/// Maps a notify event kind to a coverage lifecycle event. Access and metadata noise is dropped.
pub fn classify_event(kind: &EventKind) -> Option<CoverageFileEvent> {
    match kind {
        EventKind::Create(_) => Some(CoverageFileEvent::Created),
        EventKind::Remove(_) => Some(CoverageFileEvent::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(CoverageFileEvent::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(CoverageFileEvent::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(CoverageFileEvent::Updated),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// In-process source: events are pushed with [`ChannelEventSource::emit`].
#[derive(Clone, Default)]
pub struct ChannelEventSource {
    subscribers: Arc<Mutex<HashMap<PathBuf, Vec<mpsc::Sender<CoverageFileEvent>>>>>,
}

impl ChannelEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every live subscription of `root`; returns how many received it.
    pub fn emit(&self, root: &MonitoredRoot, event: CoverageFileEvent) -> usize {
        let mut guard = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = guard.get_mut(&root.path) else {
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.try_send(event).is_ok())
            .count()
    }

    /// Number of subscriptions of `root` that have not been released.
    pub fn active_subscriptions(&self, root: &MonitoredRoot) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&root.path)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl ChangeEventSource for ChannelEventSource {
    fn subscribe(&self, root: &MonitoredRoot, patterns: &[String]) -> Result<ChangeSubscription> {
        CoverageFileFilter::new(patterns)?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(root.path.clone())
            .or_default()
            .push(tx);
        Ok(ChangeSubscription::new(rx, ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn event_kinds_map_to_lifecycle_events() {
        assert_eq!(
            classify_event(&EventKind::Create(CreateKind::File)),
            Some(CoverageFileEvent::Created)
        );
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(CoverageFileEvent::Updated)
        );
        assert_eq!(
            classify_event(&EventKind::Remove(RemoveKind::File)),
            Some(CoverageFileEvent::Deleted)
        );
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(CoverageFileEvent::Created)
        );
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
        assert_eq!(classify_event(&EventKind::Access(AccessKind::Any)), None);
    }

    #[tokio::test]
    async fn channel_source_releases_on_drop() {
        let source = ChannelEventSource::new();
        let root = MonitoredRoot::new("api", "/w/api");
        let mut sub = source.subscribe(&root, &["coverage/**".to_string()]).unwrap();
        assert_eq!(source.active_subscriptions(&root), 1);

        assert_eq!(source.emit(&root, CoverageFileEvent::Updated), 1);
        assert_eq!(sub.recv().await, Some(CoverageFileEvent::Updated));

        drop(sub);
        assert_eq!(source.active_subscriptions(&root), 0);
        assert_eq!(source.emit(&root, CoverageFileEvent::Updated), 0);
    }

    #[test]
    fn channel_source_validates_patterns() {
        let source = ChannelEventSource::new();
        let root = MonitoredRoot::new("api", "/w/api");
        assert!(source.subscribe(&root, &["[".to_string()]).is_err());
    }
}

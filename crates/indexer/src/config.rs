use crate::{CoverageError, Result};
use covtree_protocol::{CoverageFileFilter, MonitoredRoot, RootConfig, RootConfigOverride};
use log::{debug, info};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};

pub const CONFIG_FILE_NAME: &str = "covtree.toml";

const ENV_AUTO_REFRESH: &str = "COVTREE_AUTO_REFRESH";
const ENV_DEBOUNCE_MS: &str = "COVTREE_DEBOUNCE_MS";
const ENV_COVERAGE_COMMAND: &str = "COVTREE_COVERAGE_COMMAND";

/// Settings file contents: shared defaults plus per-root overrides keyed by root name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageConfig {
    pub defaults: RootConfig,
    pub roots: BTreeMap<String, RootConfigOverride>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    defaults: RootConfig,
    roots: BTreeMap<String, RootConfigOverride>,
}

impl CoverageConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|err| {
            CoverageError::Configuration(format!(
                "failed to read config file {}: {err}",
                path.display()
            ))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Accepts JSON or TOML.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(json_err) => {
                let utf8 = std::str::from_utf8(bytes).map_err(|err| {
                    CoverageError::Configuration(format!("{json_err}; {err}"))
                })?;
                let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                    CoverageError::Configuration(format!(
                        "config is not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}"
                    ))
                })?;
                serde_json::to_value(toml_value).map_err(|err| {
                    CoverageError::Configuration(format!(
                        "failed to convert TOML config to JSON: {err}"
                    ))
                })?
            }
        };
        let raw: RawConfig = serde_json::from_value(value)
            .map_err(|err| CoverageError::Configuration(format!("config parse error: {err}")))?;
        let config = Self {
            defaults: raw.defaults,
            roots: raw.roots,
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads `covtree.toml` from `dir` when present, defaults otherwise.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            info!("Loading configuration from {}", candidate.display());
            Self::from_file(&candidate)
        } else {
            debug!("No {CONFIG_FILE_NAME} in {}", dir.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_root_config("defaults", &self.defaults)?;
        for (name, patch) in &self.roots {
            validate_root_config(name, &patch.apply(&self.defaults))?;
        }
        Ok(())
    }

    pub fn for_root(&self, root: &MonitoredRoot) -> RootConfig {
        self.roots
            .get(&root.name)
            .map_or_else(|| self.defaults.clone(), |patch| patch.apply(&self.defaults))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_AUTO_REFRESH) {
            self.defaults.auto_refresh = is_truthy(&raw);
        }
        if let Some(ms) = lookup(ENV_DEBOUNCE_MS).and_then(|raw| raw.trim().parse::<u64>().ok()) {
            self.defaults.auto_refresh_debounce_ms = ms;
        }
        if let Some(command) = lookup(ENV_COVERAGE_COMMAND).filter(|c| !c.trim().is_empty()) {
            self.defaults.coverage_command = Some(command);
        }
    }
}

fn validate_root_config(scope: &str, config: &RootConfig) -> Result<()> {
    config
        .thresholds()
        .map_err(|err| CoverageError::Configuration(format!("{scope}: {err}")))?;
    CoverageFileFilter::new(&config.coverage_file_patterns)
        .map_err(|err| CoverageError::Configuration(format!("{scope}: {err}")))?;
    Ok(())
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Notification that some root's configuration changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub root: PathBuf,
}

/// Live, observable per-root configuration.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<ConfigStoreInner>,
}

struct ConfigStoreInner {
    defaults: RootConfig,
    roots: Mutex<HashMap<PathBuf, watch::Sender<RootConfig>>>,
    changes: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    pub fn new(defaults: RootConfig) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                defaults,
                roots: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }

    pub fn from_config(config: &CoverageConfig, roots: &[MonitoredRoot]) -> Self {
        let store = Self::new(config.defaults.clone());
        {
            let mut guard = store.lock_roots();
            for root in roots {
                let (tx, _) = watch::channel(config.for_root(root));
                guard.insert(root.path.clone(), tx);
            }
        }
        store
    }

    pub fn get(&self, root: &MonitoredRoot) -> RootConfig {
        self.lock_roots()
            .get(&root.path)
            .map_or_else(|| self.inner.defaults.clone(), |tx| tx.borrow().clone())
    }

    /// Receiver that always holds the root's current configuration.
    pub fn subscribe(&self, root: &MonitoredRoot) -> watch::Receiver<RootConfig> {
        let mut guard = self.lock_roots();
        guard
            .entry(root.path.clone())
            .or_insert_with(|| watch::channel(self.inner.defaults.clone()).0)
            .subscribe()
    }

    /// Stream of change notifications across all roots.
    pub fn changes(&self) -> broadcast::Receiver<ConfigChange> {
        self.inner.changes.subscribe()
    }

    pub fn update(&self, root: &MonitoredRoot, config: RootConfig) -> Result<()> {
        validate_root_config(&root.name, &config)?;
        {
            let mut guard = self.lock_roots();
            let tx = guard
                .entry(root.path.clone())
                .or_insert_with(|| watch::channel(self.inner.defaults.clone()).0);
            tx.send_replace(config);
        }
        debug!("Configuration of {} updated", root.name);
        let _ = self.inner.changes.send(ConfigChange {
            root: root.path.clone(),
        });
        Ok(())
    }

    pub fn modify(&self, root: &MonitoredRoot, f: impl FnOnce(&mut RootConfig)) -> Result<()> {
        let mut config = self.get(root);
        f(&mut config);
        self.update(root, config)
    }

    fn lock_roots(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, watch::Sender<RootConfig>>> {
        self.inner
            .roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

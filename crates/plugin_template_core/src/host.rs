//! Host collaborator interfaces handed to an extension on activation.
//!
//! # Responsibility
//! - Define the configuration store, log sink and data directory seams.
//! - Provide in-memory implementations for tests and the smoke host.
//!
//! # Invariants
//! - Extensions reach host services only through `HostContext`.
//! - `ConfigStore::publish` applies a whole batch under one write.

use crate::config::{ConfigMap, ConfigValue};
use crate::extension::access::{AccessControl, PrincipalRoleAccess};
use log::Level;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Host-wide key/value configuration storage.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn set(&self, key: &str, value: ConfigValue);

    /// Publishes a batch of keys. Implementations should apply it atomically.
    fn publish(&self, entries: &ConfigMap) {
        for (key, value) in entries {
            self.set(key, value.clone());
        }
    }
}

/// Process-local configuration store.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    values: RwLock<ConfigMap>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored key.
    pub fn snapshot(&self) -> ConfigMap {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: ConfigValue) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn publish(&self, entries: &ConfigMap) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            values.insert(key.clone(), value.clone());
        }
    }
}

/// Host logging sink.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Forwards lines to the `log` facade under a fixed target.
#[derive(Debug, Clone)]
pub struct FacadeLogSink {
    target: String,
}

impl FacadeLogSink {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for FacadeLogSink {
    fn default() -> Self {
        Self::new(crate::logging::LOG_TARGET)
    }
}

impl LogSink for FacadeLogSink {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: self.target.as_str(), level, "{message}");
    }
}

/// Records every line in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns whether any line at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(line_level, line)| *line_level == level && line.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, level: Level, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}

/// Everything an extension may use from its host.
#[derive(Clone)]
pub struct HostContext {
    config_store: Arc<dyn ConfigStore>,
    data_dir: PathBuf,
    log_sink: Arc<dyn LogSink>,
    access_control: Arc<dyn AccessControl>,
}

impl HostContext {
    /// Creates a context with in-memory storage, facade logging and
    /// principal-based access control.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_store: Arc::new(InMemoryConfigStore::new()),
            data_dir: data_dir.into(),
            log_sink: Arc::new(FacadeLogSink::default()),
            access_control: Arc::new(PrincipalRoleAccess),
        }
    }

    pub fn with_config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = store;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access_control = access;
        self
    }

    pub fn config_store(&self) -> &dyn ConfigStore {
        self.config_store.as_ref()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn access_control(&self) -> &dyn AccessControl {
        self.access_control.as_ref()
    }

    pub fn log_sink(&self) -> &dyn LogSink {
        self.log_sink.as_ref()
    }

    pub fn log(&self, level: Level, message: &str) {
        self.log_sink.log(level, message);
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigStore, HostContext, InMemoryConfigStore, LogSink, MemoryLogSink};
    use crate::config::ConfigMap;
    use log::Level;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn in_memory_store_publishes_batches() {
        let store = InMemoryConfigStore::new();
        store.set("HOST_KEY", json!(1));

        let mut batch = ConfigMap::new();
        batch.insert("EXT_A".to_string(), json!("a"));
        batch.insert("EXT_B".to_string(), json!(false));
        store.publish(&batch);

        assert_eq!(store.len(), 3);
        assert_eq!(store.get("EXT_B"), Some(json!(false)));
        assert_eq!(store.get("HOST_KEY"), Some(json!(1)));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn memory_sink_matches_level_and_text() {
        let sink = MemoryLogSink::new();
        sink.log(Level::Error, "event=activate status=error");
        assert!(sink.contains(Level::Error, "status=error"));
        assert!(!sink.contains(Level::Info, "status=error"));
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn context_routes_logs_to_configured_sink() {
        let sink = Arc::new(MemoryLogSink::new());
        let ctx = HostContext::new("/tmp/host-data").with_log_sink(sink.clone());
        ctx.log(Level::Info, "hello");
        assert!(sink.contains(Level::Info, "hello"));
        assert_eq!(ctx.data_dir().to_str(), Some("/tmp/host-data"));
    }
}

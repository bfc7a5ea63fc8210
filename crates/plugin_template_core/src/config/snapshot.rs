//! Live configuration snapshot shared by request handlers.
//!
//! Readers clone an `Arc<MergedConfig>`; writers build a complete new map and
//! swap the pointer under the write lock, so a reader never sees a half
//! applied update.

use super::defaults::DefaultConfig;
use super::merger::{merge, MergedConfig};
use super::{is_empty_value, ConfigMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

/// Swap point for the merged configuration of one extension.
#[derive(Debug)]
pub struct ConfigSnapshot {
    defaults: DefaultConfig,
    current: RwLock<Arc<MergedConfig>>,
}

impl ConfigSnapshot {
    /// Creates a snapshot holding the defaults only.
    pub fn new(defaults: DefaultConfig) -> Self {
        let initial = merge(&defaults, &ConfigMap::new());
        Self {
            defaults,
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn defaults(&self) -> &DefaultConfig {
        &self.defaults
    }

    /// Returns the snapshot visible right now.
    pub fn current(&self) -> Arc<MergedConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the whole snapshot, e.g. after a fresh `load`.
    pub fn replace(&self, merged: MergedConfig) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(merged);
    }

    /// Drops every override and returns to defaults only.
    pub fn reset(&self) {
        self.replace(merge(&self.defaults, &ConfigMap::new()));
    }

    /// Applies a partial update.
    ///
    /// Every key must be declared in the defaults; otherwise nothing changes.
    /// An empty value resets its key to the default. `publish` runs while the
    /// write lock is held so host-side publication happens in swap order.
    pub fn apply_update<F>(
        &self,
        update: &ConfigMap,
        publish: F,
    ) -> Result<Arc<MergedConfig>, ConfigUpdateError>
    where
        F: FnOnce(&MergedConfig),
    {
        let unknown: Vec<String> = update
            .keys()
            .filter(|key| !self.defaults.contains_key(key))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigUpdateError::UnknownKeys(unknown));
        }

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut values = guard.values().clone();
        for (key, value) in update {
            let next = if is_empty_value(value) {
                self.defaults.get(key).cloned().unwrap_or_default()
            } else {
                value.clone()
            };
            values.insert(key.clone(), next);
        }

        let next = Arc::new(MergedConfig::from_values(values));
        publish(next.as_ref());
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

/// Partial update rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdateError {
    UnknownKeys(Vec<String>),
}

impl Display for ConfigUpdateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKeys(keys) => {
                write!(f, "unrecognized configuration keys: {}", keys.join(", "))
            }
        }
    }
}

impl Error for ConfigUpdateError {}

#[cfg(test)]
mod tests {
    use super::{ConfigSnapshot, ConfigUpdateError};
    use crate::config::{ConfigMap, DefaultConfig};
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn snapshot() -> ConfigSnapshot {
        ConfigSnapshot::new(
            DefaultConfig::from_entries("EXT", [("EXT_A", json!("a")), ("EXT_B", json!(1))])
                .expect("valid defaults"),
        )
    }

    fn update(pairs: &[(&str, serde_json::Value)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn starts_from_defaults() {
        let snapshot = snapshot();
        assert_eq!(snapshot.current().get("EXT_A"), Some(&json!("a")));
    }

    #[test]
    fn applies_known_keys_and_publishes_once() {
        let snapshot = snapshot();
        let mut published = Vec::new();
        let next = snapshot
            .apply_update(&update(&[("EXT_B", json!(0))]), |merged| {
                published.push(merged.clone())
            })
            .expect("known key update");

        assert_eq!(next.get("EXT_B"), Some(&json!(0)));
        assert_eq!(next.get("EXT_A"), Some(&json!("a")));
        assert_eq!(published.len(), 1);
        assert!(Arc::ptr_eq(&next, &snapshot.current()));
    }

    #[test]
    fn unknown_key_rejects_whole_update() {
        let snapshot = snapshot();
        let before = snapshot.current();
        let err = snapshot
            .apply_update(
                &update(&[("EXT_A", json!("z")), ("EXT_MISSING", json!(1))]),
                |_| panic!("must not publish"),
            )
            .expect_err("unknown key must fail");

        assert_eq!(
            err,
            ConfigUpdateError::UnknownKeys(vec!["EXT_MISSING".to_string()])
        );
        assert!(Arc::ptr_eq(&before, &snapshot.current()));
    }

    #[test]
    fn empty_value_resets_to_default() {
        let snapshot = snapshot();
        snapshot
            .apply_update(&update(&[("EXT_A", json!("z"))]), |_| {})
            .expect("set");
        let next = snapshot
            .apply_update(&update(&[("EXT_A", json!(""))]), |_| {})
            .expect("reset");
        assert_eq!(next.get("EXT_A"), Some(&json!("a")));
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let snapshot = Arc::new(snapshot());
        let writer = {
            let snapshot = Arc::clone(&snapshot);
            thread::spawn(move || {
                for round in 0..200 {
                    snapshot
                        .apply_update(
                            &update(&[
                                ("EXT_A", json!(format!("v{round}"))),
                                ("EXT_B", json!(round)),
                            ]),
                            |_| {},
                        )
                        .expect("update");
                }
            })
        };

        for _ in 0..200 {
            let current = snapshot.current();
            let a = current.get("EXT_A").cloned().expect("EXT_A present");
            let b = current.get("EXT_B").cloned().expect("EXT_B present");
            if a != json!("a") {
                assert_eq!(a, json!(format!("v{}", b)));
            }
        }
        writer.join().expect("writer thread");
    }
}

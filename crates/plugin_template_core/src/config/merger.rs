//! Default/override merge and publication.

use super::defaults::DefaultConfig;
use super::override_file::{read_override_file, OverrideSource};
use super::{is_empty_value, ConfigMap, ConfigValue};
use crate::host::ConfigStore;
use log::debug;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub type ConfigResult<T> = Result<T, ConfigLoadError>;

/// Result of layering overrides on top of defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct MergedConfig {
    values: ConfigMap,
}

impl MergedConfig {
    pub(crate) fn from_values(values: ConfigMap) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    pub fn into_values(self) -> ConfigMap {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Layers `overrides` on top of `defaults`.
///
/// The result holds exactly the default keys. For each key a non-empty
/// override value wins, otherwise the default stays. Override keys the
/// defaults do not declare are dropped.
pub fn merge(defaults: &DefaultConfig, overrides: &ConfigMap) -> MergedConfig {
    let values = defaults
        .entries()
        .iter()
        .map(|(key, default)| {
            let value = match overrides.get(key) {
                Some(candidate) if !is_empty_value(candidate) => candidate.clone(),
                _ => default.clone(),
            };
            (key.clone(), value)
        })
        .collect();
    MergedConfig { values }
}

/// Reads the override source, merges it over `defaults` and publishes every
/// merged key into `store`.
///
/// # Errors
/// Returns the override read/parse failure unchanged; nothing is published
/// in that case.
pub fn load(
    defaults: &DefaultConfig,
    source: &OverrideSource,
    store: &dyn ConfigStore,
) -> ConfigResult<MergedConfig> {
    let overrides = read_override_file(source)?.unwrap_or_default();

    let ignored: Vec<&str> = overrides
        .keys()
        .filter(|key| !defaults.contains_key(key))
        .map(String::as_str)
        .collect();
    if !ignored.is_empty() {
        debug!(
            "event=config_load module=config status=ignored namespace={} keys={}",
            defaults.namespace(),
            ignored.join(",")
        );
    }

    let merged = merge(defaults, &overrides);
    store.publish(merged.values());
    debug!(
        "event=config_load module=config status=ok namespace={} keys={} overrides={}",
        defaults.namespace(),
        merged.len(),
        overrides.len() - ignored.len()
    );
    Ok(merged)
}

/// Override file load errors.
#[derive(Debug)]
pub enum ConfigLoadError {
    Missing { path: PathBuf },
    Unreadable { path: PathBuf, source: std::io::Error },
    Timeout { path: PathBuf, timeout: Duration },
    Malformed { path: PathBuf, reason: String },
}

impl ConfigLoadError {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Missing { path }
            | Self::Unreadable { path, .. }
            | Self::Timeout { path, .. }
            | Self::Malformed { path, .. } => path,
        }
    }
}

impl Display for ConfigLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { path } => write!(f, "override file not found: {}", path.display()),
            Self::Unreadable { path, .. } => {
                write!(f, "override file unreadable `{}`", path.display())
            }
            Self::Timeout { path, timeout } => write!(
                f,
                "override file read timed out after {}ms: {}",
                timeout.as_millis(),
                path.display()
            ),
            Self::Malformed { path, reason } => {
                write!(f, "override file malformed `{}`: {reason}", path.display())
            }
        }
    }
}

impl Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unreadable { source, .. } => Some(source),
            Self::Missing { .. } | Self::Timeout { .. } | Self::Malformed { .. } => None,
        }
    }
}

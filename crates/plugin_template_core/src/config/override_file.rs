//! User override file located in the host data directory.
//!
//! The file is a YAML mapping of configuration keys to values. Reads run on a
//! helper thread and are bounded by a timeout so a stalled mount cannot hold
//! up host startup.

use super::merger::{ConfigLoadError, ConfigResult};
use super::ConfigMap;
use serde_yaml::Value as YamlValue;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// File name of the override document inside the host data directory.
pub const OVERRIDE_FILE_NAME: &str = "config.yml";
/// Upper bound for one override file read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Policy for an override file that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingOverride {
    /// Fall back to defaults silently.
    #[default]
    UseDefaults,
    /// Treat a missing file as a load error.
    Fail,
}

/// Location and read policy of one override file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideSource {
    pub path: PathBuf,
    pub missing: MissingOverride,
    pub timeout: Duration,
}

impl OverrideSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            missing: MissingOverride::default(),
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// `<data_dir>/config.yml` with default policy.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(OVERRIDE_FILE_NAME))
    }

    pub fn with_missing(mut self, missing: MissingOverride) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reads and parses the override file.
///
/// Returns `Ok(None)` when the file is absent and the source tolerates it.
///
/// # Errors
/// - `Missing` when the file is absent under `MissingOverride::Fail`.
/// - `Unreadable` on any other I/O failure.
/// - `Timeout` when the read does not finish within `source.timeout`.
/// - `Malformed` when the document is not a mapping with string keys.
pub fn read_override_file(source: &OverrideSource) -> ConfigResult<Option<ConfigMap>> {
    let Some(contents) = read_with_timeout(&source.path, source.timeout)? else {
        return match source.missing {
            MissingOverride::UseDefaults => Ok(None),
            MissingOverride::Fail => Err(ConfigLoadError::Missing {
                path: source.path.clone(),
            }),
        };
    };
    parse_override_document(&source.path, &contents).map(Some)
}

fn read_with_timeout(path: &Path, timeout: Duration) -> ConfigResult<Option<String>> {
    let (tx, rx) = mpsc::channel();
    let owned_path = path.to_path_buf();
    thread::Builder::new()
        .name("config-override-read".to_string())
        .spawn(move || {
            let _ = tx.send(std::fs::read_to_string(&owned_path));
        })
        .map_err(|source| ConfigLoadError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(contents)) => Ok(Some(contents)),
        Ok(Err(err)) if err.kind() == ErrorKind::NotFound => Ok(None),
        Ok(Err(source)) => Err(ConfigLoadError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
        Err(RecvTimeoutError::Timeout) => Err(ConfigLoadError::Timeout {
            path: path.to_path_buf(),
            timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(ConfigLoadError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::other("override reader exited without a result"),
        }),
    }
}

pub(crate) fn parse_override_document(path: &Path, contents: &str) -> ConfigResult<ConfigMap> {
    let malformed = |reason: String| ConfigLoadError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let document: YamlValue =
        serde_yaml::from_str(contents).map_err(|err| malformed(err.to_string()))?;
    let mapping = match document {
        // Comment-only or blank file.
        YamlValue::Null => return Ok(ConfigMap::new()),
        YamlValue::Mapping(mapping) => mapping,
        other => {
            return Err(malformed(format!(
                "expected a mapping at document root, found {}",
                yaml_kind(&other)
            )))
        }
    };

    let mut overrides = ConfigMap::new();
    for (key, value) in mapping {
        let key = match key {
            YamlValue::String(key) => key,
            other => {
                return Err(malformed(format!(
                    "override keys must be strings, found {}",
                    yaml_kind(&other)
                )))
            }
        };
        let value = serde_json::to_value(&value)
            .map_err(|err| malformed(format!("value of `{key}` is not representable: {err}")))?;
        overrides.insert(key, value);
    }
    Ok(overrides)
}

fn yaml_kind(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "bool",
        YamlValue::Number(_) => "number",
        YamlValue::String(_) => "string",
        YamlValue::Sequence(_) => "sequence",
        YamlValue::Mapping(_) => "mapping",
        YamlValue::Tagged(_) => "tagged value",
    }
}

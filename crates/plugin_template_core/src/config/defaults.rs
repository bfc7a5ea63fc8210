//! Default configuration table.

use super::{ConfigMap, ConfigValue};
use crate::extension::manifest::is_valid_config_namespace;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static CONFIG_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid config key regex"));

/// Namespaced default values an extension ships with.
///
/// Every key is upper-case and starts with `<NAMESPACE>_`, which keeps it
/// clear of the host's own settings and of other extensions' keys.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultConfig {
    namespace: String,
    entries: ConfigMap,
}

impl DefaultConfig {
    /// Creates an empty table for `namespace`.
    pub fn new(namespace: impl Into<String>) -> Result<Self, DefaultsError> {
        let namespace = namespace.into();
        if !is_valid_config_namespace(&namespace) {
            return Err(DefaultsError::InvalidNamespace(namespace));
        }
        Ok(Self {
            namespace,
            entries: ConfigMap::new(),
        })
    }

    /// Builds a table from `(key, value)` pairs.
    pub fn from_entries<K, V, I>(
        namespace: impl Into<String>,
        entries: I,
    ) -> Result<Self, DefaultsError>
    where
        K: Into<String>,
        V: Into<ConfigValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        entries
            .into_iter()
            .try_fold(Self::new(namespace)?, |table, (key, value)| {
                table.with(key, value)
            })
    }

    /// Adds one declaration.
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<ConfigValue>,
    ) -> Result<Self, DefaultsError> {
        let key = key.into();
        self.validate_key(&key)?;
        if self.entries.contains_key(&key) {
            return Err(DefaultsError::DuplicateKey(key));
        }
        self.entries.insert(key, value.into());
        Ok(self)
    }

    /// Checks that `key` is upper-case and inside this table's namespace.
    pub fn validate_key(&self, key: &str) -> Result<(), DefaultsError> {
        if !CONFIG_KEY_RE.is_match(key) {
            return Err(DefaultsError::InvalidKey(key.to_string()));
        }
        let prefix = format!("{}_", self.namespace);
        if !key.starts_with(&prefix) || key.len() == prefix.len() {
            return Err(DefaultsError::OutsideNamespace {
                key: key.to_string(),
                namespace: self.namespace.clone(),
            });
        }
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> &ConfigMap {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Default table declaration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultsError {
    InvalidNamespace(String),
    InvalidKey(String),
    OutsideNamespace { key: String, namespace: String },
    DuplicateKey(String),
}

impl Display for DefaultsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNamespace(value) => {
                write!(f, "config namespace is invalid: {value}")
            }
            Self::InvalidKey(key) => {
                write!(f, "config key must be UPPER_SNAKE_CASE: {key}")
            }
            Self::OutsideNamespace { key, namespace } => {
                write!(f, "config key `{key}` must start with `{namespace}_`")
            }
            Self::DuplicateKey(key) => write!(f, "config key declared twice: {key}"),
        }
    }
}

impl Error for DefaultsError {}

#[cfg(test)]
mod tests {
    use super::{DefaultConfig, DefaultsError};
    use serde_json::json;

    #[test]
    fn accepts_namespaced_upper_case_keys() {
        let table = DefaultConfig::from_entries(
            "EXT",
            [("EXT_SETTING", json!("a")), ("EXT_ENABLED", json!(true))],
        )
        .expect("valid defaults");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("EXT_SETTING"), Some(&json!("a")));
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["EXT_ENABLED", "EXT_SETTING"]);
    }

    #[test]
    fn rejects_lower_case_keys() {
        let err = DefaultConfig::new("EXT")
            .expect("namespace")
            .with("ext_setting", "a")
            .expect_err("lower-case key must fail");
        assert_eq!(err, DefaultsError::InvalidKey("ext_setting".to_string()));
    }

    #[test]
    fn rejects_keys_outside_namespace() {
        let err = DefaultConfig::new("EXT")
            .expect("namespace")
            .with("OTHER_SETTING", "a")
            .expect_err("foreign key must fail");
        assert!(matches!(err, DefaultsError::OutsideNamespace { .. }));

        let err = DefaultConfig::new("EXT")
            .expect("namespace")
            .with("EXTRA_SETTING", "a")
            .expect_err("prefix without separator must fail");
        assert!(matches!(err, DefaultsError::OutsideNamespace { .. }));

        let err = DefaultConfig::new("EXT")
            .expect("namespace")
            .with("EXT_", "a")
            .expect_err("bare prefix must fail");
        assert!(matches!(err, DefaultsError::OutsideNamespace { .. }));
    }

    #[test]
    fn rejects_duplicate_keys_and_bad_namespace() {
        let err = DefaultConfig::from_entries("EXT", [("EXT_A", "1"), ("EXT_A", "2")])
            .expect_err("duplicate must fail");
        assert_eq!(err, DefaultsError::DuplicateKey("EXT_A".to_string()));

        let err = DefaultConfig::new("ext").expect_err("lower-case namespace must fail");
        assert_eq!(err, DefaultsError::InvalidNamespace("ext".to_string()));
    }
}

//! Layered extension configuration.
//!
//! # Responsibility
//! - Declare namespaced defaults an extension ships with.
//! - Read the user override file from the host data directory.
//! - Merge both layers and publish the result into the host store.
//! - Hold the live snapshot that handlers read and updates replace.
//!
//! # Invariants
//! - A merged map contains exactly the default keys.
//! - A non-empty override wins; `false` and `0` count as non-empty.
//! - Updates are validated in full before a new snapshot is swapped in.

use serde_json::Value;
use std::collections::BTreeMap;

pub mod defaults;
pub mod merger;
pub mod override_file;
pub mod snapshot;

pub use defaults::{DefaultConfig, DefaultsError};
pub use merger::{load, merge, ConfigLoadError, ConfigResult, MergedConfig};
pub use override_file::{
    read_override_file, MissingOverride, OverrideSource, DEFAULT_READ_TIMEOUT,
    OVERRIDE_FILE_NAME,
};
pub use snapshot::{ConfigSnapshot, ConfigUpdateError};

/// One configuration value (JSON-compatible).
pub type ConfigValue = Value;

/// Ordered key/value configuration map.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Returns whether a value counts as absent for override precedence.
///
/// Only `null`, `""`, `[]` and `{}` are empty; booleans and numbers never are.
pub fn is_empty_value(value: &ConfigValue) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(entries) => entries.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_empty_value;
    use serde_json::json;

    #[test]
    fn falsy_scalars_are_not_empty() {
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!("0")));
    }

    #[test]
    fn null_and_empty_containers_are_empty() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
    }
}

//! Extension manifest declaration and validation.
//!
//! The manifest is the static identity an extension ships with. Route
//! prefixes and configuration namespaces are derived from it, so two
//! extensions with distinct ids never share either.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Url namespace reserved for extension routes.
pub const PLUGIN_ROUTE_ROOT: &str = "/api/plugins";

/// Declarative extension manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionManifest {
    /// Stable extension identifier, e.g. `ots_plugin_template`.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    /// One-line description shown in host listings.
    pub summary: String,
    /// Package namespace the extension code lives under (crate name).
    pub package: String,
    /// Upper-case prefix every configuration key must carry.
    pub config_namespace: String,
}

impl ExtensionManifest {
    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        if self.id.trim().is_empty() {
            return Err(ManifestValidationError::EmptyId);
        }
        if !is_valid_extension_id(self.id.trim()) {
            return Err(ManifestValidationError::InvalidId(self.id.clone()));
        }

        if self.name.trim().is_empty() {
            return Err(ManifestValidationError::EmptyName);
        }

        if self.version.trim().is_empty() {
            return Err(ManifestValidationError::EmptyVersion);
        }
        if !is_semver_triplet(self.version.trim()) {
            return Err(ManifestValidationError::InvalidVersion(
                self.version.clone(),
            ));
        }

        if !is_valid_package(self.package.trim()) {
            return Err(ManifestValidationError::InvalidPackage(
                self.package.clone(),
            ));
        }

        if !is_valid_config_namespace(&self.config_namespace) {
            return Err(ManifestValidationError::InvalidConfigNamespace(
                self.config_namespace.clone(),
            ));
        }
        Ok(())
    }

    /// Private url prefix, `/api/plugins/<id>`.
    pub fn url_prefix(&self) -> String {
        format!("{PLUGIN_ROUTE_ROOT}/{}", self.id.trim())
    }
}

fn is_valid_extension_id(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

fn is_valid_package(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn is_valid_config_namespace(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    !value.ends_with('_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Manifest validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    EmptyId,
    InvalidId(String),
    EmptyName,
    EmptyVersion,
    InvalidVersion(String),
    InvalidPackage(String),
    InvalidConfigNamespace(String),
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "manifest id must not be empty"),
            Self::InvalidId(value) => write!(f, "manifest id is invalid: {value}"),
            Self::EmptyName => write!(f, "manifest name must not be empty"),
            Self::EmptyVersion => write!(f, "manifest version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::InvalidPackage(value) => {
                write!(f, "manifest package namespace is invalid: {value}")
            }
            Self::InvalidConfigNamespace(value) => write!(
                f,
                "manifest config namespace is invalid: {value} (expected UPPER_SNAKE without trailing underscore)"
            ),
        }
    }
}

impl Error for ManifestValidationError {}

#[cfg(test)]
mod tests {
    use super::{ExtensionManifest, ManifestValidationError};

    fn valid_manifest() -> ExtensionManifest {
        ExtensionManifest {
            id: "ots_plugin_template".to_string(),
            name: "OTS Plugin Template".to_string(),
            version: "0.1.0".to_string(),
            summary: "Template".to_string(),
            package: "plugin_template_core".to_string(),
            config_namespace: "OTS_PLUGIN_TEMPLATE".to_string(),
        }
    }

    #[test]
    fn validates_baseline_manifest() {
        assert!(valid_manifest().validate().is_ok());
    }

    #[test]
    fn derives_url_prefix() {
        let manifest = valid_manifest();
        assert_eq!(manifest.url_prefix(), "/api/plugins/ots_plugin_template");
    }

    #[test]
    fn rejects_invalid_id_format() {
        let mut manifest = valid_manifest();
        manifest.id = "Plugin Template".to_string();
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidId(_)));

        manifest.id = "plugins/../admin".to_string();
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidId(_)));
    }

    #[test]
    fn rejects_invalid_version_format() {
        let mut manifest = valid_manifest();
        manifest.version = "v1".to_string();
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ManifestValidationError::InvalidVersion(_)));
    }

    #[test]
    fn rejects_lowercase_or_trailing_underscore_namespace() {
        let mut manifest = valid_manifest();
        manifest.config_namespace = "ots_plugin".to_string();
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::InvalidConfigNamespace(_)
        ));

        manifest.config_namespace = "OTS_PLUGIN_".to_string();
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::InvalidConfigNamespace(_)
        ));
    }

    #[test]
    fn rejects_package_with_path_separator() {
        let mut manifest = valid_manifest();
        manifest.package = "plugin_template_core::routes".to_string();
        assert!(matches!(
            manifest.validate().unwrap_err(),
            ManifestValidationError::InvalidPackage(_)
        ));
    }
}

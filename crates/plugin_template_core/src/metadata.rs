//! Distribution metadata resolution.
//!
//! # Responsibility
//! - Map a module identity (`module_path!()` form) onto the installed
//!   distribution that owns it.
//! - Package that distribution's descriptive metadata as a descriptor.
//!
//! # Invariants
//! - Resolution is read-only; a failed lookup leaves no trace.
//! - Namespace matching is per path segment: `foo` owns `foo::bar`, not
//!   `foobar::baz`.

use crate::extension::manifest::ExtensionManifest;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Metadata key for the distribution name.
pub const META_NAME: &str = "name";
/// Metadata key for the distribution version.
pub const META_VERSION: &str = "version";
/// Metadata key for the one-line description.
pub const META_SUMMARY: &str = "summary";
/// Metadata key for the author list.
pub const META_AUTHOR: &str = "author";
/// Metadata key for the license expression.
pub const META_LICENSE: &str = "license";
/// Metadata key for the project homepage.
pub const META_HOME_PAGE: &str = "home_page";
/// Metadata key for the source repository.
pub const META_PROJECT_URL: &str = "project_url";

/// One installed distribution visible to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Code namespace the distribution provides (crate name).
    pub namespace: String,
    /// Distribution identifier (package name).
    pub distribution_id: String,
    pub metadata: BTreeMap<String, String>,
}

/// Source of installed distributions.
pub trait DistributionIndex: Send + Sync {
    fn distributions(&self) -> Vec<Distribution>;
}

/// Fixed list of distributions, typically compiled in.
#[derive(Debug, Clone, Default)]
pub struct StaticDistributionIndex {
    distributions: Vec<Distribution>,
}

impl StaticDistributionIndex {
    pub fn new(distributions: Vec<Distribution>) -> Self {
        Self { distributions }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Index containing only the package this crate was built from,
    /// providing the manifest's `package` namespace.
    pub fn compiled(manifest: &ExtensionManifest) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_NAME.to_string(), env!("CARGO_PKG_NAME").to_string());
        metadata.insert(META_VERSION.to_string(), env!("CARGO_PKG_VERSION").to_string());
        metadata.insert(META_SUMMARY.to_string(), manifest.summary.clone());
        insert_non_empty(&mut metadata, META_AUTHOR, env!("CARGO_PKG_AUTHORS").replace(':', ", "));
        insert_non_empty(&mut metadata, META_LICENSE, env!("CARGO_PKG_LICENSE").to_string());
        insert_non_empty(&mut metadata, META_HOME_PAGE, env!("CARGO_PKG_HOMEPAGE").to_string());
        insert_non_empty(
            &mut metadata,
            META_PROJECT_URL,
            env!("CARGO_PKG_REPOSITORY").to_string(),
        );

        Self::new(vec![Distribution {
            namespace: manifest.package.clone(),
            distribution_id: env!("CARGO_PKG_NAME").to_string(),
            metadata,
        }])
    }
}

impl DistributionIndex for StaticDistributionIndex {
    fn distributions(&self) -> Vec<Distribution> {
        self.distributions.clone()
    }
}

fn insert_non_empty(metadata: &mut BTreeMap<String, String>, key: &str, value: String) {
    if !value.trim().is_empty() {
        metadata.insert(key.to_string(), value);
    }
}

/// Runtime identity of one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    pub name: String,
    pub distribution_id: String,
    pub metadata: BTreeMap<String, String>,
    pub url_prefix: String,
}

impl ExtensionDescriptor {
    /// Replaces metadata with a fresher copy; identity fields stay fixed.
    pub fn refresh_metadata(&mut self, metadata: BTreeMap<String, String>) {
        self.metadata = metadata;
    }

    /// Body of the extension info route: every metadata key at the top
    /// level plus `distribution_id` and `url_prefix`.
    pub fn info_document(&self) -> Value {
        let mut document: Map<String, Value> = self
            .metadata
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        document.insert(
            "distribution_id".to_string(),
            Value::String(self.distribution_id.clone()),
        );
        document.insert(
            "url_prefix".to_string(),
            Value::String(self.url_prefix.clone()),
        );
        Value::Object(document)
    }
}

/// Resolves the descriptor for `module_identity` from `index`.
///
/// The first distribution whose namespace owns the identity wins.
pub fn resolve(
    manifest: &ExtensionManifest,
    module_identity: &str,
    index: &dyn DistributionIndex,
) -> Result<ExtensionDescriptor, MetadataNotFound> {
    index
        .distributions()
        .into_iter()
        .find(|distribution| namespace_owns(&distribution.namespace, module_identity))
        .map(|distribution| ExtensionDescriptor {
            name: manifest.name.clone(),
            distribution_id: distribution.distribution_id,
            metadata: distribution.metadata,
            url_prefix: manifest.url_prefix(),
        })
        .ok_or_else(|| MetadataNotFound {
            module_identity: module_identity.to_string(),
        })
}

fn namespace_owns(namespace: &str, module_identity: &str) -> bool {
    if namespace.is_empty() {
        return false;
    }
    match module_identity.strip_prefix(namespace) {
        Some(rest) => rest.is_empty() || rest.starts_with("::"),
        None => false,
    }
}

/// No installed distribution owns the module identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataNotFound {
    pub module_identity: String,
}

impl Display for MetadataNotFound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no installed distribution provides module `{}`",
            self.module_identity
        )
    }
}

impl Error for MetadataNotFound {}

#[cfg(test)]
mod tests {
    use super::{
        namespace_owns, resolve, Distribution, MetadataNotFound, StaticDistributionIndex,
        META_NAME, META_SUMMARY, META_VERSION,
    };
    use crate::extension::manifest::ExtensionManifest;
    use std::collections::BTreeMap;

    fn manifest() -> ExtensionManifest {
        ExtensionManifest {
            id: "sample".to_string(),
            name: "Sample".to_string(),
            version: "1.2.3".to_string(),
            summary: "Sample extension".to_string(),
            package: "sample_ext".to_string(),
            config_namespace: "SAMPLE".to_string(),
        }
    }

    fn distribution(namespace: &str, id: &str) -> Distribution {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_NAME.to_string(), id.to_string());
        metadata.insert(META_VERSION.to_string(), "1.2.3".to_string());
        Distribution {
            namespace: namespace.to_string(),
            distribution_id: id.to_string(),
            metadata,
        }
    }

    #[test]
    fn namespace_matching_respects_segments() {
        assert!(namespace_owns("sample_ext", "sample_ext"));
        assert!(namespace_owns("sample_ext", "sample_ext::routes"));
        assert!(!namespace_owns("sample", "sample_ext::routes"));
        assert!(!namespace_owns("", "sample_ext"));
    }

    #[test]
    fn resolves_first_owning_distribution() {
        let index = StaticDistributionIndex::new(vec![
            distribution("other", "other-dist"),
            distribution("sample_ext", "sample-ext"),
            distribution("sample_ext", "shadowed"),
        ]);
        let descriptor =
            resolve(&manifest(), "sample_ext::lifecycle", &index).expect("resolution");
        assert_eq!(descriptor.distribution_id, "sample-ext");
        assert_eq!(descriptor.name, "Sample");
        assert_eq!(descriptor.url_prefix, "/api/plugins/sample");
        assert_eq!(descriptor.metadata[META_NAME], "sample-ext");
    }

    #[test]
    fn reports_missing_distribution() {
        let err = resolve(&manifest(), "sample_ext", &StaticDistributionIndex::empty())
            .expect_err("empty index must fail");
        assert_eq!(
            err,
            MetadataNotFound {
                module_identity: "sample_ext".to_string()
            }
        );
    }

    #[test]
    fn compiled_index_provides_manifest_package() {
        let index = StaticDistributionIndex::compiled(&manifest());
        let descriptor =
            resolve(&manifest(), "sample_ext::routes", &index).expect("manifest package");
        assert_eq!(descriptor.distribution_id, env!("CARGO_PKG_NAME"));
        assert_eq!(descriptor.metadata[META_VERSION], env!("CARGO_PKG_VERSION"));
        assert_eq!(descriptor.metadata[META_SUMMARY], "Sample extension");

        assert!(resolve(&manifest(), module_path!(), &index).is_err());
    }

    #[test]
    fn info_document_lifts_metadata_to_top_level() {
        let index = StaticDistributionIndex::new(vec![distribution("sample_ext", "sample-ext")]);
        let document = resolve(&manifest(), "sample_ext", &index)
            .expect("resolution")
            .info_document();
        assert_eq!(document["name"], "sample-ext");
        assert_eq!(document["version"], "1.2.3");
        assert_eq!(document["distribution_id"], "sample-ext");
        assert_eq!(document["url_prefix"], "/api/plugins/sample");
        assert!(document.get("metadata").is_none());
    }
}

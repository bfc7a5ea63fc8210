//! Template for extensions loaded into a host application.
//!
//! An extension ships namespaced defaults, layers a user override file on
//! top of them, resolves its distribution metadata, and contributes routes
//! plus a bundled UI under `/api/plugins/<id>`.

pub mod assets;
pub mod config;
pub mod extension;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod metadata;
pub mod routes;
pub mod template;

pub use assets::{AssetError, AssetResponse, AssetServer};
pub use config::{
    ConfigLoadError, ConfigMap, ConfigSnapshot, ConfigValue, DefaultConfig, MergedConfig,
    MissingOverride, OverrideSource,
};
pub use extension::access::{AccessControl, AccessDecision, Principal, Role, RoleRequirement};
pub use extension::manifest::ExtensionManifest;
pub use extension::registry::{ActivationReport, ExtensionRegistry, RegistryError};
pub use host::{
    ConfigStore, FacadeLogSink, HostContext, InMemoryConfigStore, LogSink, MemoryLogSink,
};
pub use lifecycle::{
    ActivationFault, ExtensionInfo, ExtensionSetup, HostExtension, LifecycleState,
};
pub use logging::{init_logging, LoggingError, LOG_TARGET};
pub use metadata::{DistributionIndex, ExtensionDescriptor, MetadataNotFound};
pub use routes::{ExtensionRequest, ExtensionResponse, HttpMethod, RequestFault, RouteTable};
pub use template::PluginTemplate;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

//! The OTS plugin template: a host extension wired from the building blocks.
//!
//! # Responsibility
//! - Own the manifest, defaults, route table, asset server and live config
//!   snapshot of one extension instance.
//! - Drive activation through config load, metadata resolution and setup.
//! - Serve the info, UI, asset and configuration endpoints.
//!
//! # Invariants
//! - Requests are served only while `Active`.
//! - A failed activation leaves the instance `Failed` with defaults in the
//!   snapshot and no descriptor.
//! - `POST /config` publishes to the host store in snapshot swap order.

use crate::assets::{AssetError, AssetResponse, AssetServer};
use crate::config::{
    self, ConfigMap, ConfigSnapshot, DefaultConfig, DefaultsError, MissingOverride,
    OverrideSource, DEFAULT_READ_TIMEOUT,
};
use crate::extension::access::RoleRequirement;
use crate::extension::manifest::{ExtensionManifest, ManifestValidationError};
use crate::host::HostContext;
use crate::lifecycle::{
    run_guarded, ActivationFault, ActivationStage, ExtensionInfo, ExtensionSetup, FaultCause,
    HostExtension, LifecycleState, NoopSetup,
};
use crate::logging::panic_message;
use crate::metadata::{self, DistributionIndex, ExtensionDescriptor, StaticDistributionIndex};
use crate::routes::{
    ExtensionRequest, ExtensionResponse, HttpMethod, RequestFault, RouteError, RouteParams,
    RouteTable,
};
use log::Level;
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Extension id; also the last segment of the url prefix.
pub const TEMPLATE_ID: &str = "ots_plugin_template";
/// Display name.
pub const TEMPLATE_NAME: &str = "OTS Plugin Template";
/// Configuration namespace every template key starts with.
pub const TEMPLATE_CONFIG_NAMESPACE: &str = "OTS_PLUGIN_TEMPLATE";
/// Sample setting shipped in the defaults.
pub const SOME_SETTING_KEY: &str = "OTS_PLUGIN_TEMPLATE_SOME_SETTING";
/// Default value of [`SOME_SETTING_KEY`].
pub const SOME_SETTING_DEFAULT: &str = "my_setting_value";

type HandlerResult = Result<ExtensionResponse, RequestFault>;

/// Manifest compiled from this crate's package metadata.
pub fn template_manifest() -> ExtensionManifest {
    ExtensionManifest {
        id: TEMPLATE_ID.to_string(),
        name: TEMPLATE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        summary: env!("CARGO_PKG_DESCRIPTION").to_string(),
        package: env!("CARGO_CRATE_NAME").to_string(),
        config_namespace: TEMPLATE_CONFIG_NAMESPACE.to_string(),
    }
}

/// Defaults the template ships with.
pub fn template_defaults() -> Result<DefaultConfig, DefaultsError> {
    DefaultConfig::new(TEMPLATE_CONFIG_NAMESPACE)?.with(SOME_SETTING_KEY, SOME_SETTING_DEFAULT)
}

/// Builds the template's route table under `prefix`.
pub fn register_routes(prefix: &str) -> Result<RouteTable<PluginTemplate>, RouteError> {
    let admin = Some(RoleRequirement::admin());
    RouteTable::new(prefix)
        .route(HttpMethod::Get, "/", None, get_info)?
        .route(HttpMethod::Get, "/ui", admin, get_ui)?
        .route(HttpMethod::Get, "/assets/<file>", admin, get_asset)?
        .route(HttpMethod::Get, "/config", admin, get_config)?
        .route(HttpMethod::Post, "/config", admin, post_config)
}

#[derive(Debug)]
struct Runtime {
    state: LifecycleState,
    host: Option<HostContext>,
    descriptor: Option<ExtensionDescriptor>,
    activation_id: Option<Uuid>,
}

/// One loaded template instance.
pub struct PluginTemplate {
    manifest: ExtensionManifest,
    module_identity: String,
    index: Arc<dyn DistributionIndex>,
    setup: Arc<dyn ExtensionSetup>,
    assets: AssetServer,
    missing_override: MissingOverride,
    read_timeout: Duration,
    routes: RouteTable<PluginTemplate>,
    config: ConfigSnapshot,
    runtime: RwLock<Runtime>,
}

impl PluginTemplate {
    /// Template with compiled metadata, bundled UI and no extra setup.
    pub fn new() -> Result<Self, BuildError> {
        Self::builder().build()
    }

    pub fn builder() -> PluginTemplateBuilder {
        PluginTemplateBuilder::default()
    }

    /// Live configuration snapshot.
    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    /// Descriptor resolved by the last successful activation.
    pub fn descriptor(&self) -> Option<ExtensionDescriptor> {
        self.read_runtime().descriptor.clone()
    }

    pub fn routes(&self) -> &RouteTable<PluginTemplate> {
        &self.routes
    }

    fn read_runtime(&self) -> std::sync::RwLockReadGuard<'_, Runtime> {
        self.runtime.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_runtime(&self) -> std::sync::RwLockWriteGuard<'_, Runtime> {
        self.runtime.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn host(&self) -> Option<HostContext> {
        self.read_runtime().host.clone()
    }

    fn resolve_descriptor(&self) -> Result<ExtensionDescriptor, metadata::MetadataNotFound> {
        metadata::resolve(&self.manifest, &self.module_identity, self.index.as_ref())
    }

    fn run_activation(
        &self,
        host: &HostContext,
    ) -> Result<ExtensionDescriptor, (ActivationStage, FaultCause)> {
        let source = OverrideSource::in_data_dir(host.data_dir())
            .with_missing(self.missing_override)
            .with_timeout(self.read_timeout);
        let merged = run_guarded(ActivationStage::Config, || {
            config::load(self.config.defaults(), &source, host.config_store())
                .map_err(FaultCause::from)
        })?;
        self.config.replace(merged);

        let descriptor = run_guarded(ActivationStage::Metadata, || {
            self.resolve_descriptor().map_err(FaultCause::from)
        })?;

        let current = self.config.current();
        run_guarded(ActivationStage::Setup, || {
            self.setup
                .setup(host, current.as_ref())
                .map_err(FaultCause::Setup)
        })?;
        Ok(descriptor)
    }

    fn report_fault(&self, host: &HostContext, fault: &ActivationFault) {
        host.log(
            Level::Error,
            &format!(
                "event=activate module=lifecycle status=error extension={} activation_id={} stage={} error={}",
                fault.extension_id,
                fault.activation_id,
                fault.stage.as_str(),
                fault.error_chain()
            ),
        );
        host.log(
            Level::Error,
            &format!(
                "event=activate module=lifecycle status=backtrace extension={} activation_id={}\n{}",
                fault.extension_id,
                fault.activation_id,
                fault.backtrace()
            ),
        );
    }

    fn teardown_setup(&self, host: Option<&HostContext>) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.setup.teardown())) {
            let message = format!(
                "event=stop module=lifecycle status=error extension={} stage=teardown payload={}",
                self.manifest.id,
                panic_message(payload.as_ref())
            );
            match host {
                Some(host) => host.log(Level::Error, &message),
                None => log::error!("{message}"),
            }
        }
    }
}

impl HostExtension for PluginTemplate {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn state(&self) -> LifecycleState {
        self.read_runtime().state
    }

    fn activate(&self, host: HostContext) -> Result<(), ActivationFault> {
        let activation_id = Uuid::new_v4();
        {
            let mut runtime = self.write_runtime();
            if !runtime.state.admits_activation() {
                let fault = ActivationFault::new(
                    &self.manifest.id,
                    activation_id,
                    ActivationStage::Admission,
                    FaultCause::AlreadyActive(runtime.state),
                );
                host.log(
                    Level::Warn,
                    &format!(
                        "event=activate module=lifecycle status=rejected extension={} activation_id={} state={}",
                        self.manifest.id, activation_id, runtime.state
                    ),
                );
                return Err(fault);
            }
            runtime.state = LifecycleState::Activating;
            runtime.host = Some(host.clone());
            runtime.descriptor = None;
            runtime.activation_id = Some(activation_id);
        }
        host.log(
            Level::Info,
            &format!(
                "event=activate module=lifecycle status=start extension={} activation_id={}",
                self.manifest.id, activation_id
            ),
        );

        let outcome = self.run_activation(&host);

        let mut runtime = self.write_runtime();
        if runtime.activation_id != Some(activation_id) {
            // A stop landed mid-activation; a newer activation owns the
            // snapshot if it already started.
            if runtime.activation_id.is_none() {
                self.config.reset();
            }
            drop(runtime);
            if outcome.is_ok() {
                self.teardown_setup(Some(&host));
            }
            let fault = ActivationFault::new(
                &self.manifest.id,
                activation_id,
                ActivationStage::Commit,
                FaultCause::Interrupted,
            );
            self.report_fault(&host, &fault);
            return Err(fault);
        }

        match outcome {
            Ok(descriptor) => {
                runtime.state = LifecycleState::Active;
                runtime.descriptor = Some(descriptor);
                drop(runtime);
                host.log(
                    Level::Info,
                    &format!(
                        "event=activate module=lifecycle status=ok extension={} activation_id={} prefix={}",
                        self.manifest.id,
                        activation_id,
                        self.routes.prefix()
                    ),
                );
                Ok(())
            }
            Err((stage, cause)) => {
                runtime.state = LifecycleState::Failed;
                drop(runtime);
                self.config.reset();
                let fault = ActivationFault::new(&self.manifest.id, activation_id, stage, cause);
                self.report_fault(&host, &fault);
                Err(fault)
            }
        }
    }

    fn stop(&self) {
        let (previous, host) = {
            let mut runtime = self.write_runtime();
            let previous = runtime.state;
            if previous == LifecycleState::Unloaded {
                return;
            }
            runtime.state = LifecycleState::Stopped;
            runtime.activation_id = None;
            (previous, runtime.host.clone())
        };

        if previous == LifecycleState::Active {
            self.teardown_setup(host.as_ref());
        }
        self.write_runtime().descriptor = None;
        self.config.reset();
        let released = self.write_runtime().host.take();

        let message = format!(
            "event=stop module=lifecycle status=ok extension={} previous={}",
            self.manifest.id, previous
        );
        match released.or(host) {
            Some(host) => host.log(Level::Info, &message),
            None => log::info!("{message}"),
        }
    }

    fn info(&self) -> ExtensionInfo {
        let (name, distribution_id) = match self.resolve_descriptor() {
            Ok(resolved) => {
                if let Some(current) = self.write_runtime().descriptor.as_mut() {
                    current.refresh_metadata(resolved.metadata.clone());
                }
                (resolved.name, resolved.distribution_id)
            }
            Err(_) => (self.manifest.name.clone(), String::new()),
        };
        ExtensionInfo {
            name,
            distribution_id,
            url_prefix: self.routes.prefix().to_string(),
            state: self.state(),
            routes: self.routes.entries(),
        }
    }

    fn handle(&self, request: &ExtensionRequest) -> ExtensionResponse {
        let host = {
            let runtime = self.read_runtime();
            match (&runtime.state, &runtime.host) {
                (LifecycleState::Active, Some(host)) => host.clone(),
                _ => return ExtensionResponse::failure(503, "Plugin not active"),
            }
        };
        self.routes
            .dispatch(self, host.access_control(), host.log_sink(), request)
    }
}

impl std::fmt::Debug for PluginTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginTemplate")
            .field("manifest", &self.manifest)
            .field("module_identity", &self.module_identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Options for [`PluginTemplate`].
pub struct PluginTemplateBuilder {
    manifest: ExtensionManifest,
    defaults: Option<DefaultConfig>,
    module_identity: Option<String>,
    index: Option<Arc<dyn DistributionIndex>>,
    setup: Arc<dyn ExtensionSetup>,
    assets: AssetServer,
    missing_override: MissingOverride,
    read_timeout: Duration,
}

impl Default for PluginTemplateBuilder {
    fn default() -> Self {
        Self {
            manifest: template_manifest(),
            defaults: None,
            module_identity: None,
            index: None,
            setup: Arc::new(NoopSetup),
            assets: AssetServer::bundled(),
            missing_override: MissingOverride::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl PluginTemplateBuilder {
    pub fn manifest(mut self, manifest: ExtensionManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn defaults(mut self, defaults: DefaultConfig) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Identity matched against distribution namespaces, in
    /// `module_path!()` form. Defaults to the manifest's `package`.
    pub fn module_identity(mut self, module_identity: impl Into<String>) -> Self {
        self.module_identity = Some(module_identity.into());
        self
    }

    pub fn distribution_index(mut self, index: Arc<dyn DistributionIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn setup(mut self, setup: Arc<dyn ExtensionSetup>) -> Self {
        self.setup = setup;
        self
    }

    pub fn assets(mut self, assets: AssetServer) -> Self {
        self.assets = assets;
        self
    }

    pub fn missing_override(mut self, missing: MissingOverride) -> Self {
        self.missing_override = missing;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<PluginTemplate, BuildError> {
        self.manifest.validate()?;
        let defaults = match self.defaults {
            Some(defaults) => defaults,
            None => template_defaults()?,
        };
        if defaults.namespace() != self.manifest.config_namespace {
            return Err(BuildError::NamespaceMismatch {
                manifest: self.manifest.config_namespace,
                defaults: defaults.namespace().to_string(),
            });
        }
        let routes = register_routes(&self.manifest.url_prefix())?;
        let index: Arc<dyn DistributionIndex> = match self.index {
            Some(index) => index,
            None => Arc::new(StaticDistributionIndex::compiled(&self.manifest)),
        };

        let module_identity = self
            .module_identity
            .unwrap_or_else(|| self.manifest.package.clone());

        Ok(PluginTemplate {
            manifest: self.manifest,
            module_identity,
            index,
            setup: self.setup,
            assets: self.assets,
            missing_override: self.missing_override,
            read_timeout: self.read_timeout,
            routes,
            config: ConfigSnapshot::new(defaults),
            runtime: RwLock::new(Runtime {
                state: LifecycleState::Unloaded,
                host: None,
                descriptor: None,
                activation_id: None,
            }),
        })
    }
}

/// Template construction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    Manifest(ManifestValidationError),
    Defaults(DefaultsError),
    NamespaceMismatch { manifest: String, defaults: String },
    Routes(RouteError),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manifest(err) => write!(f, "invalid extension manifest: {err}"),
            Self::Defaults(err) => write!(f, "invalid default configuration: {err}"),
            Self::NamespaceMismatch { manifest, defaults } => write!(
                f,
                "defaults namespace `{defaults}` differs from manifest namespace `{manifest}`"
            ),
            Self::Routes(err) => write!(f, "route registration failed: {err}"),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Manifest(err) => Some(err),
            Self::Defaults(err) => Some(err),
            Self::Routes(err) => Some(err),
            Self::NamespaceMismatch { .. } => None,
        }
    }
}

impl From<ManifestValidationError> for BuildError {
    fn from(value: ManifestValidationError) -> Self {
        Self::Manifest(value)
    }
}

impl From<DefaultsError> for BuildError {
    fn from(value: DefaultsError) -> Self {
        Self::Defaults(value)
    }
}

impl From<RouteError> for BuildError {
    fn from(value: RouteError) -> Self {
        Self::Routes(value)
    }
}

fn get_info(plugin: &PluginTemplate, _: &ExtensionRequest, _: &RouteParams) -> HandlerResult {
    let descriptor = plugin
        .resolve_descriptor()
        .map_err(|_| RequestFault::NotFound("Plugin not found".to_string()))?;
    Ok(ExtensionResponse::json(200, &descriptor.info_document()))
}

fn get_ui(plugin: &PluginTemplate, _: &ExtensionRequest, _: &RouteParams) -> HandlerResult {
    plugin
        .assets
        .entry_document()
        .map(asset_response)
        .map_err(asset_fault)
}

fn get_asset(
    plugin: &PluginTemplate,
    _: &ExtensionRequest,
    params: &RouteParams,
) -> HandlerResult {
    let file = params.get("file").unwrap_or_default();
    plugin
        .assets
        .serve(file)
        .map(asset_response)
        .map_err(asset_fault)
}

fn get_config(plugin: &PluginTemplate, _: &ExtensionRequest, _: &RouteParams) -> HandlerResult {
    let current = plugin.config.current();
    Ok(ExtensionResponse::json(
        200,
        &json!({ "success": true, "config": current.values() }),
    ))
}

fn post_config(
    plugin: &PluginTemplate,
    request: &ExtensionRequest,
    _: &RouteParams,
) -> HandlerResult {
    let update: ConfigMap = match request.json_body()? {
        Value::Object(entries) => entries.into_iter().collect(),
        _ => {
            return Err(RequestFault::BadRequest(
                "request body must be a JSON object".to_string(),
            ))
        }
    };
    let host = plugin
        .host()
        .ok_or_else(|| RequestFault::Internal("host context unavailable".to_string()))?;

    let next = plugin
        .config
        .apply_update(&update, |merged| {
            host.config_store().publish(merged.values())
        })
        .map_err(|err| RequestFault::BadRequest(err.to_string()))?;

    host.log(
        Level::Info,
        &format!(
            "event=config_update module=template status=ok extension={} keys={}",
            plugin.manifest.id,
            update.keys().cloned().collect::<Vec<_>>().join(",")
        ),
    );
    Ok(ExtensionResponse::json(
        200,
        &json!({ "success": true, "config": next.values() }),
    ))
}

fn asset_response(asset: AssetResponse) -> ExtensionResponse {
    ExtensionResponse::bytes(200, asset.content_type, asset.bytes)
}

fn asset_fault(err: AssetError) -> RequestFault {
    match err {
        AssetError::EntryDocumentMissing(_) => RequestFault::NotFound("UI not found".to_string()),
        AssetError::Unreadable { .. } => RequestFault::Internal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        register_routes, template_defaults, template_manifest, BuildError, PluginTemplate,
        SOME_SETTING_DEFAULT, SOME_SETTING_KEY,
    };
    use crate::config::DefaultConfig;
    use crate::extension::access::RoleRequirement;
    use crate::host::HostContext;
    use crate::lifecycle::{HostExtension, LifecycleState};
    use crate::routes::{ExtensionRequest, HttpMethod};
    use serde_json::json;

    #[test]
    fn manifest_and_defaults_are_consistent() {
        let manifest = template_manifest();
        manifest.validate().expect("valid manifest");
        assert_eq!(manifest.url_prefix(), "/api/plugins/ots_plugin_template");

        let defaults = template_defaults().expect("valid defaults");
        assert_eq!(defaults.namespace(), manifest.config_namespace);
        assert_eq!(defaults.get(SOME_SETTING_KEY), Some(&json!(SOME_SETTING_DEFAULT)));
    }

    #[test]
    fn registers_expected_routes() {
        let table = register_routes("/api/plugins/ots_plugin_template").expect("routes");
        let entries = table.entries();
        let paths: Vec<&str> = entries.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/ui", "/assets/<file>", "/config"]);
        assert_eq!(entries[0].access, None);
        assert!(entries[1..]
            .iter()
            .all(|entry| entry.access == Some(RoleRequirement::admin())));
        assert_eq!(entries[3].methods.len(), 2);
    }

    #[test]
    fn rejects_defaults_from_another_namespace() {
        let defaults = DefaultConfig::new("OTHER").expect("namespace");
        let err = PluginTemplate::builder()
            .defaults(defaults)
            .build()
            .expect_err("namespace mismatch must fail");
        assert!(matches!(err, BuildError::NamespaceMismatch { .. }));
    }

    #[test]
    fn requests_before_activation_are_unavailable() {
        let plugin = PluginTemplate::new().expect("template");
        assert_eq!(plugin.state(), LifecycleState::Unloaded);
        let response = plugin.handle(&ExtensionRequest::new(
            HttpMethod::Get,
            "/api/plugins/ots_plugin_template",
        ));
        assert_eq!(response.status, 503);
    }

    #[test]
    fn stop_before_activate_is_a_no_op() {
        let plugin = PluginTemplate::new().expect("template");
        plugin.stop();
        assert_eq!(plugin.state(), LifecycleState::Unloaded);
    }

    #[test]
    fn activation_uses_defaults_without_override_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let plugin = PluginTemplate::new().expect("template");
        plugin
            .activate(HostContext::new(dir.path()))
            .expect("activation");
        assert_eq!(plugin.state(), LifecycleState::Active);
        assert_eq!(
            plugin.config().current().get(SOME_SETTING_KEY),
            Some(&json!(SOME_SETTING_DEFAULT))
        );
        assert!(plugin.descriptor().is_some());

        plugin.stop();
        assert_eq!(plugin.state(), LifecycleState::Stopped);
        assert!(plugin.descriptor().is_none());
    }
}

//! Host-side table of mounted extensions.

use crate::extension::manifest::ManifestValidationError;
use crate::host::HostContext;
use crate::lifecycle::{
    ActivationFault, ActivationStage, ExtensionInfo, FaultCause, HostExtension,
};
use crate::logging::panic_message;
use crate::routes::{ExtensionRequest, ExtensionResponse};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of activating one registered extension.
#[derive(Debug)]
pub struct ActivationReport {
    pub extension_id: String,
    pub outcome: Result<(), ActivationFault>,
}

/// Mounted extensions in registration order.
///
/// Ids are unique, so url prefixes (`/api/plugins/<id>`) are too.
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: Vec<(String, Arc<dyn HostExtension>)>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts one extension after manifest validation.
    pub fn register(&mut self, extension: Arc<dyn HostExtension>) -> Result<(), RegistryError> {
        let manifest = extension.manifest();
        manifest.validate().map_err(RegistryError::InvalidManifest)?;
        let id = manifest.id.clone();
        if self.get(&id).is_some() {
            return Err(RegistryError::DuplicateExtensionId(id));
        }
        log::info!(
            "event=extension_register module=registry status=ok extension={} prefix={}",
            id,
            manifest.url_prefix()
        );
        self.entries.push((id, extension));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, extension_id: &str) -> Option<&Arc<dyn HostExtension>> {
        self.entries
            .iter()
            .find(|(id, _)| id == extension_id)
            .map(|(_, extension)| extension)
    }

    /// Activates every extension against its own clone of `host`.
    ///
    /// One extension failing, or panicking past its own guards, does not
    /// keep the others from activating.
    pub fn activate_all(&self, host: &HostContext) -> Vec<ActivationReport> {
        self.entries
            .iter()
            .map(|(id, extension)| {
                let outcome = catch_unwind(AssertUnwindSafe(|| extension.activate(host.clone())))
                    .unwrap_or_else(|payload| {
                        Err(ActivationFault::new(
                            id,
                            Uuid::new_v4(),
                            ActivationStage::Unguarded,
                            FaultCause::Panic(panic_message(payload.as_ref())),
                        ))
                    });
                if let Err(fault) = &outcome {
                    log::error!(
                        "event=extension_activate module=registry status=error extension={} activation_id={} error={}",
                        id,
                        fault.activation_id,
                        fault.error_chain()
                    );
                }
                ActivationReport {
                    extension_id: id.clone(),
                    outcome,
                }
            })
            .collect()
    }

    /// Stops every extension, most recently registered first.
    pub fn stop_all(&self) {
        for (id, extension) in self.entries.iter().rev() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| extension.stop())) {
                log::error!(
                    "event=extension_stop module=registry status=panic extension={} payload={}",
                    id,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Routes `request` to the extension owning its path.
    ///
    /// Paths no extension owns get 404; a panic inside the owner gets 500
    /// and affects that request only.
    pub fn dispatch(&self, request: &ExtensionRequest) -> ExtensionResponse {
        let Some((id, extension)) = self
            .entries
            .iter()
            .find(|(_, extension)| owns_path(&extension.manifest().url_prefix(), &request.path))
        else {
            return ExtensionResponse::failure(404, "Not found");
        };

        match catch_unwind(AssertUnwindSafe(|| extension.handle(request))) {
            Ok(response) => response,
            Err(payload) => {
                log::error!(
                    "event=extension_dispatch module=registry status=panic extension={} path={} payload={}",
                    id,
                    request.path,
                    panic_message(payload.as_ref())
                );
                ExtensionResponse::failure(500, "Internal server error")
            }
        }
    }

    pub fn infos(&self) -> Vec<ExtensionInfo> {
        self.entries
            .iter()
            .map(|(_, extension)| extension.info())
            .collect()
    }
}

fn owns_path(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidManifest(ManifestValidationError),
    DuplicateExtensionId(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidManifest(err) => write!(f, "invalid extension manifest: {err}"),
            Self::DuplicateExtensionId(value) => {
                write!(f, "extension id already registered: {value}")
            }
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            Self::DuplicateExtensionId(_) => None,
        }
    }
}

//! Extension lifecycle contracts.
//!
//! # Responsibility
//! - Define the host-facing extension contract (`activate`, `stop`, `info`,
//!   request handling).
//! - Carry activation failures back to the host as values.
//!
//! # Invariants
//! - No error or panic raised while activating unwinds into the host.
//! - `activate` is admitted only from `Unloaded`, `Stopped` or `Failed`.
//! - `stop` is safe in every state and never reports a fault.

use crate::config::{ConfigLoadError, MergedConfig};
use crate::extension::manifest::ExtensionManifest;
use crate::host::HostContext;
use crate::logging::panic_message;
use crate::metadata::MetadataNotFound;
use crate::routes::{ExtensionRequest, ExtensionResponse, RouteEntry};
use serde::Serialize;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use uuid::Uuid;

/// Where an extension is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    Activating,
    Active,
    Stopped,
    /// Activation failed; the extension serves nothing until re-activated.
    Failed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Returns whether `activate` may start from this state.
    pub fn admits_activation(self) -> bool {
        matches!(self, Self::Unloaded | Self::Stopped | Self::Failed)
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation step that produced a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStage {
    Admission,
    Config,
    Metadata,
    Setup,
    Commit,
    /// Raised outside the extension's own stage guards.
    Unguarded,
}

impl ActivationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::Config => "config",
            Self::Metadata => "metadata",
            Self::Setup => "setup",
            Self::Commit => "commit",
            Self::Unguarded => "unguarded",
        }
    }
}

/// Error type extension-specific setup may return.
pub type SetupError = Box<dyn Error + Send + Sync>;

/// Underlying reason of an activation fault.
#[derive(Debug)]
pub enum FaultCause {
    /// `activate` called while already activating or active.
    AlreadyActive(LifecycleState),
    Config(ConfigLoadError),
    Metadata(MetadataNotFound),
    Setup(SetupError),
    Panic(String),
    /// `stop` ran before activation could commit.
    Interrupted,
}

impl Display for FaultCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyActive(state) => write!(f, "extension is already {state}"),
            Self::Config(_) => f.write_str("configuration load failed"),
            Self::Metadata(_) => f.write_str("metadata resolution failed"),
            Self::Setup(_) => f.write_str("extension setup failed"),
            Self::Panic(message) => write!(f, "panicked: {message}"),
            Self::Interrupted => f.write_str("stopped before activation completed"),
        }
    }
}

impl From<ConfigLoadError> for FaultCause {
    fn from(value: ConfigLoadError) -> Self {
        Self::Config(value)
    }
}

impl From<MetadataNotFound> for FaultCause {
    fn from(value: MetadataNotFound) -> Self {
        Self::Metadata(value)
    }
}

/// Failed activation, returned to the host instead of unwinding into it.
#[derive(Debug)]
pub struct ActivationFault {
    pub extension_id: String,
    pub activation_id: Uuid,
    pub stage: ActivationStage,
    pub cause: FaultCause,
    backtrace: Backtrace,
}

impl ActivationFault {
    pub fn new(
        extension_id: impl Into<String>,
        activation_id: Uuid,
        stage: ActivationStage,
        cause: FaultCause,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            activation_id,
            stage,
            cause,
            backtrace: Backtrace::force_capture(),
        }
    }

    /// Stack captured where the fault was recorded.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Display text of this fault followed by every `source()` below it,
    /// joined with `: `.
    pub fn error_chain(&self) -> String {
        let mut chain = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            chain.push_str(": ");
            chain.push_str(&err.to_string());
            source = err.source();
        }
        chain
    }
}

impl Display for ActivationFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "activation of `{}` failed at {} stage: {}",
            self.extension_id,
            self.stage.as_str(),
            self.cause
        )
    }
}

impl Error for ActivationFault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            FaultCause::Config(err) => Some(err),
            FaultCause::Metadata(err) => Some(err),
            FaultCause::Setup(err) => Some(err.as_ref()),
            FaultCause::AlreadyActive(_) | FaultCause::Panic(_) | FaultCause::Interrupted => None,
        }
    }
}

/// Extension-specific work run as the last activation step.
pub trait ExtensionSetup: Send + Sync {
    /// Runs once configuration is published and metadata resolved.
    fn setup(&self, host: &HostContext, config: &MergedConfig) -> Result<(), SetupError>;

    /// Undoes `setup`; runs first during `stop` of an active extension.
    fn teardown(&self) {}
}

/// Setup that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSetup;

impl ExtensionSetup for NoopSetup {
    fn setup(&self, _host: &HostContext, _config: &MergedConfig) -> Result<(), SetupError> {
        Ok(())
    }
}

/// Summary the host shows for one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionInfo {
    pub name: String,
    /// Empty when no installed distribution owns the extension.
    pub distribution_id: String,
    pub url_prefix: String,
    pub state: LifecycleState,
    pub routes: Vec<RouteEntry>,
}

/// Contract between a host and one loaded extension.
///
/// Implementations are shared across request threads.
pub trait HostExtension: Send + Sync {
    fn manifest(&self) -> &ExtensionManifest;

    fn state(&self) -> LifecycleState;

    /// Starts the extension against `host`.
    ///
    /// # Errors
    /// Returns the fault that left the extension `Failed`, or an
    /// `AlreadyActive` fault without side effects.
    fn activate(&self, host: HostContext) -> Result<(), ActivationFault>;

    fn stop(&self);

    /// Works in every state, including before the first `activate`.
    fn info(&self) -> ExtensionInfo;

    /// Handles one request under the extension's url prefix.
    fn handle(&self, request: &ExtensionRequest) -> ExtensionResponse;
}

/// Runs one activation step, turning a panic into `FaultCause::Panic`.
pub(crate) fn run_guarded<T>(
    stage: ActivationStage,
    step: impl FnOnce() -> Result<T, FaultCause>,
) -> Result<T, (ActivationStage, FaultCause)> {
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err((stage, cause)),
        Err(payload) => Err((stage, FaultCause::Panic(panic_message(payload.as_ref())))),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        run_guarded, ActivationFault, ActivationStage, FaultCause, LifecycleState,
    };
    use crate::config::ConfigLoadError;
    use std::error::Error;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[test]
    fn only_resting_states_admit_activation() {
        assert!(LifecycleState::Unloaded.admits_activation());
        assert!(LifecycleState::Stopped.admits_activation());
        assert!(LifecycleState::Failed.admits_activation());
        assert!(!LifecycleState::Activating.admits_activation());
        assert!(!LifecycleState::Active.admits_activation());
    }

    #[test]
    fn guarded_step_converts_errors_and_panics() {
        let ok = run_guarded(ActivationStage::Setup, || Ok::<_, FaultCause>(7));
        assert_eq!(ok.expect("ok step"), 7);

        let (stage, cause) =
            run_guarded::<()>(ActivationStage::Metadata, || Err(FaultCause::Interrupted))
                .expect_err("error step");
        assert_eq!(stage, ActivationStage::Metadata);
        assert!(matches!(cause, FaultCause::Interrupted));

        let (stage, cause) = run_guarded::<()>(ActivationStage::Setup, || panic!("setup blew up"))
            .expect_err("panicking step");
        assert_eq!(stage, ActivationStage::Setup);
        assert!(matches!(cause, FaultCause::Panic(message) if message == "setup blew up"));
    }

    #[test]
    fn fault_exposes_source_chain() {
        let fault = ActivationFault::new(
            "sample",
            Uuid::new_v4(),
            ActivationStage::Config,
            FaultCause::Config(ConfigLoadError::Malformed {
                path: PathBuf::from("config.yml"),
                reason: "bad indentation".to_string(),
            }),
        );
        assert!(fault.source().is_some());
        let chain = fault.error_chain();
        assert!(chain.starts_with("activation of `sample` failed at config stage"));
        assert_eq!(chain.matches("bad indentation").count(), 1);
    }

    #[test]
    fn error_chain_names_each_cause_once() {
        let fault = ActivationFault::new(
            "sample",
            Uuid::new_v4(),
            ActivationStage::Config,
            FaultCause::Config(ConfigLoadError::Unreadable {
                path: PathBuf::from("config.yml"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
            }),
        );
        assert_eq!(
            fault.error_chain(),
            "activation of `sample` failed at config stage: configuration load failed: \
             override file unreadable `config.yml`: access denied"
        );
    }
}

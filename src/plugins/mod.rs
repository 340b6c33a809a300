//! Plugin runtime
//!
//! Plugins are Rhai scripts that assign a contract to an `exports` map. The
//! [`Loader`] evaluates them in a sandbox and lifts allow-listed capability
//! functions into a [`Module`]; the [`Registry`] owns the mounted set.

mod capability;
mod fetch;
mod loader;
mod module;
mod registry;
mod sandbox;
pub mod version;

pub use capability::Capability;
pub use fetch::{DEFAULT_FETCH_TIMEOUT, HttpFetcher, SourceFetcher};
pub use loader::{DEFAULT_LOAD_TIMEOUT, Loader, identity_digest};
pub use module::{
    BuiltinBuilder, CallContext, CallError, CapabilityFn, CapabilityTable, DEFAULT_CALL_TIMEOUT,
    FailureReason, ImportHints, Module, ModuleInfo, ModuleState, NativeFn, SourceOrigin,
    UserVariableDef,
};
pub use registry::{
    InstallOptions, InstallOutcome, InstallStatus, Registry, RegistryEvent, SOURCE_EXTENSION,
    UpdateOutcome,
};
pub use sandbox::{SandboxLimits, StopSignal};

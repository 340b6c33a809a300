//! Loaded plugin instances and their call wrapper

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rhai::{AST, Dynamic, FnPtr};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capability::Capability;
use super::sandbox::{self, CancelOnDrop, SandboxLimits, StopSignal};

/// Default bound on a single capability call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a loaded module
///
/// `Mounted` and `Error` are terminal. Enabled/disabled is tracked separately
/// by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// Evaluation has not finished
    Loading,
    /// Evaluated and validated
    Mounted,
    /// Evaluation or validation failed
    Error,
}

/// Why a module ended up in [`ModuleState::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Source failed to compile or threw during top-level evaluation
    CannotParse,
    /// Declared `appVersion` range rejects the host
    VersionMismatch,
    /// Missing or empty `platform`
    InvalidModule,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CannotParse => "source cannot be parsed",
            Self::VersionMismatch => "host version not supported",
            Self::InvalidModule => "platform field is missing",
        })
    }
}

/// Where a module's source text came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum SourceOrigin {
    /// Local file
    File(PathBuf),
    /// Remote URL
    Url(String),
    /// Raw text handed over without a location
    Inline,
    /// Native module compiled into the host
    Builtin,
}

/// A user-configurable variable declared by a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVariableDef {
    /// Storage key
    pub key: String,
    /// Display label
    #[serde(default)]
    pub name: Option<String>,
    /// Input hint
    #[serde(default)]
    pub hint: Option<String>,
}

/// Hints shown next to import inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportHints {
    /// Hints for sheet import
    pub import_music_sheet: Vec<String>,
    /// Hints for single item import
    pub import_music_item: Vec<String>,
}

/// Informational fields declared by a module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    /// Declared module version
    pub version: Option<String>,
    /// Host compatibility range
    pub app_version: Option<String>,
    /// Author
    pub author: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Update URL
    pub src_url: Option<String>,
    /// Declared user variables
    pub user_variables: Vec<UserVariableDef>,
    /// Import hints
    pub hints: ImportHints,
}

/// Native implementation for built-in modules
pub type NativeFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, String> + Send + Sync>;

/// One executable capability
#[derive(Clone)]
pub enum CapabilityFn {
    /// Script function pointer, with its declared parameter count when known
    Script {
        /// Function pointer into the module's AST
        ptr: FnPtr,
        /// Parameters the function accepts, excluding captured ones
        arity: Option<usize>,
    },
    /// Host closure
    Native(NativeFn),
}

impl fmt::Debug for CapabilityFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script { ptr, arity } => f
                .debug_struct("Script")
                .field("fn", &ptr.fn_name())
                .field("arity", arity)
                .finish(),
            Self::Native(_) => f.write_str("Native"),
        }
    }
}

const SLOTS: usize = Capability::ALL.len();

/// Sparse mapping from capability to implementation
#[derive(Clone, Default)]
pub struct CapabilityTable {
    slots: [Option<CapabilityFn>; SLOTS],
}

impl CapabilityTable {
    /// Set the implementation for a capability
    pub fn insert(&mut self, capability: Capability, func: CapabilityFn) {
        self.slots[capability.index()] = Some(func);
    }

    /// Implementation for a capability, if any
    #[must_use]
    pub fn get(&self, capability: Capability) -> Option<&CapabilityFn> {
        self.slots[capability.index()].as_ref()
    }

    /// Whether the capability is implemented
    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.get(capability).is_some()
    }

    /// Implemented capabilities in table order
    pub fn supported(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// Number of implemented capabilities
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether nothing is implemented
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.supported()).finish()
    }
}

/// Per-call settings supplied by the dispatcher
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Upper bound on the call
    pub timeout: Duration,
    /// Persisted user variables of the module
    pub user_variables: BTreeMap<String, String>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            user_variables: BTreeMap::new(),
        }
    }
}

/// Failure of a single capability call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Module does not implement the capability
    #[error("capability {0} is not supported")]
    Unsupported(Capability),
    /// Module never mounted
    #[error("plugin is not mounted")]
    NotMounted,
    /// Implementation raised an error
    #[error("{0}")]
    Script(String),
    /// Implementation exceeded the call timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Implementation was stopped before finishing
    #[error("call cancelled")]
    Cancelled,
    /// Implementation panicked
    #[error("implementation panicked")]
    Panicked,
    /// Arguments or result could not cross the sandbox boundary
    #[error("value conversion failed: {0}")]
    Conversion(String),
}

/// A loaded plugin instance
///
/// Never mutated after construction; updates replace the whole value.
pub struct Module {
    pub(crate) name: String,
    pub(crate) digest: String,
    pub(crate) state: ModuleState,
    pub(crate) failure: Option<FailureReason>,
    pub(crate) failure_message: Option<String>,
    pub(crate) origin: SourceOrigin,
    pub(crate) info: ModuleInfo,
    pub(crate) capabilities: CapabilityTable,
    pub(crate) script: Option<Arc<AST>>,
    pub(crate) limits: SandboxLimits,
    pub(crate) loaded_at: DateTime<Utc>,
}

impl Module {
    /// Start building a native module
    #[must_use]
    pub fn builtin(name: impl Into<String>) -> BuiltinBuilder {
        BuiltinBuilder {
            name: name.into(),
            info: ModuleInfo::default(),
            capabilities: CapabilityTable::default(),
        }
    }

    /// Display name (the declared platform)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content hash of the source text
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Lifecycle state
    #[must_use]
    pub const fn state(&self) -> ModuleState {
        self.state
    }

    /// Whether the module is usable
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.state == ModuleState::Mounted
    }

    /// Failure classification, set only in the error state
    #[must_use]
    pub const fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    /// Failure detail, set only in the error state
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        self.failure_message.as_deref()
    }

    /// Where the source came from
    #[must_use]
    pub const fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    /// Declared informational fields
    #[must_use]
    pub const fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// Declared version
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.info.version.as_deref()
    }

    /// Capability table
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Whether the capability is implemented
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// When the module was constructed
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Invoke a capability inside the isolation boundary
    ///
    /// The call runs on the blocking pool. On timeout, or when the returned
    /// future is dropped, the script is asked to stop.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] describing why the call produced no value
    pub async fn invoke(
        &self,
        capability: Capability,
        args: Vec<Value>,
        ctx: &CallContext,
    ) -> Result<Value, CallError> {
        if !self.is_mounted() {
            return Err(CallError::NotMounted);
        }
        let func = self
            .capabilities
            .get(capability)
            .cloned()
            .ok_or(CallError::Unsupported(capability))?;

        let stop = StopSignal::new();
        let _guard = CancelOnDrop(stop.clone());

        let job = match func {
            CapabilityFn::Script { ptr, arity } => {
                let ast = self.script.clone().ok_or(CallError::NotMounted)?;
                let call = ScriptCall {
                    plugin: self.name.clone(),
                    ast,
                    ptr,
                    arity,
                    args,
                    limits: self.limits.clone(),
                    stop: stop.clone(),
                    user_variables: ctx.user_variables.clone(),
                };
                tokio::task::spawn_blocking(move || call.run())
            }
            CapabilityFn::Native(f) => {
                tokio::task::spawn_blocking(move || f(args).map_err(CallError::Script))
            }
        };

        match tokio::time::timeout(ctx.timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => Err(CallError::Panicked),
            Ok(Err(_)) => Err(CallError::Cancelled),
            Err(_) => {
                stop.cancel();
                Err(CallError::Timeout(ctx.timeout))
            }
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("digest", &self.digest)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .field("origin", &self.origin)
            .field("version", &self.info.version)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Builder for native modules
pub struct BuiltinBuilder {
    name: String,
    info: ModuleInfo,
    capabilities: CapabilityTable,
}

impl BuiltinBuilder {
    /// Declared version
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.info.version = Some(version.into());
        self
    }

    /// Import hints
    #[must_use]
    pub fn hints(mut self, hints: ImportHints) -> Self {
        self.info.hints = hints;
        self
    }

    /// Register a native capability implementation
    #[must_use]
    pub fn capability<F>(mut self, capability: Capability, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.capabilities
            .insert(capability, CapabilityFn::Native(Arc::new(func)));
        self
    }

    /// Finish the module
    ///
    /// An empty name yields an [`FailureReason::InvalidModule`] module.
    #[must_use]
    pub fn build(self) -> Module {
        let valid = !self.name.trim().is_empty();
        Module {
            name: self.name,
            digest: format!("builtin-{}", uuid::Uuid::new_v4().simple()),
            state: if valid {
                ModuleState::Mounted
            } else {
                ModuleState::Error
            },
            failure: (!valid).then_some(FailureReason::InvalidModule),
            failure_message: None,
            origin: SourceOrigin::Builtin,
            info: self.info,
            capabilities: self.capabilities,
            script: None,
            limits: SandboxLimits::default(),
            loaded_at: Utc::now(),
        }
    }
}

struct ScriptCall {
    plugin: String,
    ast: Arc<AST>,
    ptr: FnPtr,
    arity: Option<usize>,
    args: Vec<Value>,
    limits: SandboxLimits,
    stop: StopSignal,
    user_variables: BTreeMap<String, String>,
}

impl ScriptCall {
    fn run(self) -> Result<Value, CallError> {
        let engine = sandbox::engine(&self.plugin, &self.limits, &self.stop, self.user_variables);

        let mut args = self.args;
        if let Some(arity) = self.arity {
            args.resize(arity, Value::Null);
        }
        let args = args
            .iter()
            .map(sandbox::to_dynamic)
            .collect::<Result<Vec<Dynamic>, _>>()
            .map_err(CallError::Conversion)?;

        let out: Dynamic = self.ptr.call(&engine, &self.ast, args).map_err(|e| {
            if matches!(*e, rhai::EvalAltResult::ErrorTerminated(..)) {
                CallError::Cancelled
            } else {
                CallError::Script(e.to_string())
            }
        })?;

        sandbox::from_dynamic(&out).map_err(CallError::Conversion)
    }
}

//! Restricted script engine for plugin code
//!
//! Every evaluation gets a fresh engine with no module resolution, no `eval`,
//! bounded resource limits and a progress hook that honours a [`StopSignal`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, Map};
use serde::{Deserialize, Serialize};

/// Value returned by the progress hook when a script is stopped
pub(crate) const STOP_TOKEN: &str = "stopped";

/// How often (in operations) the progress hook checks the deadline
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// Resource limits applied to every plugin evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Maximum script operations per evaluation
    pub max_operations: u64,
    /// Maximum function call nesting
    pub max_call_levels: usize,
    /// Maximum expression nesting at top level
    pub max_expr_depth: usize,
    /// Maximum expression nesting inside functions
    pub max_fn_expr_depth: usize,
    /// Maximum string length in bytes
    pub max_string_size: usize,
    /// Maximum array length
    pub max_array_size: usize,
    /// Maximum object map size
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_fn_expr_depth: 32,
            max_string_size: 4 * 1024 * 1024,
            max_array_size: 50_000,
            max_map_size: 10_000,
        }
    }
}

/// Cooperative stop flag shared between a caller and a running script
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopSignal {
    /// Signal with no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that also trips once `timeout` has elapsed
    #[must_use]
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Request the script to stop
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether the script should stop now
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Cancels the wrapped signal when dropped
pub(crate) struct CancelOnDrop(pub(crate) StopSignal);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Build a sandboxed engine for one evaluation
///
/// `user_variables` is exposed to scripts through `user_variables()`.
pub(crate) fn engine(
    plugin: &str,
    limits: &SandboxLimits,
    stop: &StopSignal,
    user_variables: BTreeMap<String, String>,
) -> Engine {
    let mut engine = Engine::new();

    // No `import` may resolve to anything
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_fn_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);

    let signal = stop.clone();
    engine.on_progress(move |ops| {
        if (ops % DEADLINE_CHECK_INTERVAL == 0 || ops == 1) && signal.is_stopped() {
            Some(Dynamic::from(STOP_TOKEN.to_string()))
        } else {
            None
        }
    });

    let name = plugin.to_string();
    engine.on_print(move |text| tracing::debug!(plugin = %name, "{text}"));

    let name = plugin.to_string();
    engine.on_debug(move |text, source, pos| {
        tracing::debug!(plugin = %name, source = ?source, position = ?pos, "{text}");
    });

    let mut vars = Map::new();
    for (key, value) in user_variables {
        vars.insert(key.into(), Dynamic::from(value));
    }
    engine.register_fn("user_variables", move || vars.clone());

    engine
}

/// Convert a host value into a script value
pub(crate) fn to_dynamic(value: &serde_json::Value) -> Result<Dynamic, String> {
    rhai::serde::to_dynamic(value).map_err(|e| e.to_string())
}

/// Convert a script value into a host value
pub(crate) fn from_dynamic(value: &Dynamic) -> Result<serde_json::Value, String> {
    rhai::serde::from_dynamic(&value.clone().flatten()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine(stop: &StopSignal) -> Engine {
        engine("test", &SandboxLimits::default(), stop, BTreeMap::new())
    }

    #[test]
    fn evaluates_plain_expressions() {
        let engine = test_engine(&StopSignal::new());
        assert_eq!(engine.eval::<i64>("40 + 2").unwrap(), 42);
    }

    #[test]
    fn import_fails_closed() {
        let engine = test_engine(&StopSignal::new());
        let result = engine.run(r#"import "fs" as fs;"#);
        assert!(result.is_err());
    }

    #[test]
    fn eval_is_disabled() {
        let engine = test_engine(&StopSignal::new());
        assert!(engine.run(r#"let x = eval("1 + 1");"#).is_err());
    }

    #[test]
    fn cancelled_signal_terminates_loops() {
        let stop = StopSignal::new();
        stop.cancel();
        let engine = test_engine(&stop);
        let err = engine.run("let x = 0; loop { x += 1; }").unwrap_err();
        assert!(matches!(*err, rhai::EvalAltResult::ErrorTerminated(..)));
    }

    #[test]
    fn operation_limit_is_enforced() {
        let limits = SandboxLimits {
            max_operations: 1_000,
            ..SandboxLimits::default()
        };
        let engine = engine("test", &limits, &StopSignal::new(), BTreeMap::new());
        assert!(engine.run("let x = 0; loop { x += 1; }").is_err());
    }

    #[test]
    fn user_variables_are_visible() {
        let mut vars = BTreeMap::new();
        vars.insert("cookie".to_string(), "abc".to_string());
        let engine = engine("test", &SandboxLimits::default(), &StopSignal::new(), vars);
        let value = engine.eval::<String>("user_variables().cookie").unwrap();
        assert_eq!(value, "abc");
    }

    #[test]
    fn deadline_trips_after_timeout() {
        let stop = StopSignal::with_deadline(Duration::ZERO);
        assert!(stop.is_stopped());
        assert!(!StopSignal::new().is_stopped());
    }

    #[test]
    fn json_crosses_the_boundary() {
        let value = serde_json::json!({"title": "X", "tags": ["a", "b"], "n": 3});
        let dynamic = to_dynamic(&value).unwrap();
        assert_eq!(from_dynamic(&dynamic).unwrap(), value);
    }
}

//! Module loader
//!
//! Turns raw source text into a [`Module`]. Loading never fails: problems are
//! recorded on the returned module as [`ModuleState::Error`] with a
//! [`FailureReason`].

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rhai::{AST, Dynamic, FnPtr, Map, Scope};
use semver::Version;
use sha2::{Digest, Sha256};

use super::capability::Capability;
use super::module::{
    CapabilityFn, CapabilityTable, FailureReason, ImportHints, Module, ModuleInfo, ModuleState,
    SourceOrigin, UserVariableDef,
};
use super::sandbox::{self, SandboxLimits, StopSignal};
use super::version;

/// Default bound on top-level evaluation
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the scope variable a module assigns its contract to
const EXPORTS: &str = "exports";

/// Content hash identifying a module's source text
#[must_use]
pub fn identity_digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Evaluates module sources in the sandbox
#[derive(Debug, Clone)]
pub struct Loader {
    host_version: Version,
    limits: SandboxLimits,
    load_timeout: Duration,
}

impl Loader {
    /// Create a loader that checks compatibility ranges against `host_version`
    #[must_use]
    pub fn new(host_version: Version) -> Self {
        Self {
            host_version,
            limits: SandboxLimits::default(),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Override sandbox limits
    #[must_use]
    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the top-level evaluation timeout
    #[must_use]
    pub const fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Host version used for `appVersion` checks
    #[must_use]
    pub const fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// Load a module from raw source text
    #[must_use]
    pub fn load(&self, raw: &str, origin: SourceOrigin) -> Module {
        let digest = identity_digest(raw);
        let mut module = Module {
            name: String::new(),
            digest,
            state: ModuleState::Loading,
            failure: None,
            failure_message: None,
            origin,
            info: ModuleInfo::default(),
            capabilities: CapabilityTable::default(),
            script: None,
            limits: self.limits.clone(),
            loaded_at: Utc::now(),
        };

        let evaluated = catch_unwind(AssertUnwindSafe(|| self.evaluate(raw)))
            .unwrap_or_else(|_| Err("evaluation panicked".to_string()));

        let (ast, exports) = match evaluated {
            Ok(pair) => pair,
            Err(message) => {
                tracing::warn!(hash = %module.digest, error = %message, "plugin source cannot be parsed");
                return fail(module, FailureReason::CannotParse, Some(message));
            }
        };

        module.name = exports
            .get("platform")
            .and_then(read_string)
            .unwrap_or_default();
        module.info = read_info(&exports);

        if module.name.trim().is_empty() {
            tracing::warn!(hash = %module.digest, "plugin is missing a platform");
            return fail(module, FailureReason::InvalidModule, None);
        }

        if let Some(range) = module.info.app_version.as_deref() {
            if !version::satisfies(range, &self.host_version) {
                tracing::warn!(
                    plugin = %module.name,
                    range = %range,
                    host = %self.host_version,
                    "plugin does not support this host version"
                );
                let message = format!("requires {range}, host is {}", self.host_version);
                return fail(module, FailureReason::VersionMismatch, Some(message));
            }
        }

        module.capabilities = capability_table(&exports, &ast);
        module.script = Some(Arc::new(ast));
        module.state = ModuleState::Mounted;

        tracing::debug!(
            plugin = %module.name,
            hash = %module.digest,
            version = ?module.info.version,
            capabilities = module.capabilities.len(),
            "loaded plugin"
        );
        module
    }

    fn evaluate(&self, raw: &str) -> Result<(AST, Map), String> {
        let stop = StopSignal::with_deadline(self.load_timeout);
        let engine = sandbox::engine("loader", &self.limits, &stop, BTreeMap::new());

        let ast = engine.compile(raw).map_err(|e| e.to_string())?;
        let mut scope = Scope::new();
        scope.push(EXPORTS, Map::new());
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| e.to_string())?;

        let exports = scope
            .get_value::<Dynamic>(EXPORTS)
            .map(Dynamic::flatten)
            .ok_or_else(|| "exports binding was removed".to_string())?;
        let type_name = exports.type_name();
        let exports = exports
            .try_cast::<Map>()
            .ok_or_else(|| format!("exports must be an object map, found {type_name}"))?;

        Ok((ast, exports))
    }
}

fn fail(mut module: Module, reason: FailureReason, message: Option<String>) -> Module {
    module.state = ModuleState::Error;
    module.failure = Some(reason);
    module.failure_message = message;
    module
}

fn read_string(value: &Dynamic) -> Option<String> {
    let value = value.clone().flatten();
    if value.is_string() {
        return value.into_string().ok();
    }
    if let Ok(n) = value.as_int() {
        return Some(n.to_string());
    }
    if let Ok(f) = value.as_float() {
        return Some(f.to_string());
    }
    None
}

fn read_string_list(value: Option<&Dynamic>) -> Vec<String> {
    value
        .and_then(|v| v.clone().flatten().try_cast::<rhai::Array>())
        .map(|items| items.iter().filter_map(read_string).collect())
        .unwrap_or_default()
}

fn read_map(value: Option<&Dynamic>) -> Option<Map> {
    value.and_then(|v| v.clone().flatten().try_cast::<Map>())
}

fn read_info(exports: &Map) -> ModuleInfo {
    let field = |name: &str| exports.get(name).and_then(read_string);

    let user_variables = exports
        .get("userVariables")
        .and_then(|v| v.clone().flatten().try_cast::<rhai::Array>())
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| {
            let entry = read_map(Some(entry))?;
            let key = entry.get("key").and_then(read_string)?;
            Some(UserVariableDef {
                key,
                name: entry.get("name").and_then(read_string),
                hint: entry.get("hint").and_then(read_string),
            })
        })
        .collect();

    let hints = read_map(exports.get("hints"))
        .map(|hints| ImportHints {
            import_music_sheet: read_string_list(hints.get("importMusicSheet")),
            import_music_item: read_string_list(hints.get("importMusicItem")),
        })
        .unwrap_or_default();

    ModuleInfo {
        version: field("version"),
        app_version: field("appVersion"),
        author: field("author"),
        description: field("description"),
        src_url: field("srcUrl"),
        user_variables,
        hints,
    }
}

fn capability_table(exports: &Map, ast: &AST) -> CapabilityTable {
    let mut table = CapabilityTable::default();
    for capability in Capability::ALL {
        let Some(value) = exports.get(capability.as_str()) else {
            continue;
        };
        let Some(ptr) = value.clone().flatten().try_cast::<FnPtr>() else {
            tracing::debug!(capability = %capability, "ignoring non-function capability field");
            continue;
        };
        let arity = declared_arity(ast, &ptr, capability);
        table.insert(capability, CapabilityFn::Script { ptr, arity });
    }
    table
}

/// Parameters a script function accepts once curried values are bound
///
/// Prefers an overload matching the host's argument count, otherwise the
/// widest one. `None` when the target is not a script function.
fn declared_arity(ast: &AST, ptr: &FnPtr, capability: Capability) -> Option<usize> {
    let curried = ptr.curry().len();
    let counts: Vec<usize> = ast
        .iter_functions()
        .filter(|f| f.name == ptr.fn_name())
        .map(|f| f.params.len().saturating_sub(curried))
        .collect();

    if counts.contains(&capability.arity()) {
        Some(capability.arity())
    } else {
        counts.into_iter().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> Loader {
        Loader::new(Version::new(0, 4, 0))
    }

    #[test]
    fn digest_is_deterministic() {
        let a = identity_digest("exports.platform = \"A\";");
        let b = identity_digest("exports.platform = \"A\";");
        let c = identity_digest("exports.platform = \"B\";");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn mounts_module_with_capabilities() {
        let source = r#"
            fn search(query, page, ty) { #{ isEnd: true, data: [] } }
            exports.platform = "Alpha";
            exports.version = "1.2.0";
            exports.author = "someone";
            exports.search = Fn("search");
            exports.getTopLists = || [];
            exports.notACapability = || 1;
            exports.getLyric = "not a function";
        "#;
        let module = loader().load(source, SourceOrigin::Inline);

        assert_eq!(module.state(), ModuleState::Mounted);
        assert_eq!(module.name(), "Alpha");
        assert_eq!(module.version(), Some("1.2.0"));
        assert_eq!(module.info().author.as_deref(), Some("someone"));
        assert!(module.supports(Capability::Search));
        assert!(module.supports(Capability::GetTopLists));
        assert!(!module.supports(Capability::GetLyric));
        assert_eq!(module.capabilities().len(), 2);
    }

    #[test]
    fn wholesale_exports_assignment() {
        let source = r#"
            exports = #{
                platform: "Beta",
                importMusicItem: |url| #{ title: url },
            };
        "#;
        let module = loader().load(source, SourceOrigin::Inline);
        assert_eq!(module.name(), "Beta");
        assert!(module.supports(Capability::ImportMusicItem));
    }

    #[test]
    fn missing_platform_is_invalid() {
        let module = loader().load("exports.search = |q, p, t| 1;", SourceOrigin::Inline);
        assert_eq!(module.state(), ModuleState::Error);
        assert_eq!(module.failure(), Some(FailureReason::InvalidModule));
        assert!(module.capabilities().is_empty());
    }

    #[test]
    fn syntax_error_cannot_parse() {
        let module = loader().load("exports.platform = ", SourceOrigin::Inline);
        assert_eq!(module.failure(), Some(FailureReason::CannotParse));
        assert!(module.failure_message().is_some());
        assert_eq!(module.digest(), identity_digest("exports.platform = "));
    }

    #[test]
    fn runtime_error_cannot_parse() {
        let module = loader().load(
            "exports.platform = \"A\"; throw \"boom\";",
            SourceOrigin::Inline,
        );
        assert_eq!(module.failure(), Some(FailureReason::CannotParse));
    }

    #[test]
    fn import_fails_closed() {
        let module = loader().load(
            "import \"net\" as net; exports.platform = \"A\";",
            SourceOrigin::Inline,
        );
        assert_eq!(module.failure(), Some(FailureReason::CannotParse));
    }

    #[test]
    fn non_map_exports_cannot_parse() {
        let module = loader().load("exports = 42;", SourceOrigin::Inline);
        assert_eq!(module.failure(), Some(FailureReason::CannotParse));
    }

    #[test]
    fn runaway_top_level_is_stopped() {
        let loader = loader().with_load_timeout(Duration::from_millis(50));
        let module = loader.load("let x = 0; loop { x += 1; }", SourceOrigin::Inline);
        assert_eq!(module.failure(), Some(FailureReason::CannotParse));
    }

    #[test]
    fn version_range_is_checked() {
        let ok = loader().load(
            "exports.platform = \"A\"; exports.appVersion = \">=0.1.0\";",
            SourceOrigin::Inline,
        );
        assert!(ok.is_mounted());

        let too_new = loader().load(
            "exports.platform = \"A\"; exports.appVersion = \">=9.0.0\";",
            SourceOrigin::Inline,
        );
        assert_eq!(too_new.failure(), Some(FailureReason::VersionMismatch));

        let garbage = loader().load(
            "exports.platform = \"A\"; exports.appVersion = \"whenever\";",
            SourceOrigin::Inline,
        );
        assert_eq!(garbage.failure(), Some(FailureReason::VersionMismatch));
    }

    #[test]
    fn reads_user_variables_and_hints() {
        let source = r#"
            exports.platform = "A";
            exports.srcUrl = "https://example.com/a.rhai";
            exports.userVariables = [
                #{ key: "cookie", name: "Cookie" },
                #{ name: "no key" },
            ];
            exports.hints = #{ importMusicSheet: ["paste a playlist link"] };
        "#;
        let module = loader().load(source, SourceOrigin::Inline);
        let info = module.info();

        assert_eq!(info.src_url.as_deref(), Some("https://example.com/a.rhai"));
        assert_eq!(info.user_variables.len(), 1);
        assert_eq!(info.user_variables[0].key, "cookie");
        assert_eq!(info.hints.import_music_sheet, vec!["paste a playlist link"]);
        assert!(info.hints.import_music_item.is_empty());
    }

    #[test]
    fn numeric_version_is_read_as_text() {
        let module = loader().load(
            "exports.platform = \"A\"; exports.version = 2;",
            SourceOrigin::Inline,
        );
        assert_eq!(module.version(), Some("2"));
    }

    #[test]
    fn declared_arity_tracks_closure_captures() {
        let source = r#"
            let prefix = "p-";
            exports.platform = "A";
            exports.importMusicItem = |url| prefix + url;
            exports.getTopLists = || [];
        "#;
        let module = loader().load(source, SourceOrigin::Inline);
        let Some(CapabilityFn::Script { arity, .. }) =
            module.capabilities().get(Capability::ImportMusicItem)
        else {
            panic!("expected script capability");
        };
        assert_eq!(*arity, Some(1));
    }
}

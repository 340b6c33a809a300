//! Plugin registry
//!
//! Owns the list of mounted modules. Writers (install, uninstall, update,
//! setup) are serialized by an async mutex and publish a fresh list through
//! [`ArcSwap`]; readers always see a complete snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, broadcast};

use super::capability::Capability;
use super::fetch::SourceFetcher;
use super::loader::{Loader, identity_digest};
use super::module::{FailureReason, Module, SourceOrigin};
use super::version;
use crate::db::PluginMetaRepo;
use crate::{Error, Result};

/// File extension of persisted plugin sources
pub const SOURCE_EXTENSION: &str = "rhai";

const EVENT_CAPACITY: usize = 64;

/// Failed loads kept for display
const MAX_FAILURES: usize = 32;

/// Notification sent to registry subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The module list changed
    PluginsUpdated,
    /// A plugin was enabled or disabled
    EnabledUpdated {
        /// Plugin display name
        name: String,
        /// New flag
        enabled: bool,
    },
}

/// Install behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Accept an older version over a newer installed one
    pub skip_version_check: bool,
}

/// What an accepted install did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallStatus {
    /// New plugin added
    Installed,
    /// Existing plugin with the same name replaced
    Replaced,
    /// Byte-identical source already present
    AlreadyInstalled,
}

/// Result of an accepted install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    /// Display name
    pub plugin_name: String,
    /// Identity digest
    pub plugin_hash: String,
    /// Declared version
    pub version: Option<String>,
    /// What happened
    pub status: InstallStatus,
}

impl InstallOutcome {
    fn new(module: &Module, status: InstallStatus) -> Self {
        Self {
            plugin_name: module.name().to_string(),
            plugin_hash: module.digest().to_string(),
            version: module.version().map(ToString::to_string),
            status,
        }
    }
}

/// Result of an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum UpdateOutcome {
    /// A different source was installed
    Updated(InstallOutcome),
    /// The fetched source is identical to the installed one
    AlreadyLatest,
}

/// Authoritative list of loaded plugins
pub struct Registry {
    modules: ArcSwap<Vec<Arc<Module>>>,
    failures: ArcSwap<Vec<Arc<Module>>>,
    write_lock: Mutex<()>,
    meta: PluginMetaRepo,
    loader: Loader,
    fetcher: Arc<dyn SourceFetcher>,
    source_dir: Option<PathBuf>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new(loader: Loader, meta: PluginMetaRepo, fetcher: Arc<dyn SourceFetcher>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            modules: ArcSwap::from_pointee(Vec::new()),
            failures: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            meta,
            loader,
            fetcher,
            source_dir: None,
            events,
        }
    }

    /// Persist installed sources in `dir` and load them on [`Registry::setup`]
    #[must_use]
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    /// Directory holding persisted plugin sources
    #[must_use]
    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    /// Receive registry notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Load every persisted source from the source directory
    ///
    /// Files are processed in name order. Each module gets back the origin it
    /// was installed from, falling back to the persisted file itself.
    /// Byte-identical duplicates and modules whose name is already taken are
    /// skipped. Returns the number of mounted modules.
    ///
    /// # Errors
    ///
    /// Returns error if the source directory or stored origins cannot be read
    pub async fn setup(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let Some(dir) = self.source_dir.clone() else {
            return Ok(self.modules.load().len());
        };
        tokio::fs::create_dir_all(&dir).await?;

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut modules: Vec<Arc<Module>> = self.modules.load().iter().cloned().collect();
        let mut failures = Vec::new();

        for path in paths {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read plugin source");
                    continue;
                }
            };
            let origin = self
                .meta
                .origin(&identity_digest(&raw))?
                .unwrap_or_else(|| SourceOrigin::File(path.clone()));
            let module = self.load(raw, origin).await?;

            if modules.iter().any(|m| m.digest() == module.digest()) {
                tracing::debug!(path = %path.display(), "duplicate plugin source, skipping");
                continue;
            }
            if !module.is_mounted() {
                failures.push(Arc::new(module));
                continue;
            }
            if modules.iter().any(|m| m.name() == module.name()) {
                tracing::warn!(
                    plugin = %module.name(),
                    path = %path.display(),
                    "plugin name already taken, skipping"
                );
                continue;
            }
            modules.push(Arc::new(module));
        }

        let count = modules.len();
        tracing::info!(mounted = count, failed = failures.len(), "plugin setup complete");

        self.modules.store(Arc::new(modules));
        self.failures.store(Arc::new(failures));
        self.notify(RegistryEvent::PluginsUpdated);
        Ok(count)
    }

    /// Install a plugin from raw source text
    ///
    /// # Errors
    ///
    /// Returns error if the source does not mount, a newer version of the
    /// same plugin is installed, or the source cannot be persisted
    pub async fn install_source(
        &self,
        raw: impl Into<String>,
        origin: SourceOrigin,
        options: InstallOptions,
    ) -> Result<InstallOutcome> {
        let guard = self.write_lock.lock().await;
        self.install_locked(&guard, raw.into(), origin, options).await
    }

    async fn install_locked(
        &self,
        _guard: &MutexGuard<'_, ()>,
        raw: String,
        origin: SourceOrigin,
        options: InstallOptions,
    ) -> Result<InstallOutcome> {
        let digest = identity_digest(&raw);
        let current = self.modules.load_full();
        if let Some(existing) = current.iter().find(|m| m.digest() == digest) {
            tracing::debug!(plugin = %existing.name(), hash = %digest, "plugin already installed");
            return Ok(InstallOutcome::new(existing, InstallStatus::AlreadyInstalled));
        }

        let module = self.load(raw.clone(), origin).await?;
        if !module.is_mounted() {
            let err = Error::LoadFailed {
                name: module.name().to_string(),
                reason: module.failure().unwrap_or(FailureReason::CannotParse),
            };
            self.record_failure(module);
            return Err(err);
        }

        let previous = current.iter().position(|m| m.name() == module.name());
        if let Some(old) = previous.map(|i| &current[i]) {
            if !options.skip_version_check && version::is_older(old.version(), module.version()) {
                return Err(Error::NewerVersionInstalled {
                    name: old.name().to_string(),
                    installed: old.version().unwrap_or_default().to_string(),
                    incoming: module.version().unwrap_or_default().to_string(),
                });
            }
        }

        self.persist(module.digest(), &raw, module.origin()).await?;
        if let Some(old) = previous.map(|i| &current[i]) {
            self.remove_persisted(old.digest()).await;
        }

        let module = Arc::new(module);
        let mut next: Vec<Arc<Module>> = current.iter().cloned().collect();
        let status = if let Some(i) = previous {
            next[i] = Arc::clone(&module);
            InstallStatus::Replaced
        } else {
            next.push(Arc::clone(&module));
            InstallStatus::Installed
        };
        self.modules.store(Arc::new(next));
        self.forget_failure(module.digest());

        tracing::info!(
            plugin = %module.name(),
            hash = %module.digest(),
            version = ?module.version(),
            status = ?status,
            "plugin installed"
        );
        self.notify(RegistryEvent::PluginsUpdated);
        Ok(InstallOutcome::new(&module, status))
    }

    /// Install a plugin from a local file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the install is rejected
    pub async fn install_from_file(
        &self,
        path: impl AsRef<Path>,
        options: InstallOptions,
    ) -> Result<InstallOutcome> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        self.install_source(raw, SourceOrigin::File(path.to_path_buf()), options)
            .await
    }

    /// Install a plugin from a remote URL
    ///
    /// # Errors
    ///
    /// Returns error if the fetch fails or the install is rejected
    pub async fn install_from_url(&self, url: &str, options: InstallOptions) -> Result<InstallOutcome> {
        let raw = self.fetcher.fetch(url).await?;
        self.install_source(raw, SourceOrigin::Url(url.to_string()), options)
            .await
    }

    /// Add a native module
    ///
    /// # Errors
    ///
    /// Returns error if the module is not mounted
    pub async fn register_builtin(&self, module: Module) -> Result<Arc<Module>> {
        if !module.is_mounted() {
            return Err(Error::LoadFailed {
                name: module.name().to_string(),
                reason: module.failure().unwrap_or(FailureReason::InvalidModule),
            });
        }

        let _guard = self.write_lock.lock().await;
        let module = Arc::new(module);
        let mut next: Vec<Arc<Module>> = self.modules.load().iter().cloned().collect();
        match next.iter().position(|m| m.name() == module.name()) {
            Some(i) => next[i] = Arc::clone(&module),
            None => next.push(Arc::clone(&module)),
        }
        self.modules.store(Arc::new(next));

        tracing::debug!(plugin = %module.name(), "builtin plugin registered");
        self.notify(RegistryEvent::PluginsUpdated);
        Ok(module)
    }

    /// Remove a plugin by identity, keeping its metadata
    ///
    /// # Errors
    ///
    /// Returns error if the persisted source cannot be removed
    pub async fn uninstall(&self, digest: &str) -> Result<Option<Arc<Module>>> {
        self.uninstall_with(digest, false).await
    }

    /// Remove a plugin by identity, optionally purging its metadata
    ///
    /// Returns the removed module, or `None` if nothing matched.
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be purged
    pub async fn uninstall_with(&self, digest: &str, purge_meta: bool) -> Result<Option<Arc<Module>>> {
        let _guard = self.write_lock.lock().await;

        let current = self.modules.load_full();
        let Some(removed) = current.iter().find(|m| m.digest() == digest).cloned() else {
            self.forget_failure(digest);
            return Ok(None);
        };

        let next: Vec<Arc<Module>> = current
            .iter()
            .filter(|m| m.digest() != digest)
            .cloned()
            .collect();
        self.modules.store(Arc::new(next));
        self.remove_persisted(digest).await;

        if purge_meta {
            self.meta.forget(removed.name())?;
        }

        tracing::info!(plugin = %removed.name(), hash = %digest, purge_meta, "plugin uninstalled");
        self.notify(RegistryEvent::PluginsUpdated);
        Ok(Some(removed))
    }

    /// Remove every installed plugin, keeping built-ins and metadata
    ///
    /// Returns the number of removed plugins.
    pub async fn uninstall_all(&self) -> usize {
        let _guard = self.write_lock.lock().await;

        let current = self.modules.load_full();
        let (keep, removed): (Vec<Arc<Module>>, Vec<Arc<Module>>) = current
            .iter()
            .cloned()
            .partition(|m| *m.origin() == SourceOrigin::Builtin);

        for module in &removed {
            self.remove_persisted(module.digest()).await;
        }
        self.modules.store(Arc::new(keep));
        self.failures.store(Arc::new(Vec::new()));

        tracing::info!(count = removed.len(), "all plugins uninstalled");
        self.notify(RegistryEvent::PluginsUpdated);
        removed.len()
    }

    /// Re-fetch a plugin from its update source and install the result
    ///
    /// Sources are tried in order: declared `srcUrl`, remote origin, local
    /// file origin. The registry stays locked for the whole update, so a
    /// concurrent uninstall cannot be undone by the reinstall.
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is unknown, has no update source, the
    /// fetch fails, or the install is rejected
    pub async fn update(&self, digest: &str) -> Result<UpdateOutcome> {
        let guard = self.write_lock.lock().await;
        let module = self
            .lookup_by_identity(digest)
            .ok_or_else(|| Error::NotFound(format!("plugin {digest}")))?;

        let (raw, origin) = if let Some(url) = module.info().src_url.as_deref() {
            (self.fetcher.fetch(url).await?, SourceOrigin::Url(url.to_string()))
        } else {
            match module.origin() {
                SourceOrigin::Url(url) => (self.fetcher.fetch(url).await?, module.origin().clone()),
                SourceOrigin::File(path) => {
                    (tokio::fs::read_to_string(path).await?, module.origin().clone())
                }
                SourceOrigin::Inline | SourceOrigin::Builtin => {
                    return Err(Error::NoUpdateSource(module.name().to_string()));
                }
            }
        };

        if identity_digest(&raw) == module.digest() {
            tracing::debug!(plugin = %module.name(), "plugin already at latest version");
            return Ok(UpdateOutcome::AlreadyLatest);
        }

        let outcome = self
            .install_locked(&guard, raw, origin, InstallOptions::default())
            .await?;
        Ok(UpdateOutcome::Updated(outcome))
    }

    /// Snapshot of mounted modules in insertion order
    #[must_use]
    pub fn mounted(&self) -> Arc<Vec<Arc<Module>>> {
        self.modules.load_full()
    }

    /// Modules whose most recent load attempt failed
    #[must_use]
    pub fn failures(&self) -> Arc<Vec<Arc<Module>>> {
        self.failures.load_full()
    }

    /// Every known module: mounted first, then failed loads
    #[must_use]
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.modules
            .load()
            .iter()
            .chain(self.failures.load().iter())
            .cloned()
            .collect()
    }

    /// Find a mounted module by display name
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.load().iter().find(|m| m.name() == name).cloned()
    }

    /// Find a mounted module by identity digest
    #[must_use]
    pub fn lookup_by_identity(&self, digest: &str) -> Option<Arc<Module>> {
        self.modules
            .load()
            .iter()
            .find(|m| m.digest() == digest)
            .cloned()
    }

    /// Find the module that produced a media item
    #[must_use]
    pub fn lookup_by_media_origin(&self, item: &serde_json::Value) -> Option<Arc<Module>> {
        item.get("platform")
            .and_then(serde_json::Value::as_str)
            .and_then(|name| self.lookup_by_name(name))
    }

    /// Enabled, mounted modules implementing `capability`, in display order
    ///
    /// Modules without a stored position sort last; ties keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be read
    pub fn list_capable(&self, capability: Capability) -> Result<Vec<Arc<Module>>> {
        let disabled = self.meta.disabled_names()?;
        let order = self.meta.order_map()?;

        let mut capable: Vec<Arc<Module>> = self
            .modules
            .load()
            .iter()
            .filter(|m| m.is_mounted() && m.supports(capability) && !disabled.contains(m.name()))
            .cloned()
            .collect();
        capable.sort_by_key(|m| order.get(m.name()).map_or((1, 0), |p| (0, *p)));

        Ok(capable)
    }

    /// Whether the plugin is enabled
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be read
    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        self.meta.is_enabled(name)
    }

    /// Enable or disable a plugin by name
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be written
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.meta.set_enabled(name, enabled)?;
        tracing::info!(plugin = %name, enabled, "plugin enabled state changed");
        self.notify(RegistryEvent::EnabledUpdated {
            name: name.to_string(),
            enabled,
        });
        Ok(())
    }

    /// Display position of a plugin, `None` when never ordered
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be read
    pub fn order(&self, name: &str) -> Result<Option<i64>> {
        self.meta.order(name)
    }

    /// Set one plugin's display position
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be written
    pub fn set_order(&self, name: &str, position: i64) -> Result<()> {
        self.meta.set_order(name, position)?;
        self.notify(RegistryEvent::PluginsUpdated);
        Ok(())
    }

    /// Set display positions from a full name sequence
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be written
    pub fn reorder(&self, names: &[String]) -> Result<()> {
        self.meta.reorder(names)?;
        self.notify(RegistryEvent::PluginsUpdated);
        Ok(())
    }

    /// Persisted user variables of a plugin
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be read
    pub fn user_variables(&self, name: &str) -> Result<BTreeMap<String, String>> {
        self.meta.user_variables(name)
    }

    /// Set one user variable of a plugin
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be written
    pub fn set_user_variable(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.meta.set_user_variable(name, key, value)
    }

    async fn load(&self, raw: String, origin: SourceOrigin) -> Result<Module> {
        let loader = self.loader.clone();
        tokio::task::spawn_blocking(move || loader.load(&raw, origin))
            .await
            .map_err(|e| Error::LoadFailed {
                name: String::new(),
                reason: if e.is_panic() {
                    FailureReason::CannotParse
                } else {
                    FailureReason::InvalidModule
                },
            })
    }

    /// Remember a failed load, replacing an earlier failure of the same
    /// source or plugin name and keeping only the newest entries
    fn record_failure(&self, module: Module) {
        let supersedes = |m: &Module| {
            m.digest() == module.digest() || (!module.name().is_empty() && m.name() == module.name())
        };
        let mut failures: Vec<Arc<Module>> = self
            .failures
            .load()
            .iter()
            .filter(|m| !supersedes(m))
            .cloned()
            .collect();
        failures.push(Arc::new(module));
        if failures.len() > MAX_FAILURES {
            failures.drain(..failures.len() - MAX_FAILURES);
        }
        self.failures.store(Arc::new(failures));
    }

    fn forget_failure(&self, digest: &str) {
        let failures = self.failures.load();
        if failures.iter().any(|m| m.digest() == digest) {
            let next = failures
                .iter()
                .filter(|m| m.digest() != digest)
                .cloned()
                .collect();
            self.failures.store(Arc::new(next));
        }
    }

    async fn persist(&self, digest: &str, raw: &str, origin: &SourceOrigin) -> Result<()> {
        let Some(dir) = &self.source_dir else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{digest}.{SOURCE_EXTENSION}"));
        tokio::fs::write(&path, raw).await?;
        self.meta.record_origin(digest, origin)?;
        tracing::debug!(path = %path.display(), origin = ?origin, "plugin source persisted");
        Ok(())
    }

    async fn remove_persisted(&self, digest: &str) {
        let Some(dir) = &self.source_dir else {
            return;
        };
        let path = dir.join(format!("{digest}.{SOURCE_EXTENSION}"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "plugin source removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove plugin source"),
        }
        if let Err(e) = self.meta.forget_origin(digest) {
            tracing::warn!(hash = %digest, error = %e, "failed to forget plugin origin");
        }
    }

    fn notify(&self, event: RegistryEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("mounted", &self.modules.load().len())
            .field("failures", &self.failures.load().len())
            .field("source_dir", &self.source_dir)
            .finish_non_exhaustive()
    }
}

//! Collaborator-facing surface
//!
//! Every operation is async and reports through an [`Envelope`] instead of
//! returning an error, so callers can render failures directly.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::db::{self, PluginMetaRepo};
use crate::plugins::{
    Capability, FailureReason, HttpFetcher, InstallOptions, InstallOutcome, Loader, Module,
    ModuleState, Registry, SourceFetcher, SourceOrigin, UpdateOutcome, UserVariableDef,
};
use crate::services::{
    Dispatcher, ImportKind, ImportPlugin, Imported, ItemGroup, MediaItem, MediaSource, Quality,
    RecommendTags, SearchOptions, SearchResult,
};
use crate::{Error, Result};

/// Uniform operation result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable failure code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl<T> Envelope<T> {
    /// Successful envelope
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    /// Failed envelope
    #[must_use]
    pub fn err(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            kind: Some(error.kind().to_string()),
        }
    }

    /// Whether the failure means no plugin could serve the request
    #[must_use]
    pub fn is_no_capable_module(&self) -> bool {
        self.kind.as_deref() == Some("no_capable_module")
    }
}

impl<T> From<Result<T>> for Envelope<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                tracing::debug!(error = %e, kind = e.kind(), "operation failed");
                Self::err(&e)
            }
        }
    }
}

/// Listing entry for one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    /// Display name
    pub name: String,
    /// Identity digest
    pub hash: String,
    /// Lifecycle state
    pub state: ModuleState,
    /// Failure classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Declared version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Author
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Update URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_url: Option<String>,
    /// Where the source came from
    pub origin: SourceOrigin,
    /// Enabled flag
    pub enabled: bool,
    /// Display position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    /// Implemented capabilities
    pub capabilities: Vec<Capability>,
    /// Declared user variables
    pub user_variables: Vec<UserVariableDef>,
    /// Load time
    pub loaded_at: DateTime<Utc>,
}

/// Plugin runtime handle for a UI or CLI
///
/// Every operation is `async` so callers can treat the surface uniformly,
/// even where the work underneath is synchronous.
#[derive(Debug, Clone)]
pub struct PluginHost {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
}

#[allow(clippy::unused_async)]
impl PluginHost {
    /// Wrap an existing registry
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
        }
    }

    /// Build the full runtime from configuration and load persisted plugins
    ///
    /// # Errors
    ///
    /// Returns error if the database, HTTP client, or plugin directory cannot
    /// be initialized
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::init(&config.db_path)?;
        let meta = PluginMetaRepo::new(pool);
        let loader = Loader::new(config.host_version.clone())
            .with_limits(config.sandbox.clone())
            .with_load_timeout(config.load_timeout);
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(HttpFetcher::new(config.fetch_timeout)?);

        let registry = Arc::new(
            Registry::new(loader, meta, fetcher).with_source_dir(&config.plugin_dir),
        );
        let mounted = registry.setup().await?;
        tracing::info!(mounted, plugin_dir = %config.plugin_dir.display(), "plugin host ready");

        Ok(Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry))
                .with_call_timeout(config.call_timeout),
            registry,
        })
    }

    /// Underlying registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Underlying dispatcher
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Install from raw source bytes
    pub async fn install_from_bytes(
        &self,
        bytes: &[u8],
        options: InstallOptions,
    ) -> Envelope<InstallOutcome> {
        let result = match std::str::from_utf8(bytes) {
            Ok(raw) => {
                self.registry
                    .install_source(raw, SourceOrigin::Inline, options)
                    .await
            }
            Err(_) => Err(Error::LoadFailed {
                name: String::new(),
                reason: FailureReason::CannotParse,
            }),
        };
        result.into()
    }

    /// Install from a local file
    pub async fn install_from_file(
        &self,
        path: &Path,
        options: InstallOptions,
    ) -> Envelope<InstallOutcome> {
        self.registry.install_from_file(path, options).await.into()
    }

    /// Install from a remote URL
    pub async fn install_from_url(
        &self,
        url: &str,
        options: InstallOptions,
    ) -> Envelope<InstallOutcome> {
        self.registry.install_from_url(url, options).await.into()
    }

    /// Uninstall by identity digest, returning the removed plugin's name
    pub async fn uninstall(&self, digest: &str) -> Envelope<String> {
        self.registry
            .uninstall(digest)
            .await
            .and_then(|removed| {
                removed
                    .map(|m| m.name().to_string())
                    .ok_or_else(|| Error::NotFound(format!("plugin {digest}")))
            })
            .into()
    }

    /// Uninstall every installed plugin, returning how many were removed
    pub async fn uninstall_all(&self) -> Envelope<usize> {
        Envelope::ok(self.registry.uninstall_all().await)
    }

    /// Re-fetch and reinstall a plugin
    pub async fn update(&self, digest: &str) -> Envelope<UpdateOutcome> {
        self.registry.update(digest).await.into()
    }

    /// Enable or disable a plugin
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Envelope<()> {
        self.registry.set_enabled(name, enabled).into()
    }

    /// Set display order from a full name sequence
    pub async fn reorder(&self, names: &[String]) -> Envelope<()> {
        self.registry.reorder(names).into()
    }

    /// Set one user variable of a plugin
    pub async fn set_user_variable(&self, name: &str, key: &str, value: &str) -> Envelope<()> {
        self.registry.set_user_variable(name, key, value).into()
    }

    /// Every known plugin, including failed loads
    pub async fn plugins(&self) -> Envelope<Vec<PluginSummary>> {
        self.registry
            .modules()
            .iter()
            .map(|m| self.summary(m))
            .collect::<Result<Vec<_>>>()
            .into()
    }

    /// Ordered, enabled plugins implementing a capability
    pub async fn capable(&self, capability: Capability) -> Envelope<Vec<PluginSummary>> {
        self.registry
            .list_capable(capability)
            .and_then(|modules| modules.iter().map(|m| self.summary(m)).collect())
            .into()
    }

    /// Aggregated or targeted search
    pub async fn search(&self, options: &SearchOptions) -> Envelope<SearchResult> {
        self.dispatcher.search(options).await.into()
    }

    /// Aggregated chart groups
    pub async fn top_lists(&self) -> Envelope<Vec<ItemGroup>> {
        self.dispatcher.top_lists().await.into()
    }

    /// Aggregated recommendation tags
    pub async fn recommend_tags(&self) -> Envelope<RecommendTags> {
        self.dispatcher.sheet_tags().await.into()
    }

    /// Import a sheet link with the first plugin that resolves it
    pub async fn import_sheet(&self, link: &str) -> Envelope<Imported<Vec<MediaItem>>> {
        self.dispatcher.import_sheet(link).await.into()
    }

    /// Import a track link with the first plugin that resolves it
    pub async fn import_item(&self, link: &str) -> Envelope<Imported<MediaItem>> {
        self.dispatcher.import_item(link).await.into()
    }

    /// Plugins able to import, with hints
    pub async fn import_plugins(&self, kind: ImportKind) -> Envelope<Vec<ImportPlugin>> {
        self.dispatcher.import_plugins(kind).into()
    }

    /// Resolve a playable source for a track
    pub async fn media_source(&self, item: &MediaItem, quality: Quality) -> Envelope<MediaSource> {
        self.dispatcher.media_source(item, quality).await.into()
    }

    fn summary(&self, module: &Module) -> Result<PluginSummary> {
        let info = module.info();
        Ok(PluginSummary {
            name: module.name().to_string(),
            hash: module.digest().to_string(),
            state: module.state(),
            failure: module.failure(),
            failure_message: module.failure_message().map(ToString::to_string),
            version: info.version.clone(),
            author: info.author.clone(),
            description: info.description.clone(),
            src_url: info.src_url.clone(),
            origin: module.origin().clone(),
            enabled: self.registry.is_enabled(module.name())?,
            order: self.registry.order(module.name())?,
            capabilities: module.capabilities().supported().collect(),
            user_variables: info.user_variables.clone(),
            loaded_at: module.loaded_at(),
        })
    }
}

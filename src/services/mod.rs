//! Capability dispatch and aggregation
//!
//! A [`Dispatcher`] fans a capability out across every enabled plugin that
//! implements it, isolating each plugin's failure, and specialized services
//! (search, top lists, recommendations, import, media) merge the results.

mod import;
pub mod item;
mod media;
mod recommend;
mod search;
mod toplist;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use crate::plugins::{CallContext, Capability, DEFAULT_CALL_TIMEOUT, Module, Registry};
use crate::{Error, Result};

pub use import::{ImportKind, ImportPlugin, Imported, is_importable};
pub use item::{ItemGroup, Lyric, MediaItem, MediaSource, MediaType, Page, Quality};
pub use recommend::RecommendTags;
pub use search::{SearchOptions, SearchResult};

/// Routes capability calls to plugins and gathers their results
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    call_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over a registry
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-plugin call timeout
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Underlying registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Ordered capable plugins, or [`Error::NoCapableModule`] when there are none
    ///
    /// # Errors
    ///
    /// Returns error if no plugin qualifies or metadata cannot be read
    pub fn capable(&self, capability: Capability) -> Result<Vec<Arc<Module>>> {
        let modules = self.registry.list_capable(capability)?;
        if modules.is_empty() {
            return Err(Error::NoCapableModule(capability));
        }
        Ok(modules)
    }

    /// Invoke a capability on one plugin
    ///
    /// # Errors
    ///
    /// Returns [`Error::Call`] if the plugin call fails
    pub async fn call(
        &self,
        module: &Module,
        capability: Capability,
        args: Vec<Value>,
    ) -> Result<Value> {
        let ctx = CallContext {
            timeout: self.call_timeout,
            user_variables: self.registry.user_variables(module.name())?,
        };

        module
            .invoke(capability, args, &ctx)
            .await
            .map_err(|source| Error::Call {
                plugin: module.name().to_string(),
                source,
            })
    }

    /// Invoke a capability on every capable plugin concurrently
    ///
    /// Results come back in plugin order. A plugin whose call fails is logged
    /// and contributes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCapableModule`] if no plugin qualifies
    pub async fn fan_out<T, F>(
        &self,
        capability: Capability,
        args: Vec<Value>,
        convert: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(&Module, Value) -> T,
    {
        let modules = self.capable(capability)?;

        let calls = modules.iter().map(|module| {
            let args = args.clone();
            async move { self.call(module, capability, args).await }
        });
        let results = join_all(calls).await;

        let mut contributions = Vec::with_capacity(modules.len());
        for (module, result) in modules.iter().zip(results) {
            match result {
                Ok(value) => contributions.push(convert(module.as_ref(), value)),
                Err(e) => {
                    tracing::warn!(
                        plugin = %module.name(),
                        capability = %capability,
                        error = %e,
                        "plugin call failed, skipping its results"
                    );
                }
            }
        }

        tracing::debug!(
            capability = %capability,
            plugins = modules.len(),
            succeeded = contributions.len(),
            "fan-out complete"
        );
        Ok(contributions)
    }

    /// Resolve the plugin a routed call must go to
    ///
    /// # Errors
    ///
    /// Returns error if no plugin has that name or it lacks the capability
    pub fn route(&self, platform: &str, capability: Capability) -> Result<Arc<Module>> {
        let module = self
            .registry
            .lookup_by_name(platform)
            .ok_or_else(|| Error::NotFound(format!("plugin {platform}")))?;
        if !module.supports(capability) {
            return Err(Error::Unsupported {
                plugin: platform.to_string(),
                capability,
            });
        }
        Ok(module)
    }
}

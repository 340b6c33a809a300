//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use semver::Version;
use tuneport::plugins::{Loader, SourceFetcher};
use tuneport::{Dispatcher, Error, PluginMetaRepo, Registry, Result, db};

/// Host version every test registry runs as
pub const HOST_VERSION: Version = Version::new(0, 4, 0);

/// Fetcher serving canned sources by URL
#[derive(Default)]
pub struct StubFetcher {
    sources: Mutex<HashMap<String, String>>,
}

impl StubFetcher {
    /// Serve `raw` for `url`, replacing any earlier source
    pub fn serve(&self, url: &str, raw: impl Into<String>) {
        self.sources
            .lock()
            .expect("stub fetcher lock poisoned")
            .insert(url.to_string(), raw.into());
    }
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.sources
            .lock()
            .expect("stub fetcher lock poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch(format!("404 for {url}")))
    }
}

/// Registry over an in-memory database with no source directory
#[must_use]
pub fn setup_registry(fetcher: Arc<dyn SourceFetcher>) -> Arc<Registry> {
    setup_registry_with_loader(Loader::new(HOST_VERSION), fetcher)
}

/// In-memory registry evaluating plugins with `loader`
#[must_use]
pub fn setup_registry_with_loader(loader: Loader, fetcher: Arc<dyn SourceFetcher>) -> Arc<Registry> {
    let pool = db::init_memory().expect("failed to init test db");
    Arc::new(Registry::new(loader, PluginMetaRepo::new(pool), fetcher))
}

/// Registry persisting sources under `dir`
#[must_use]
pub fn setup_registry_in(dir: &Path) -> Arc<Registry> {
    setup_registry_in_with(dir, Arc::new(StubFetcher::default()))
}

/// Registry persisting sources under `dir`, fetching through `fetcher`
#[must_use]
pub fn setup_registry_in_with(dir: &Path, fetcher: Arc<dyn SourceFetcher>) -> Arc<Registry> {
    let pool = db::init(dir.join("tuneport.db")).expect("failed to init test db");
    Arc::new(
        Registry::new(Loader::new(HOST_VERSION), PluginMetaRepo::new(pool), fetcher)
            .with_source_dir(dir.join("plugins")),
    )
}

/// Dispatcher over a fresh registry
#[must_use]
pub fn setup_dispatcher() -> Dispatcher {
    Dispatcher::new(setup_registry(Arc::new(StubFetcher::default())))
}

/// Minimal plugin source with a name and version
#[must_use]
pub fn plugin_source(name: &str, version: &str) -> String {
    format!("exports.platform = \"{name}\";\nexports.version = \"{version}\";\n")
}

/// Plugin whose search returns one fixed track
#[must_use]
pub fn search_plugin(name: &str, title: &str, artist: &str) -> String {
    format!(
        "{}exports.search = |query, page, ty| #{{ isEnd: true, data: [#{{ title: \"{title}\", artist: \"{artist}\" }}] }};\n",
        plugin_source(name, "1.0.0")
    )
}

/// Plugin whose search always throws
#[must_use]
pub fn throwing_search_plugin(name: &str) -> String {
    format!(
        "{}exports.search = |query, page, ty| {{ throw \"upstream unavailable\"; }};\n",
        plugin_source(name, "1.0.0")
    )
}

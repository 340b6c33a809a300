//! Plugin registry integration tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tuneport::plugins::{FailureReason, SourceFetcher, SourceOrigin};
use tuneport::{Capability, Error, InstallOptions, InstallStatus, Result, UpdateOutcome};

mod common;
use common::{
    StubFetcher, plugin_source, search_plugin, setup_registry, setup_registry_in,
    setup_registry_in_with,
};

/// Fetcher that parks until released, so a test can act mid-fetch
struct GatedFetcher {
    raw: String,
    started: Notify,
    release: Notify,
}

impl GatedFetcher {
    fn new(raw: String) -> Self {
        Self {
            raw,
            started: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl SourceFetcher for GatedFetcher {
    async fn fetch(&self, _url: &str) -> Result<String> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.raw.clone())
    }
}

fn names(modules: &[Arc<tuneport::Module>]) -> Vec<&str> {
    modules.iter().map(|m| m.name()).collect()
}

#[tokio::test]
async fn reinstalling_identical_source_is_a_no_op() {
    let registry = setup_registry(Arc::new(StubFetcher::default()));
    let raw = search_plugin("A", "X", "Y");

    let first = registry
        .install_source(raw.clone(), SourceOrigin::Inline, InstallOptions::default())
        .await
        .unwrap();
    let second = registry
        .install_source(raw, SourceOrigin::Inline, InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(first.status, InstallStatus::Installed);
    assert_eq!(second.status, InstallStatus::AlreadyInstalled);
    assert_eq!(registry.mounted().len(), 1);
}

#[tokio::test]
async fn older_version_is_rejected_unless_forced() {
    let registry = setup_registry(Arc::new(StubFetcher::default()));
    registry
        .install_source(plugin_source("A", "2.0.0"), SourceOrigin::Inline, InstallOptions::default())
        .await
        .unwrap();

    let err = registry
        .install_source(plugin_source("A", "1.0.0"), SourceOrigin::Inline, InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NewerVersionInstalled { .. }));
    assert_eq!(registry.lookup_by_name("A").unwrap().version(), Some("2.0.0"));

    let forced = registry
        .install_source(
            plugin_source("A", "1.0.0"),
            SourceOrigin::Inline,
            InstallOptions {
                skip_version_check: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(forced.status, InstallStatus::Replaced);
    assert_eq!(registry.lookup_by_name("A").unwrap().version(), Some("1.0.0"));
    assert_eq!(registry.mounted().len(), 1);
}

#[tokio::test]
async fn newer_version_replaces_in_place() {
    let registry = setup_registry(Arc::new(StubFetcher::default()));
    for name in ["A", "B"] {
        registry
            .install_source(plugin_source(name, "1.0.0"), SourceOrigin::Inline, InstallOptions::default())
            .await
            .unwrap();
    }

    let outcome = registry
        .install_source(plugin_source("A", "1.1.0"), SourceOrigin::Inline, InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, InstallStatus::Replaced);
    assert_eq!(names(&registry.mounted()), vec!["A", "B"]);
}

#[tokio::test]
async fn module_without_platform_is_never_capable() {
    let registry = setup_registry(Arc::new(StubFetcher::default()));
    let err = registry
        .install_source(
            "exports.search = |q, p, t| #{ isEnd: true, data: [] };",
            SourceOrigin::Inline,
            InstallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::LoadFailed {
            reason: FailureReason::InvalidModule,
            ..
        }
    ));
    assert!(registry.list_capable(Capability::Search).unwrap().is_empty());
    assert_eq!(registry.failures().len(), 1);
}

#[tokio::test]
async fn disabled_plugins_are_skipped_and_order_is_respected() {
    let registry = setup_registry(Arc::new(StubFetcher::default()));
    for name in ["A", "B", "C"] {
        registry
            .install_source(search_plugin(name, "t", "a"), SourceOrigin::Inline, InstallOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(
        names(&registry.list_capable(Capability::Search).unwrap()),
        vec!["A", "B", "C"]
    );

    registry
        .reorder(&["C".to_string(), "A".to_string()])
        .unwrap();
    assert_eq!(
        names(&registry.list_capable(Capability::Search).unwrap()),
        vec!["C", "A", "B"]
    );

    registry.set_enabled("A", false).unwrap();
    assert_eq!(
        names(&registry.list_capable(Capability::Search).unwrap()),
        vec!["C", "B"]
    );
    assert!(registry.lookup_by_name("A").is_some());
}

#[tokio::test]
async fn sources_and_metadata_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let registry = setup_registry_in(dir.path());
        registry.setup().await.unwrap();
        registry
            .install_source(search_plugin("A", "t", "a"), SourceOrigin::Inline, InstallOptions::default())
            .await
            .unwrap();
        registry
            .install_source(search_plugin("B", "t", "a"), SourceOrigin::Inline, InstallOptions::default())
            .await
            .unwrap();
        registry.set_enabled("B", false).unwrap();
    }

    let registry = setup_registry_in(dir.path());
    let mounted = registry.setup().await.unwrap();

    assert_eq!(mounted, 2);
    assert!(registry.lookup_by_name("A").is_some());
    assert!(!registry.is_enabled("B").unwrap());
    assert_eq!(
        names(&registry.list_capable(Capability::Search).unwrap()),
        vec!["A"]
    );
}

#[tokio::test]
async fn uninstall_removes_persisted_source() {
    let dir = tempfile::tempdir().unwrap();
    let registry = setup_registry_in(dir.path());
    let outcome = registry
        .install_source(plugin_source("A", "1.0.0"), SourceOrigin::Inline, InstallOptions::default())
        .await
        .unwrap();

    let persisted = dir.path().join("plugins").join(format!("{}.rhai", outcome.plugin_hash));
    assert!(persisted.exists());

    let removed = registry.uninstall(&outcome.plugin_hash).await.unwrap();
    assert_eq!(removed.unwrap().name(), "A");
    assert!(!persisted.exists());
    assert!(registry.uninstall(&outcome.plugin_hash).await.unwrap().is_none());
}

#[tokio::test]
async fn update_follows_source_url() {
    let fetcher = Arc::new(StubFetcher::default());
    let url = "https://plugins.example.com/a.rhai";
    let v1 = format!("{}exports.srcUrl = \"{url}\";\n", plugin_source("A", "1.0.0"));
    fetcher.serve(url, v1);

    let registry = setup_registry(Arc::<StubFetcher>::clone(&fetcher));
    let installed = registry
        .install_from_url(url, InstallOptions::default())
        .await
        .unwrap();

    let unchanged = registry.update(&installed.plugin_hash).await.unwrap();
    assert_eq!(unchanged, UpdateOutcome::AlreadyLatest);

    let v2 = format!("{}exports.srcUrl = \"{url}\";\n", plugin_source("A", "1.1.0"));
    fetcher.serve(url, v2);
    let updated = registry.update(&installed.plugin_hash).await.unwrap();

    let UpdateOutcome::Updated(outcome) = updated else {
        panic!("expected an update, got {updated:?}");
    };
    assert_eq!(outcome.status, InstallStatus::Replaced);
    assert_eq!(outcome.version.as_deref(), Some("1.1.0"));
    assert!(registry.lookup_by_identity(&installed.plugin_hash).is_none());
}

#[tokio::test]
async fn failed_fetch_installs_nothing() {
    let registry = setup_registry(Arc::new(StubFetcher::default()));
    let err = registry
        .install_from_url("https://plugins.example.com/missing.rhai", InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Fetch(_)));
    assert!(registry.modules().is_empty());
}

#[tokio::test]
async fn origin_survives_restart_for_update() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StubFetcher::default());
    let url = "https://plugins.example.com/b.rhai";
    fetcher.serve(url, plugin_source("B", "1.0.0"));

    let installed = {
        let registry = setup_registry_in_with(dir.path(), Arc::<StubFetcher>::clone(&fetcher));
        registry.setup().await.unwrap();
        registry
            .install_from_url(url, InstallOptions::default())
            .await
            .unwrap()
    };

    let registry = setup_registry_in_with(dir.path(), Arc::<StubFetcher>::clone(&fetcher));
    assert_eq!(registry.setup().await.unwrap(), 1);
    let module = registry.lookup_by_identity(&installed.plugin_hash).unwrap();
    assert_eq!(*module.origin(), SourceOrigin::Url(url.to_string()));

    fetcher.serve(url, plugin_source("B", "2.0.0"));
    let updated = registry.update(&installed.plugin_hash).await.unwrap();

    let UpdateOutcome::Updated(outcome) = updated else {
        panic!("expected an update, got {updated:?}");
    };
    assert_eq!(outcome.version.as_deref(), Some("2.0.0"));

    // The replacement keeps its origin across another restart
    let registry = setup_registry_in_with(dir.path(), fetcher);
    registry.setup().await.unwrap();
    let module = registry.lookup_by_name("B").unwrap();
    assert_eq!(module.version(), Some("2.0.0"));
    assert_eq!(*module.origin(), SourceOrigin::Url(url.to_string()));
}

#[tokio::test]
async fn file_origin_points_at_user_path_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let user_file = dir.path().join("mine.rhai");
    std::fs::write(&user_file, plugin_source("C", "1.0.0")).unwrap();

    let installed = {
        let registry = setup_registry_in(dir.path());
        registry
            .install_from_file(&user_file, InstallOptions::default())
            .await
            .unwrap()
    };

    std::fs::write(&user_file, plugin_source("C", "1.1.0")).unwrap();
    let registry = setup_registry_in(dir.path());
    registry.setup().await.unwrap();
    let updated = registry.update(&installed.plugin_hash).await.unwrap();

    assert!(matches!(updated, UpdateOutcome::Updated(ref o) if o.version.as_deref() == Some("1.1.0")));
}

#[tokio::test]
async fn uninstall_waits_for_running_update() {
    let fetcher = Arc::new(GatedFetcher::new(plugin_source("A", "1.1.0")));
    let registry = setup_registry(Arc::<GatedFetcher>::clone(&fetcher));
    let installed = registry
        .install_source(
            plugin_source("A", "1.0.0"),
            SourceOrigin::Url("https://plugins.example.com/a.rhai".to_string()),
            InstallOptions::default(),
        )
        .await
        .unwrap();

    let update = tokio::spawn({
        let registry = Arc::clone(&registry);
        let digest = installed.plugin_hash.clone();
        async move { registry.update(&digest).await }
    });
    fetcher.started.notified().await;

    let uninstall = tokio::spawn({
        let registry = Arc::clone(&registry);
        let digest = installed.plugin_hash.clone();
        async move { registry.uninstall(&digest).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!uninstall.is_finished());

    fetcher.release.notify_one();
    let updated = update.await.unwrap().unwrap();
    assert!(matches!(updated, UpdateOutcome::Updated(_)));

    // The uninstall ran after the update and found the old identity gone
    assert!(uninstall.await.unwrap().unwrap().is_none());
    assert_eq!(registry.lookup_by_name("A").unwrap().version(), Some("1.1.0"));
    assert_eq!(registry.mounted().len(), 1);
}

#[tokio::test]
async fn update_of_uninstalled_plugin_is_not_found() {
    let fetcher = Arc::new(StubFetcher::default());
    let url = "https://plugins.example.com/a.rhai";
    fetcher.serve(url, plugin_source("A", "1.0.0"));
    let registry = setup_registry(Arc::<StubFetcher>::clone(&fetcher));
    let installed = registry
        .install_from_url(url, InstallOptions::default())
        .await
        .unwrap();

    registry.uninstall(&installed.plugin_hash).await.unwrap();
    fetcher.serve(url, plugin_source("A", "1.1.0"));

    let err = registry.update(&installed.plugin_hash).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(registry.mounted().is_empty());
}

#[tokio::test]
async fn concurrent_installs_all_land() {
    let registry = setup_registry(Arc::new(StubFetcher::default()));

    let installs = (0..8).map(|i| {
        let registry = Arc::clone(&registry);
        async move {
            registry
                .install_source(
                    search_plugin(&format!("P{i}"), "t", "a"),
                    SourceOrigin::Inline,
                    InstallOptions::default(),
                )
                .await
        }
    });
    let outcomes = futures::future::join_all(installs).await;

    assert!(outcomes.iter().all(|o| o.as_ref().is_ok_and(|o| o.status == InstallStatus::Installed)));
    assert_eq!(registry.mounted().len(), 8);
    assert_eq!(registry.list_capable(Capability::Search).unwrap().len(), 8);
}

//! Polling watcher over a file-backed definition source.
//!
//! Every tick fingerprints the candidate manifest files (mtime + length).
//! Changed or new manifests are reloaded, removed manifests are unloaded.
//! Anything that prevents watching degrades to [`WatchStatus::Disabled`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::source::DirectorySource;
use super::{ModuleDescriptor, ModuleLoader};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WatchStatus {
    Watching {
        root: PathBuf,
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    Disabled {
        reason: String,
    },
}

impl WatchStatus {
    pub fn is_watching(&self) -> bool {
        matches!(self, WatchStatus::Watching { .. })
    }

    fn disabled(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(%reason, "module watching disabled");
        WatchStatus::Disabled { reason }
    }
}

type Fingerprint = BTreeMap<PathBuf, (Option<SystemTime>, u64)>;

async fn fingerprint(root: &Path) -> Fingerprint {
    let files = match DirectorySource::candidate_files(root).await {
        Ok(files) => files,
        Err(err) => {
            tracing::warn!(root = %root.display(), error = %err, "cannot scan module directory");
            return Fingerprint::new();
        }
    };
    let mut out = Fingerprint::new();
    for path in files {
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            out.insert(path, (meta.modified().ok(), meta.len()));
        }
    }
    out
}

impl ModuleLoader {
    /// Start polling the source's directory every `interval`. Replaces a
    /// running watcher.
    ///
    /// The baseline fingerprint is taken before this returns, so any edit
    /// made afterwards is seen by the first tick.
    pub async fn watch(self: &Arc<Self>, interval: Duration) -> WatchStatus {
        let Some(root) = self.source.watch_root() else {
            return WatchStatus::disabled("definition source is not file-backed");
        };
        if interval.is_zero() {
            return WatchStatus::disabled("poll interval must be non-zero");
        }
        if !root.is_dir() {
            return WatchStatus::disabled(format!("{} is not a directory", root.display()));
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return WatchStatus::disabled("no async runtime available");
        };

        let baseline = fingerprint(&root).await;
        let cancel = self.ctx.cancellation_token().child_token();
        if let Some(previous) = self.watcher.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        runtime.spawn(poll(
            Arc::downgrade(self),
            root.clone(),
            baseline,
            interval,
            cancel,
        ));
        tracing::info!(root = %root.display(), ?interval, "watching module directory");
        WatchStatus::Watching { root, interval }
    }

    /// Returns `true` if a watcher was running.
    pub fn stop_watching(&self) -> bool {
        match self.watcher.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    async fn apply_changes(&self, changed: &BTreeSet<PathBuf>, removed: &BTreeSet<PathBuf>) {
        let before = self.descriptors();
        let after = match self.discover().await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(error = %err, "module re-discovery failed");
                return;
            }
        };
        let located = |list: &[ModuleDescriptor], paths: &BTreeSet<PathBuf>| -> Vec<String> {
            list.iter()
                .filter(|d| d.location.as_ref().is_some_and(|p| paths.contains(p)))
                .map(|d| d.id.clone())
                .collect()
        };

        for id in located(&before, removed) {
            if after.iter().any(|d| d.id == id) {
                continue;
            }
            if let Err(err) = self.unload(&id, false).await {
                tracing::warn!(module = %id, error = %err, "failed to unload removed module");
            }
        }

        for descriptor in after
            .iter()
            .filter(|d| d.location.as_ref().is_some_and(|p| changed.contains(p)))
        {
            let id = &descriptor.id;
            if !self.is_enabled(descriptor).await {
                if self.registry.contains(id) || self.cached(id).is_some() {
                    if let Err(err) = self.unload(id, false).await {
                        tracing::warn!(module = %id, error = %err, "failed to unload disabled module");
                    }
                }
                continue;
            }
            match self.reload(id).await {
                Ok(_) => {}
                Err(err) => tracing::error!(module = %id, error = %err, "automatic reload failed"),
            }
        }
    }
}

async fn poll(
    loader: Weak<ModuleLoader>,
    root: PathBuf,
    mut last: Fingerprint,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let current = fingerprint(&root).await;
        if current == last {
            continue;
        }
        let changed: BTreeSet<PathBuf> = current
            .iter()
            .filter(|(path, fp)| last.get(*path) != Some(*fp))
            .map(|(path, _)| path.clone())
            .collect();
        let removed: BTreeSet<PathBuf> = last
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        last = current;

        let Some(loader) = loader.upgrade() else {
            break;
        };
        tracing::debug!(changed = changed.len(), removed = removed.len(), "module manifests changed");
        loader.apply_changes(&changed, &removed).await;
    }
    tracing::debug!(root = %root.display(), "module watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use async_trait::async_trait;

    use super::*;
    use crate::contracts::{Module, ModuleDefinition};
    use crate::context::ModuleCtx;
    use crate::loader::{ModuleCatalog, ModuleManifest, StaticSource};
    use crate::registry::ModuleRegistry;

    struct Versioned;

    #[async_trait]
    impl Module for Versioned {
        fn id(&self) -> &str {
            "inventory"
        }

        fn name(&self) -> &str {
            "Inventory"
        }

        async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<ModuleDefinition> {
            Ok(ModuleDefinition::new("inventory", "Inventory"))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new().with(
            "inventory",
            |_m: &ModuleManifest| -> anyhow::Result<Arc<dyn Module>> { Ok(Arc::new(Versioned)) },
        )
    }

    #[tokio::test]
    async fn static_source_cannot_be_watched() {
        let loader = Arc::new(ModuleLoader::new(
            Arc::new(ModuleRegistry::default()),
            Arc::new(StaticSource::default()),
            catalog(),
            ModuleCtx::default(),
        ));
        assert!(!loader.watch(Duration::from_millis(20)).await.is_watching());
        assert!(!loader.stop_watching());
    }

    #[tokio::test]
    async fn changed_manifest_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("inventory.yaml");
        std::fs::write(&file, "id: inventory\nname: Inventory\nversion: '1.0'\n").unwrap();

        let registry = Arc::new(ModuleRegistry::default());
        let loader = Arc::new(ModuleLoader::new(
            registry.clone(),
            Arc::new(DirectorySource::new(dir.path())),
            catalog(),
            ModuleCtx::default(),
        ));
        loader.install_enabled().await.unwrap();
        assert_eq!(registry.snapshot("inventory").unwrap().version.as_deref(), Some("1.0"));

        assert!(loader.watch(Duration::from_millis(20)).await.is_watching());
        std::fs::write(&file, "id: inventory\nname: Inventory\nversion: '1.10'\n").unwrap();

        let mut reloaded = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if registry.snapshot("inventory").and_then(|e| e.version).as_deref() == Some("1.10") {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "manifest change was not picked up");

        std::fs::remove_file(&file).unwrap();
        let mut removed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !registry.contains("inventory") {
                removed = true;
                break;
            }
        }
        assert!(removed, "removed manifest was not unloaded");
        assert!(loader.stop_watching());
    }
}

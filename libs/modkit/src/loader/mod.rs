//! Bridge between a module-definition source and the registry.
//!
//! Discovery is a cheap pre-scan of manifests. `load` instantiates a module
//! through its factory, runs `initialize` once and caches the result by id:
//! repeat loads hand back the same `Arc` until `reload` or `unload`.

mod factory;
mod manifest;
mod settings;
mod source;
mod watch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::contracts::{ConfigMap, Module, ModuleDefinition};
use crate::context::ModuleCtx;
use crate::entry::ModuleEntry;
use crate::error::{LoaderError, ValidationReport};
use crate::graph::topo_sort;
use crate::guard::guarded_with_timeout;
use crate::registry::{ModuleRegistry, RegisterOptions, UnregisterOptions};

pub use factory::{ModuleCatalog, ModuleFactory};
pub use manifest::{ModuleDescriptor, ModuleManifest};
pub use settings::{InMemorySettingsStore, ModuleSettings, ModuleSettingsStore};
pub use source::{DefinitionSource, DirectorySource, LayeredSource, StaticSource};
pub use watch::WatchStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Poll the module directory and reload changed manifests.
    pub watch: bool,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            watch: false,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// An instantiated module together with the definition its `initialize`
/// produced (already merged with manifest and host configuration).
pub struct LoadedModule {
    module: Arc<dyn Module>,
    definition: ModuleDefinition,
    manifest: ModuleManifest,
    loaded_at: DateTime<Utc>,
    settings: RwLock<Option<ModuleSettings>>,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.definition.id)
            .field("factory", &self.manifest.factory_key())
            .field("loaded_at", &self.loaded_at)
            .field("settings", &*self.settings.read())
            .finish()
    }
}

impl LoadedModule {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn definition(&self) -> &ModuleDefinition {
        &self.definition
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Settings attached by `load_enabled`, if any.
    pub fn settings(&self) -> Option<ModuleSettings> {
        self.settings.read().clone()
    }

    fn attach_settings(&self, settings: ModuleSettings) {
        *self.settings.write() = Some(settings);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub module_id: String,
    pub error: String,
}

/// Outcome of `load_enabled`.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Ordered by display order, then id.
    pub loaded: Vec<Arc<LoadedModule>>,
    /// Disabled by settings or manifest.
    pub skipped: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

/// Outcome of `install_enabled`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct InstallReport {
    /// Registered ids, in dependency order.
    pub installed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

pub struct ModuleLoader {
    registry: Arc<ModuleRegistry>,
    source: Arc<dyn DefinitionSource>,
    catalog: ModuleCatalog,
    ctx: ModuleCtx,
    settings: Option<Arc<dyn ModuleSettingsStore>>,
    descriptors: RwLock<Vec<ModuleDescriptor>>,
    cache: DashMap<String, Arc<LoadedModule>>,
    load_gate: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut cached: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        cached.sort();
        f.debug_struct("ModuleLoader")
            .field("catalog", &self.catalog)
            .field("cached", &cached)
            .field("watching", &self.watcher.lock().is_some())
            .finish()
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        if let Some(token) = self.watcher.get_mut().take() {
            token.cancel();
        }
    }
}

impl ModuleLoader {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        source: Arc<dyn DefinitionSource>,
        catalog: ModuleCatalog,
        ctx: ModuleCtx,
    ) -> Self {
        Self {
            registry,
            source,
            catalog,
            ctx,
            settings: None,
            descriptors: RwLock::new(Vec::new()),
            cache: DashMap::new(),
            load_gate: tokio::sync::Mutex::new(()),
            watcher: Mutex::new(None),
        }
    }

    /// Use `store` to decide which modules `load_enabled` picks up.
    pub fn with_settings(mut self, store: Arc<dyn ModuleSettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Descriptors from the most recent `discover`.
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.descriptors.read().clone()
    }

    pub fn cached(&self, id: &str) -> Option<Arc<LoadedModule>> {
        self.cache.get(id).map(|r| r.value().clone())
    }

    pub fn loaded(&self) -> Vec<Arc<LoadedModule>> {
        let mut all: Vec<_> = self.cache.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub async fn discover(&self) -> Result<Vec<ModuleDescriptor>, LoaderError> {
        let found = self.source.discover().await?;
        *self.descriptors.write() = found.clone();
        Ok(found)
    }

    /// Instantiate `id`, or return the cached instance.
    pub async fn load(&self, id: &str) -> Result<Arc<LoadedModule>, LoaderError> {
        if let Some(hit) = self.cached(id) {
            tracing::trace!(module = %id, "module served from loader cache");
            return Ok(hit);
        }

        let _gate = self.load_gate.lock().await;
        // another caller may have finished the same load while we queued
        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }

        let loaded = Arc::new(self.instantiate(id).await?);
        self.cache.insert(id.to_string(), loaded.clone());
        tracing::info!(module = %id, factory = loaded.manifest.factory_key(), "module loaded");
        Ok(loaded)
    }

    async fn instantiate(&self, id: &str) -> Result<LoadedModule, LoaderError> {
        let manifest = self.source.fetch(id).await?;
        let shape = manifest.shape_errors();
        if !shape.is_empty() {
            return Err(invalid(id, shape));
        }

        let factory_key = manifest.factory_key().to_string();
        let factory = self
            .catalog
            .get(&factory_key)
            .ok_or_else(|| LoaderError::UnknownFactory {
                module_id: id.to_string(),
                factory: factory_key.clone(),
            })?;
        let module = factory
            .create(&manifest)
            .map_err(|source| LoaderError::Initialize {
                module_id: id.to_string(),
                source,
            })?;

        let mut errors = Vec::new();
        if module.id() != manifest.id {
            errors.push(format!(
                "id: factory '{factory_key}' produced module '{}' for manifest '{}'",
                module.id(),
                manifest.id
            ));
        }
        if module.name().trim().is_empty() {
            errors.push("name: module reports an empty name".to_string());
        }
        if !errors.is_empty() {
            return Err(invalid(id, errors));
        }

        let ctx = self.ctx.clone().for_module(&manifest.id);
        let host_config = ctx.raw_module_config();
        let init_module = module.clone();
        let definition = guarded_with_timeout(self.registry.config().hook_timeout, move || {
            async move { init_module.initialize(&ctx).await }.boxed()
        })
        .await
        .map_err(|source| LoaderError::Initialize {
            module_id: id.to_string(),
            source,
        })?;

        if definition.id != manifest.id {
            errors.push(format!(
                "id: initialize returned '{}' for manifest '{}'",
                definition.id, manifest.id
            ));
        }
        let definition = merge_definition(definition, &manifest, module.as_ref(), host_config);
        if let Err(config_errors) = module.validate_config(&definition.config) {
            errors.extend(config_errors.into_iter().map(|e| format!("config: {e}")));
        }
        if !errors.is_empty() {
            return Err(invalid(id, errors));
        }

        Ok(LoadedModule {
            module,
            definition,
            manifest,
            loaded_at: Utc::now(),
            settings: RwLock::new(None),
        })
    }

    /// Load `id` and register it.
    pub async fn install(&self, id: &str) -> Result<ModuleEntry, LoaderError> {
        let loaded = self.load(id).await?;
        Ok(self
            .registry
            .register(loaded.definition().clone(), RegisterOptions::default())
            .await?)
    }

    async fn settings_for(&self, id: &str) -> Option<ModuleSettings> {
        let store = self.settings.as_ref()?;
        match store.get(id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(module = %id, error = %err, "module settings unavailable; using manifest default");
                None
            }
        }
    }

    async fn is_enabled(&self, descriptor: &ModuleDescriptor) -> bool {
        self.settings_for(&descriptor.id)
            .await
            .map_or(descriptor.enabled, |s| s.enabled)
    }

    /// Load every module the settings store (or, without a stored
    /// preference, the manifest) marks enabled. Per-module failures are
    /// collected, not returned.
    pub async fn load_enabled(&self) -> Result<LoadReport, LoaderError> {
        let mut report = LoadReport::default();
        for descriptor in self.discover().await? {
            let settings = self.settings_for(&descriptor.id).await;
            let enabled = settings.as_ref().map_or(descriptor.enabled, |s| s.enabled);
            if !enabled {
                tracing::debug!(module = %descriptor.id, "module disabled; not loading");
                report.skipped.push(descriptor.id);
                continue;
            }
            match self.load(&descriptor.id).await {
                Ok(loaded) => {
                    loaded.attach_settings(
                        settings.unwrap_or_else(|| ModuleSettings::enabled(&descriptor.id)),
                    );
                    report.loaded.push(loaded);
                }
                Err(err) => {
                    tracing::error!(module = %descriptor.id, error = %err, "failed to load module");
                    report.failed.push(LoadFailure {
                        module_id: descriptor.id,
                        error: err.to_string(),
                    });
                }
            }
        }
        report.loaded.sort_by_key(|m| {
            (
                m.settings().and_then(|s| s.display_order).unwrap_or(u32::MAX),
                m.id().to_string(),
            )
        });
        Ok(report)
    }

    /// `load_enabled`, then register the loaded modules in dependency order.
    pub async fn install_enabled(&self) -> Result<InstallReport, LoaderError> {
        let loaded = self.load_enabled().await?;
        let order = topo_sort(loaded.loaded.iter().map(|m| {
            (
                m.id(),
                m.definition().dependencies.iter().map(String::as_str),
            )
        }))
        .map_err(|path| LoaderError::DependencyCycle { path })?;

        let by_id: HashMap<&str, &Arc<LoadedModule>> =
            loaded.loaded.iter().map(|m| (m.id(), m)).collect();
        let mut report = InstallReport {
            installed: Vec::new(),
            skipped: loaded.skipped.clone(),
            failed: loaded.failed.clone(),
        };

        for id in order {
            let Some(module) = by_id.get(id.as_str()) else {
                continue;
            };
            match self
                .registry
                .register(module.definition().clone(), RegisterOptions::default())
                .await
            {
                Ok(_) => report.installed.push(id),
                Err(err) => {
                    tracing::error!(module = %id, error = %err, "failed to install module");
                    report.failed.push(LoadFailure {
                        module_id: id,
                        error: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            installed = report.installed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "enabled modules installed"
        );
        Ok(report)
    }

    /// Drop the cached instance, re-discover, load again and re-register
    /// (unregister and register both forced).
    pub async fn reload(&self, id: &str) -> Result<ModuleEntry, LoaderError> {
        let previous = self.cache.remove(id).map(|(_, m)| m);
        self.discover().await?;
        let loaded = self.load(id).await?;
        let settings = match previous.and_then(|m| m.settings()) {
            Some(s) => Some(s),
            None => self.settings_for(id).await,
        };
        if let Some(settings) = settings {
            loaded.attach_settings(settings);
        }

        if self.registry.contains(id) {
            self.registry
                .unregister(id, UnregisterOptions { force: true })
                .await?;
        }
        let entry = self
            .registry
            .register(loaded.definition().clone(), RegisterOptions { force: true })
            .await?;
        tracing::info!(module = %id, "module reloaded");
        Ok(entry)
    }

    /// Unregister `id` and forget its cached instance. `Ok(None)` when only the
    /// cache held it.
    pub async fn unload(&self, id: &str, force: bool) -> Result<Option<ModuleEntry>, LoaderError> {
        let removed = if self.registry.contains(id) {
            Some(
                self.registry
                    .unregister(id, UnregisterOptions { force })
                    .await?,
            )
        } else {
            None
        };
        let was_cached = self.cache.remove(id).is_some();
        if removed.is_none() && !was_cached {
            return Err(LoaderError::NotFound(id.to_string()));
        }
        tracing::info!(module = %id, "module unloaded");
        Ok(removed)
    }
}

fn invalid(id: &str, errors: Vec<String>) -> LoaderError {
    LoaderError::Invalid {
        module_id: id.to_string(),
        report: ValidationReport::from_errors(errors, Vec::new()),
    }
}

/// Layer configuration `default_config < definition < manifest < host` and
/// let the manifest's declarative fields win over what `initialize` returned.
fn merge_definition(
    mut def: ModuleDefinition,
    manifest: &ModuleManifest,
    module: &dyn Module,
    host_config: Option<ConfigMap>,
) -> ModuleDefinition {
    let mut config = module.default_config();
    config.extend(std::mem::take(&mut def.config));
    config.extend(manifest.config.clone());
    if let Some(host) = host_config {
        config.extend(host);
    }
    def.config = config;

    def.id = manifest.id.clone();
    def.name = manifest.name.clone();
    if manifest.version.is_some() {
        def.version = manifest.version.clone();
    }
    if manifest.description.is_some() {
        def.description = manifest.description.clone();
    }
    extend_unique(&mut def.dependencies, &manifest.dependencies);
    extend_unique(&mut def.conflicts, &manifest.conflicts);

    let meta = &manifest.metadata;
    if meta.route_prefix.is_some() {
        def.metadata.route_prefix = meta.route_prefix.clone();
    }
    if meta.author.is_some() {
        def.metadata.author = meta.author.clone();
    }
    extend_unique(&mut def.metadata.tags, &meta.tags);
    def.metadata.extra.extend(meta.extra.clone());
    def
}

fn extend_unique(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

//! Wiring: registry, router integration, loader and the HTTP ingress.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use api_ingress::ApiIngress;
use modkit::{
    ClientHub, DefinitionSource, DirectorySource, LayeredSource, LoaderError, ModuleCtxBuilder,
    ModuleDescriptor, ModuleLoader, ModuleRegistry, RouterIntegration, StaticSource,
    ValidationReport,
};
use runtime::{AppConfig, AppConfigProvider};
use tokio_util::sync::CancellationToken;

use crate::builtin::{self, FindingStore};

const FINDINGS_FILE: &str = "findings.json";

/// Everything a running server holds on to.
pub struct Host {
    pub registry: Arc<ModuleRegistry>,
    pub routes: Arc<RouterIntegration>,
    pub ingress: Arc<ApiIngress>,
    pub loader: Arc<ModuleLoader>,
    pub cancel: CancellationToken,
}

/// Built-in manifests, overlaid by the module directory when configured.
fn definition_source(config: &AppConfig) -> Arc<dyn DefinitionSource> {
    let mut source =
        LayeredSource::new().with_layer(Arc::new(StaticSource::new(builtin::manifests())));
    if let Some(dir) = config.modules_dir() {
        tracing::info!(dir = %dir.display(), "scanning module directory");
        source = source.with_layer(Arc::new(DirectorySource::new(dir)));
    }
    Arc::new(source)
}

/// `{home_dir}/findings.json`, when present, becomes the storage handle.
fn findings_store(config: &AppConfig) -> Result<Option<Arc<FindingStore>>> {
    let path = config.home_dir().join(FINDINGS_FILE);
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "no findings file");
        return Ok(None);
    }
    let store = FindingStore::from_file(&path)?;
    tracing::info!(path = %path.display(), findings = store.len(), "findings loaded");
    Ok(Some(Arc::new(store)))
}

impl Host {
    pub fn build(config: &AppConfig, cancel: CancellationToken) -> Result<Self> {
        let registry = Arc::new(ModuleRegistry::new(config.registry.clone()));
        let ingress = Arc::new(ApiIngress::new(config.ingress.clone()));
        let routes = RouterIntegration::attach(&registry, ingress.clone(), config.router.clone());

        let hub = Arc::new(ClientHub::new());
        hub.register(registry.clone());
        hub.register(routes.clone());

        let mut ctx = ModuleCtxBuilder::new(cancel.child_token())
            .with_config_provider(Arc::new(AppConfigProvider::new(config)))
            .with_client_hub(hub);
        if let Some(store) = findings_store(config)? {
            ctx = ctx.with_db(store);
        }

        let loader = Arc::new(
            ModuleLoader::new(
                registry.clone(),
                definition_source(config),
                builtin::catalog(),
                ctx.build(),
            )
            .with_settings(Arc::new(config.settings_store())),
        );

        Ok(Self {
            registry,
            routes,
            ingress,
            loader,
            cancel,
        })
    }

    /// Install enabled modules, optionally watch the module directory, then
    /// serve until cancelled.
    pub async fn run(self, config: &AppConfig) -> Result<()> {
        let report = self.loader.install_enabled().await?;
        for failure in &report.failed {
            tracing::warn!(module = %failure.module_id, error = %failure.error, "module not installed");
        }

        if config.loader.watch {
            let status = self.loader.watch(config.loader.poll_interval).await;
            tracing::info!(?status, "module watcher");
        }

        let addr: SocketAddr = config
            .bind_addr()
            .parse()
            .with_context(|| format!("invalid bind address '{}'", config.bind_addr()))?;
        let served = self.ingress.clone().serve(addr, self.cancel.clone()).await;

        self.loader.stop_watching();
        let cleared = self.registry.clear_registry(true).await;
        tracing::info!(
            removed = cleared.cleared.len(),
            failed = cleared.failed.len(),
            "modules unloaded"
        );
        served
    }

    /// Load every discovered module without registering it.
    pub async fn check(&self) -> Result<Vec<(ModuleDescriptor, ValidationReport)>> {
        let mut out = Vec::new();
        for descriptor in self.loader.discover().await? {
            let report = match self.loader.load(&descriptor.id).await {
                Ok(_) => ValidationReport::from_errors(Vec::new(), Vec::new()),
                Err(LoaderError::Invalid { report, .. }) => report,
                Err(err) => ValidationReport::from_errors(vec![err.to_string()], Vec::new()),
            };
            out.push((descriptor, report));
        }
        Ok(out)
    }

    pub async fn discover(&self) -> Result<Vec<ModuleDescriptor>> {
        Ok(self.loader.discover().await?)
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(()) => tracing::info!("shutdown: signal received"),
            Err(e) => {
                tracing::warn!(error = %e, "shutdown: signal listener failed; falling back to ctrl_c()");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        token.cancel();
    });
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::inspector_reports;
    use crate::builtin::registry_admin;
    use modkit::ModuleState;
    use std::fs;
    use tempfile::tempdir;

    fn config_in(home: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.server.home_dir = home.to_string_lossy().to_string();
        config
    }

    #[tokio::test]
    async fn installs_builtins_and_mounts_them() {
        let home = tempdir().unwrap();
        let host = Host::build(&config_in(home.path()), CancellationToken::new()).unwrap();

        let report = host.loader.install_enabled().await.unwrap();
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(report.installed.len(), 2);
        assert_eq!(
            host.registry.state_of(registry_admin::MODULE_ID),
            Some(ModuleState::Active)
        );

        let mut prefixes = host.ingress.mounted_prefixes();
        prefixes.sort();
        assert_eq!(prefixes, vec!["/api/inspector", "/api/registry"]);
        assert!(host.routes.has_registered_routes(inspector_reports::MODULE_ID));
    }

    #[tokio::test]
    async fn module_directory_overrides_builtin_manifests() {
        let home = tempdir().unwrap();
        let modules = tempdir().unwrap();
        fs::write(
            modules.path().join("inspector.yaml"),
            "id: inspector-reports\nname: Inspector Reports\nenabled: false\n",
        )
        .unwrap();

        let mut config = config_in(home.path());
        config.modules_dir = Some(modules.path().to_string_lossy().to_string());
        let host = Host::build(&config, CancellationToken::new()).unwrap();

        let report = host.loader.install_enabled().await.unwrap();
        assert_eq!(report.installed, vec![registry_admin::MODULE_ID.to_string()]);
        assert_eq!(report.skipped, vec![inspector_reports::MODULE_ID.to_string()]);
    }

    #[tokio::test]
    async fn check_reports_invalid_module_config() {
        let home = tempdir().unwrap();
        let mut config = config_in(home.path());
        config.modules.insert(
            inspector_reports::MODULE_ID.to_string(),
            serde_json::json!({ "min_severity": "SEVERE" }),
        );
        let host = Host::build(&config, CancellationToken::new()).unwrap();

        let results = host.check().await.unwrap();
        let (_, inspector) = results
            .iter()
            .find(|(d, _)| d.id == inspector_reports::MODULE_ID)
            .unwrap();
        assert!(!inspector.is_valid);
        assert!(
            inspector.errors.iter().any(|e| e.contains("min_severity")),
            "{:?}",
            inspector.errors
        );

        let (_, admin) = results
            .iter()
            .find(|(d, _)| d.id == registry_admin::MODULE_ID)
            .unwrap();
        assert!(admin.is_valid);
        assert!(host.registry.is_empty());
    }

    #[test]
    fn findings_file_in_home_dir_is_loaded() {
        let home = tempdir().unwrap();
        fs::write(
            home.path().join(FINDINGS_FILE),
            r#"[{"id":"f-1","title":"OpenSSL","severity":"HIGH","resource":"i-0abc"}]"#,
        )
        .unwrap();
        let store = findings_store(&config_in(home.path())).unwrap().unwrap();
        assert_eq!(store.len(), 1);

        let empty = tempdir().unwrap();
        assert!(findings_store(&config_in(empty.path())).unwrap().is_none());
    }
}

use std::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::client_hub::ClientHub;
use crate::contracts::ConfigMap;

/// Opaque storage handle handed to modules. The host decides the concrete type;
/// modules that know it can downcast with [`ModuleCtx::db_as`].
pub type DbHandle = Arc<dyn Any + Send + Sync>;

/// Provider of module-specific configuration (raw JSON sections only).
pub trait ConfigProvider: Send + Sync {
    /// Returns raw JSON section for the module, if any.
    fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value>;
}

/// Collaborator context passed to `Module::initialize`.
#[derive(Clone)]
pub struct ModuleCtx {
    pub(crate) db: Option<DbHandle>,
    pub(crate) config_provider: Option<Arc<dyn ConfigProvider>>,
    pub(crate) client_hub: Arc<ClientHub>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) module_id: Option<Arc<str>>,
}

pub struct ModuleCtxBuilder {
    inner: ModuleCtx,
}

impl ModuleCtxBuilder {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: ModuleCtx {
                db: None,
                config_provider: None,
                client_hub: Arc::new(ClientHub::default()),
                cancellation_token: token,
                module_id: None,
            },
        }
    }

    pub fn with_db(mut self, db: DbHandle) -> Self {
        self.inner.db = Some(db);
        self
    }

    pub fn with_config_provider(mut self, p: Arc<dyn ConfigProvider>) -> Self {
        self.inner.config_provider = Some(p);
        self
    }

    pub fn with_client_hub(mut self, hub: Arc<ClientHub>) -> Self {
        self.inner.client_hub = hub;
        self
    }

    pub fn build(self) -> ModuleCtx {
        self.inner
    }
}

impl Default for ModuleCtx {
    fn default() -> Self {
        ModuleCtxBuilder::new(CancellationToken::new()).build()
    }
}

impl ModuleCtx {
    /// Scope context to a specific module (used by the loader).
    pub(crate) fn for_module(mut self, id: &str) -> Self {
        self.module_id = Some(Arc::<str>::from(id));
        self
    }

    pub fn db(&self) -> Option<DbHandle> {
        self.db.clone()
    }

    /// Typed view of the storage handle; `None` when absent or of another type.
    pub fn db_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.db.clone()?.downcast::<T>().ok()
    }

    pub fn client_hub(&self) -> Arc<ClientHub> {
        self.client_hub.clone()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn current_module(&self) -> Option<&str> {
        self.module_id.as_deref()
    }

    /// Host-provided configuration section for the scoped module, if it is an object.
    pub fn raw_module_config(&self) -> Option<ConfigMap> {
        let id = self.module_id.as_deref()?;
        match self.config_provider.as_ref()?.get_module_config(id)? {
            serde_json::Value::Object(map) => Some(map.clone()),
            _ => None,
        }
    }

    /// Best-effort: deserialize the module's config into `T`, fallback to `T::default()`
    /// if section is missing or invalid.
    pub fn module_config<T: DeserializeOwned + Default>(&self) -> T {
        match (&self.module_id, &self.config_provider) {
            (Some(id), Some(p)) => p
                .get_module_config(id)
                .and_then(|v| serde_json::from_value::<T>(v.clone()).ok())
                .unwrap_or_default(),
            _ => T::default(),
        }
    }

    /// Strict: deserialize the module's config into `T`, returning a pathful error on failure.
    pub fn module_config_required<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let id = self
            .module_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("context is not scoped to a module"))?;

        let prov = self
            .config_provider
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no ConfigProvider"))?;

        let val = prov
            .get_module_config(id)
            .ok_or_else(|| anyhow::anyhow!("missing module config: {id}"))?;

        serde_json::from_value(val.clone()).map_err(|e| anyhow::anyhow!("invalid {id} config: {e}"))
    }
}

//! The shape every module has to satisfy before the registry accepts it.
//!
//! A module is compiled code (an implementation of [`Module`]) plus the
//! declarative [`ModuleDefinition`] it hands back from `initialize`. The
//! definition is what gets validated, conflict-checked and stored; its
//! callables (handlers, middleware, hooks, exports) are owned by the module and
//! only ever shared by `Arc`.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::ModuleCtx;

/// Module-specific configuration: key → arbitrary JSON value.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Core module contract.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Build the registrable definition. Called once per load; the loader
    /// caches the result until an explicit reload/unload.
    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<ModuleDefinition>;

    /// Defaults merged underneath manifest and host configuration.
    fn default_config(&self) -> ConfigMap {
        ConfigMap::new()
    }

    /// Reject a merged configuration. Every returned string is reported.
    fn validate_config(&self, _config: &ConfigMap) -> Result<(), Vec<String>> {
        Ok(())
    }

    /// Optional UI fragment rendered by the dashboard for this module's tab.
    fn tab_content(&self, _ctx: &ModuleContext) -> Option<String> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

// ----- Route declarations ----------------------------------------------------

/// Per-request context injected into every module handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContext {
    pub module_id: String,
    pub module_name: String,
    pub route_path: String,
}

/// What a wrapped handler receives: the module context and the raw request.
pub struct RouteRequest {
    pub context: ModuleContext,
    pub request: Request,
}

pub type RouteHandler =
    Arc<dyn Fn(RouteRequest) -> BoxFuture<'static, anyhow::Result<Response>> + Send + Sync>;

pub type Middleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;

/// Adapt an async closure into a [`RouteHandler`].
pub fn handler<F, Fut, R>(f: F) -> RouteHandler
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(
        move |req: RouteRequest| -> BoxFuture<'static, anyhow::Result<Response>> {
            let fut = f(req);
            Box::pin(async move { fut.await.map(IntoResponse::into_response) })
        },
    )
}

/// Adapt an async closure into a [`Middleware`].
pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req: Request, next: Next| -> BoxFuture<'static, Response> {
        Box::pin(f(req, next))
    })
}

/// One declared route. `method` stays a string until mount time, where
/// unsupported verbs are rejected.
#[derive(Clone)]
pub struct RouteSpec {
    pub path: String,
    pub method: String,
    pub handler: Option<RouteHandler>,
    pub middleware: Vec<Middleware>,
}

impl RouteSpec {
    pub fn new(method: impl Into<String>, path: impl Into<String>, handler: RouteHandler) -> Self {
        Self {
            path: path.into(),
            method: method.into().to_ascii_uppercase(),
            handler: Some(handler),
            middleware: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>, handler: RouteHandler) -> Self {
        Self::new("GET", path, handler)
    }

    pub fn post(path: impl Into<String>, handler: RouteHandler) -> Self {
        Self::new("POST", path, handler)
    }

    pub fn put(path: impl Into<String>, handler: RouteHandler) -> Self {
        Self::new("PUT", path, handler)
    }

    pub fn patch(path: impl Into<String>, handler: RouteHandler) -> Self {
        Self::new("PATCH", path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: RouteHandler) -> Self {
        Self::new("DELETE", path, handler)
    }

    pub fn all(path: impl Into<String>, handler: RouteHandler) -> Self {
        Self::new("ALL", path, handler)
    }

    /// A declaration without a handler; mounting it fails.
    pub fn unbound(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into().to_ascii_uppercase(),
            handler: None,
            middleware: Vec::new(),
        }
    }

    pub fn with_middleware(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSpec")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("has_handler", &self.handler.is_some())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Route declarations come either as an ordered list or keyed by path.
/// In the keyed shape the map key wins over `RouteSpec::path`.
#[derive(Clone, Debug)]
pub enum RouteTable {
    List(Vec<RouteSpec>),
    Map(BTreeMap<String, RouteSpec>),
}

impl Default for RouteTable {
    fn default() -> Self {
        RouteTable::List(Vec::new())
    }
}

impl RouteTable {
    /// `(path, spec)` pairs in declaration (list) or key (map) order.
    pub fn resolved(&self) -> Vec<(&str, &RouteSpec)> {
        match self {
            RouteTable::List(items) => items.iter().map(|r| (r.path.as_str(), r)).collect(),
            RouteTable::Map(items) => items.iter().map(|(p, r)| (p.as_str(), r)).collect(),
        }
    }

    pub fn paths(&self) -> Vec<&str> {
        self.resolved().into_iter().map(|(p, _)| p).collect()
    }

    pub fn len(&self) -> usize {
        match self {
            RouteTable::List(items) => items.len(),
            RouteTable::Map(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn descriptors(&self) -> Vec<RouteDescriptor> {
        self.resolved()
            .into_iter()
            .map(|(path, spec)| RouteDescriptor {
                method: spec.method.clone(),
                path: path.to_string(),
            })
            .collect()
    }
}

/// Data-only view of a route declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub method: String,
    pub path: String,
}

// ----- Hooks -----------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HookContext {
    pub module_id: String,
    pub config: ConfigMap,
}

#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub module_id: String,
    pub old_config: ConfigMap,
    pub new_config: ConfigMap,
}

pub type LifecycleHook =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub type ConfigChangeHook =
    Arc<dyn Fn(ConfigChange) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ModuleHooks {
    pub init: Option<LifecycleHook>,
    pub cleanup: Option<LifecycleHook>,
    pub on_config_change: Option<ConfigChangeHook>,
}

impl fmt::Debug for ModuleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHooks")
            .field("init", &self.init.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .field("on_config_change", &self.on_config_change.is_some())
            .finish()
    }
}

/// Wrap an async closure as an `init`/`cleanup` hook.
pub fn lifecycle_hook<F, Fut>(f: F) -> LifecycleHook
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx: HookContext| -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(f(ctx))
    })
}

pub fn config_change_hook<F, Fut>(f: F) -> ConfigChangeHook
where
    F: Fn(ConfigChange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(
        move |change: ConfigChange| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(f(change))
        },
    )
}

// ----- Exports ---------------------------------------------------------------

/// Capabilities a module shares with other modules, keyed by name.
///
/// Values are stored as `Arc<T>` so trait objects work:
/// `exports.insert::<dyn ScoreApi>("score", api)` / `exports.get::<dyn ScoreApi>("score")`.
#[derive(Clone, Default)]
pub struct Exports {
    items: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Exports {
    pub fn insert<T>(&mut self, name: impl Into<String>, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.items.insert(name.into(), Arc::new(value));
    }

    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.items.get(name)?.downcast_ref::<Arc<T>>().cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.keys()).finish()
    }
}

// ----- Definition ------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleMetadata {
    pub route_prefix: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: ConfigMap,
}

/// Everything `ModuleRegistry::register` accepts.
#[derive(Clone, Default)]
pub struct ModuleDefinition {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub routes: RouteTable,
    pub middleware: Vec<Middleware>,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    pub exports: Exports,
    pub config: ConfigMap,
    pub hooks: ModuleHooks,
    pub metadata: ModuleMetadata,
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("routes", &self.routes)
            .field("middleware", &self.middleware.len())
            .field("dependencies", &self.dependencies)
            .field("conflicts", &self.conflicts)
            .field("exports", &self.exports)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ModuleDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append to a list-shaped route table (a keyed table is converted to a list).
    pub fn with_route(mut self, route: RouteSpec) -> Self {
        let mut items = match std::mem::take(&mut self.routes) {
            RouteTable::List(items) => items,
            RouteTable::Map(items) => items
                .into_iter()
                .map(|(path, mut spec)| {
                    spec.path = path;
                    spec
                })
                .collect(),
        };
        items.push(route);
        self.routes = RouteTable::List(items);
        self
    }

    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_middleware(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_conflict(mut self, id_or_prefix: impl Into<String>) -> Self {
        self.conflicts.push(id_or_prefix.into());
        self
    }

    pub fn with_export<T>(mut self, name: impl Into<String>, value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.exports.insert(name, value);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_init_hook(mut self, hook: LifecycleHook) -> Self {
        self.hooks.init = Some(hook);
        self
    }

    pub fn with_cleanup_hook(mut self, hook: LifecycleHook) -> Self {
        self.hooks.cleanup = Some(hook);
        self
    }

    pub fn with_config_change_hook(mut self, hook: ConfigChangeHook) -> Self {
        self.hooks.on_config_change = Some(hook);
        self
    }

    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metadata.route_prefix = Some(prefix.into());
        self
    }
}

//! HTTP routing surface for the dashboard server.
//!
//! [`ApiIngress`] accepts "mount sub-router at prefix" requests from
//! `modkit::RouterIntegration`, composes one router out of all mounts and
//! swaps it into a lock-free cache. The served application dispatches every
//! request to the current composition, so mounts take effect without
//! restarting the listener.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    middleware::from_fn,
    response::Response,
    routing::get,
    Router,
};
use parking_lot::Mutex;
use runtime::IngressConfig;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

pub mod request_id;
mod router_cache;
mod web;

use router_cache::RouterCache;

pub struct ApiIngress {
    config: IngressConfig,
    // prefix -> sub-router; "/" is merged at the root
    mounts: Mutex<BTreeMap<String, Router>>,
    router_cache: RouterCache<Router>,
}

impl Default for ApiIngress {
    fn default() -> Self {
        Self::new(IngressConfig::default())
    }
}

impl ApiIngress {
    pub fn new(config: IngressConfig) -> Self {
        Self {
            config,
            mounts: Mutex::new(BTreeMap::new()),
            router_cache: RouterCache::new(Router::new().fallback(web::not_found)),
        }
    }

    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    pub fn mounted_prefixes(&self) -> Vec<String> {
        self.mounts.lock().keys().cloned().collect()
    }

    /// How many times the composed router has been rebuilt.
    pub fn generation(&self) -> u64 {
        self.router_cache.generation()
    }

    /// The composed router without the middleware stack.
    pub fn current_router(&self) -> Arc<Router> {
        self.router_cache.load()
    }

    /// Build the composition for `mounts`. axum panics on overlapping
    /// routes or invalid nest paths; that becomes an error here.
    fn compose(mounts: &BTreeMap<String, Router>) -> Result<Router> {
        catch_unwind(AssertUnwindSafe(|| {
            mounts
                .iter()
                .fold(Router::new(), |app, (prefix, router)| {
                    if prefix == "/" {
                        app.merge(router.clone())
                    } else {
                        app.nest(prefix, router.clone())
                    }
                })
                .fallback(web::not_found)
        }))
        .map_err(|panic| {
            let reason = panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "router composition panicked".to_string());
            anyhow::anyhow!(reason)
        })
    }

    /// The served application: `/health`, the middleware stack, and a
    /// fallback that forwards to the current composition.
    pub fn app(self: &Arc<Self>) -> Router {
        let x_request_id = request_id::header();

        // Outermost to innermost:
        // PropagateRequestId -> SetRequestId -> push_req_id_to_extensions -> Trace -> Timeout -> CORS -> BodyLimit
        let mut router = Router::new()
            .route("/health", get(web::health_check))
            .fallback(dispatch)
            .with_state(self.clone())
            .layer(RequestBodyLimitLayer::new(self.config.body_limit_bytes));
        if self.config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }
        router
            .layer(TimeoutLayer::new(self.config.request_timeout))
            .layer(request_id::create_trace_layer())
            .layer(from_fn(request_id::push_req_id_to_extensions))
            .layer(SetRequestIdLayer::new(
                x_request_id.clone(),
                request_id::MakeReqId,
            ))
            .layer(PropagateRequestIdLayer::new(x_request_id))
    }

    /// Bind `addr` and serve until `cancel` fires.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        self.serve_on(listener, cancel).await
    }

    pub async fn serve_on(
        self: Arc<Self>,
        listener: tokio::net::TcpListener,
        cancel: CancellationToken,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "HTTP server bound");

        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully");
        };
        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}

impl modkit::HttpSurface for ApiIngress {
    fn mount(&self, prefix: &str, router: Router) -> Result<()> {
        let mut mounts = self.mounts.lock();
        let mut next = mounts.clone();
        let replaced = next.insert(prefix.to_string(), router).is_some();

        let composed = Self::compose(&next)
            .with_context(|| format!("cannot mount router at '{prefix}'"))?;
        *mounts = next;
        let generation = self.router_cache.store(composed);
        tracing::info!(prefix, replaced, generation, "router mounted");
        Ok(())
    }
}

async fn dispatch(State(ingress): State<Arc<ApiIngress>>, req: Request) -> Response {
    let prefixes = ingress.mounted_prefixes();
    request_id::record_mount(request_id::owning_prefix(&prefixes, req.uri().path()));
    let router = ingress.router_cache.load();
    match (*router).clone().oneshot(req).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    }
}

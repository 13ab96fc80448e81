//! Operator API over the registry: list and inspect modules, flip their
//! state, patch their configuration and dump the mounted route table.
//!
//! The registry owns this module's handlers, so they only hold weak
//! references back to it.

use std::any::Any;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::response::{IntoResponse, Json, Response};
use modkit::{
    async_trait, handler, problem, ConfigMap, Module, ModuleCtx, ModuleDefinition, ModuleFilter,
    ModuleRegistry, ModuleState, ProblemResponse, RouteHandler, RouteSpec, RouterIntegration,
    SortKey, SortOrder,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub const MODULE_ID: &str = "registry-admin";

type AdminResult = Result<Response, ProblemResponse>;

struct Handles {
    registry: Weak<ModuleRegistry>,
    routes: Option<Weak<RouterIntegration>>,
}

impl Handles {
    fn registry(&self) -> Result<Arc<ModuleRegistry>, ProblemResponse> {
        self.registry
            .upgrade()
            .ok_or_else(|| problem::service_unavailable("module registry is shutting down"))
    }

    fn routes(&self) -> Result<Arc<RouterIntegration>, ProblemResponse> {
        self.routes
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| problem::service_unavailable("router integration is not available"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    state: Option<String>,
    name: Option<String>,
    version: Option<String>,
    dependency: Option<String>,
    sort: Option<String>,
    order: Option<SortOrder>,
}

impl ListQuery {
    fn into_filter(self) -> Result<ModuleFilter, ProblemResponse> {
        let state = self
            .state
            .as_deref()
            .map(ModuleState::from_str)
            .transpose()
            .map_err(|e| problem::bad_request(e.to_string()))?;
        Ok(ModuleFilter {
            state,
            name_contains: self.name,
            version: self.version,
            has_dependency: self.dependency,
            sort_by: self.sort.as_deref().map(SortKey::from),
            order: self.order.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StateChange {
    state: String,
    #[serde(default)]
    details: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutesQuery {
    format: Option<String>,
}

async fn module_id(req: Request) -> Result<(String, Request), ProblemResponse> {
    let (mut parts, body) = req.into_parts();
    let Path(id) = Path::<String>::from_request_parts(&mut parts, &())
        .await
        .map_err(|e| problem::bad_request(e.body_text()))?;
    Ok((id, Request::from_parts(parts, body)))
}

async fn json_body<T: serde::de::DeserializeOwned>(req: Request) -> Result<T, ProblemResponse> {
    Json::<T>::from_request(req, &())
        .await
        .map(|Json(v)| v)
        .map_err(|e| problem::bad_request(e.body_text()))
}

async fn list_modules(h: Arc<Handles>, req: Request) -> AdminResult {
    let (mut parts, _) = req.into_parts();
    let Query(query) = Query::<ListQuery>::from_request_parts(&mut parts, &())
        .await
        .map_err(|e| problem::bad_request(e.body_text()))?;
    let filter = query.into_filter()?;
    let registry = h.registry()?;
    let items: Vec<_> = registry
        .get_all_modules(&filter)
        .iter()
        .map(|e| e.to_record())
        .collect();
    Ok(Json(json!({ "items": items, "stats": registry.stats() })).into_response())
}

async fn get_module(h: Arc<Handles>, req: Request) -> AdminResult {
    let (id, _) = module_id(req).await?;
    let entry = h
        .registry()?
        .get_module(&id)
        .ok_or_else(|| problem::not_found(format!("module '{id}' not found")))?;
    Ok(Json(entry.to_record()).into_response())
}

async fn set_state(h: Arc<Handles>, req: Request) -> AdminResult {
    let (id, req) = module_id(req).await?;
    let change: StateChange = json_body(req).await?;
    let state =
        ModuleState::from_str(&change.state).map_err(|e| problem::bad_request(e.to_string()))?;
    let entry = h
        .registry()?
        .update_module_state(&id, state, change.details)?;
    Ok(Json(entry.to_record()).into_response())
}

async fn patch_config(h: Arc<Handles>, req: Request) -> AdminResult {
    let (id, req) = module_id(req).await?;
    let patch: ConfigMap = json_body(req).await?;
    let entry = h.registry()?.update_module_config(&id, patch).await?;
    Ok(Json(entry.to_record()).into_response())
}

async fn list_routes(h: Arc<Handles>, req: Request) -> AdminResult {
    let (mut parts, _) = req.into_parts();
    let Query(query) = Query::<RoutesQuery>::from_request_parts(&mut parts, &())
        .await
        .unwrap_or_default();
    let routes = h.routes()?;
    match query.format.as_deref() {
        Some("markdown") | Some("md") => Ok((
            [(axum::http::header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            routes.documentation_markdown(),
        )
            .into_response()),
        _ => Ok(Json(routes.documentation()).into_response()),
    }
}

fn admin<F, Fut>(handles: &Arc<Handles>, f: F) -> RouteHandler
where
    F: Fn(Arc<Handles>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AdminResult> + Send + 'static,
{
    let handles = handles.clone();
    handler(move |req| {
        let fut = f(handles.clone(), req.request);
        async move { Ok::<_, anyhow::Error>(fut.await.unwrap_or_else(IntoResponse::into_response)) }
    })
}

#[derive(Default)]
pub struct RegistryAdmin;

#[async_trait]
impl Module for RegistryAdmin {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn name(&self) -> &str {
        "Registry Admin"
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<ModuleDefinition> {
        let hub = ctx.client_hub();
        let registry = hub.get::<ModuleRegistry>()?;
        let routes = hub.get::<RouterIntegration>().ok();
        let handles = Arc::new(Handles {
            registry: Arc::downgrade(&registry),
            routes: routes.as_ref().map(Arc::downgrade),
        });

        Ok(ModuleDefinition::new(MODULE_ID, self.name())
            .with_description("Inspect and manage registered modules")
            .with_route_prefix("/api/registry")
            .with_route(RouteSpec::get("/modules", admin(&handles, list_modules)))
            .with_route(RouteSpec::get("/modules/:id", admin(&handles, get_module)))
            .with_route(RouteSpec::post("/modules/:id/state", admin(&handles, set_state)))
            .with_route(RouteSpec::patch("/modules/:id/config", admin(&handles, patch_config)))
            .with_route(RouteSpec::get("/routes", admin(&handles, list_routes))))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_ingress::ApiIngress;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, StatusCode};
    use modkit::{ClientHub, ModuleCtxBuilder, RegisterOptions, RouterConfig};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct Fixture {
        registry: Arc<ModuleRegistry>,
        _routes: Arc<RouterIntegration>,
        app: axum::Router,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(ModuleRegistry::default());
        let ingress = Arc::new(ApiIngress::default());
        let routes = RouterIntegration::attach(&registry, ingress.clone(), RouterConfig::default());

        let hub = Arc::new(ClientHub::new());
        hub.register(registry.clone());
        hub.register(routes.clone());
        let ctx = ModuleCtxBuilder::new(CancellationToken::new())
            .with_client_hub(hub)
            .build();

        let def = RegistryAdmin.initialize(&ctx).await.unwrap();
        registry
            .register(def, RegisterOptions::default())
            .await
            .unwrap();
        registry
            .register(
                ModuleDefinition::new("scanner", "Scanner")
                    .with_version("1.2.0")
                    .with_config("interval", json!(60)),
                RegisterOptions::default(),
            )
            .await
            .unwrap();

        Fixture {
            registry,
            _routes: routes,
            app: ingress.app(),
        }
    }

    async fn call(app: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let mut req = axum::http::Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn lists_and_filters_modules() {
        let fx = fixture().await;

        let (status, body) = call(&fx.app, Method::GET, "/api/registry/modules?sort=name", None).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_str(&body).unwrap();
        let ids: Vec<&str> = v["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![MODULE_ID, "scanner"]);
        assert_eq!(v["stats"]["total_modules"], 2);

        let (_, body) = call(&fx.app, Method::GET, "/api/registry/modules?name=scan", None).await;
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["items"].as_array().unwrap().len(), 1);

        let (status, _) = call(&fx.app, Method::GET, "/api/registry/modules?state=SLEEPING", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_module_and_missing_module() {
        let fx = fixture().await;

        let (status, body) = call(&fx.app, Method::GET, "/api/registry/modules/scanner", None).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["version"], "1.2.0");
        assert_eq!(v["state"], "ACTIVE");

        let (status, body) = call(&fx.app, Method::GET, "/api/registry/modules/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("ghost"));
    }

    #[tokio::test]
    async fn state_and_config_updates() {
        let fx = fixture().await;

        let (status, body) = call(
            &fx.app,
            Method::POST,
            "/api/registry/modules/scanner/state",
            Some(json!({ "state": "disabled", "details": { "reason": "maintenance" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(fx.registry.state_of("scanner"), Some(ModuleState::Disabled));

        let (status, _) = call(
            &fx.app,
            Method::POST,
            "/api/registry/modules/scanner/state",
            Some(json!({ "state": "paused" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &fx.app,
            Method::PATCH,
            "/api/registry/modules/scanner/config",
            Some(json!({ "interval": 300, "regions": ["eu-west-1"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entry = fx.registry.snapshot("scanner").unwrap();
        assert_eq!(entry.config["interval"], 300);
        assert_eq!(entry.config["regions"], json!(["eu-west-1"]));
    }

    #[tokio::test]
    async fn route_table_as_json_and_markdown() {
        let fx = fixture().await;

        let (status, body) = call(&fx.app, Method::GET, "/api/registry/routes", None).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_str(&body).unwrap();
        let admin = v
            .as_array()
            .unwrap()
            .iter()
            .find(|d| d["module_id"] == MODULE_ID)
            .unwrap();
        assert_eq!(admin["prefix"], "/api/registry");
        assert_eq!(admin["routes"].as_array().unwrap().len(), 5);

        let (status, body) =
            call(&fx.app, Method::GET, "/api/registry/routes?format=markdown", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("# Module routes"));
        assert!(body.contains("/api/registry/modules/{id}/state"));
    }

    #[tokio::test]
    async fn handlers_degrade_once_the_registry_is_gone() {
        let registry = Arc::new(ModuleRegistry::default());
        let handles = Arc::new(Handles {
            registry: Arc::downgrade(&registry),
            routes: None,
        });
        drop(registry);

        let req = axum::http::Request::builder()
            .uri("/modules")
            .body(Body::empty())
            .unwrap();
        let resp = list_modules(handles.clone(), req).await.unwrap_err().into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(handles.routes().is_err());
    }
}

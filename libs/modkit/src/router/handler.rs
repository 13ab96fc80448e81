//! Building a module's sub-router and the per-request handler wrapper.

use std::panic::AssertUnwindSafe;
use std::sync::Weak;

use axum::extract::Request;
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, on, MethodFilter, MethodRouter};
use axum::Router;
use http::StatusCode;

use crate::contracts::{ModuleContext, RouteHandler, RouteRequest};
use crate::entry::ModuleEntry;
use crate::error::MountFailure;
use crate::guard::{guarded, panic_message};
use crate::problem::{service_unavailable, Problem, ProblemResponse};
use crate::registry::ModuleRegistry;

/// A route as it was installed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MountedRoute {
    pub method: String,
    /// Declared path, as the module wrote it.
    pub path: String,
    /// Prefix + router path, in the router's `{param}` syntax.
    pub full_path: String,
}

#[derive(Clone)]
struct RouteTarget {
    context: ModuleContext,
    handler: RouteHandler,
    /// Set when requests must check the live module state first.
    gate: Option<Weak<ModuleRegistry>>,
}

/// Rewrite a declared path to router syntax: leading `/`, `:id` → `{id}`,
/// `*rest` → `{*rest}`, no trailing `/`.
pub(crate) fn to_router_path(path: &str) -> Result<String, String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }
    let mut out = String::with_capacity(trimmed.len() + 2);
    for segment in trimmed.split('/') {
        out.push('/');
        if segment.is_empty() {
            return Err("empty path segment".into());
        }
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() {
                return Err(format!("unnamed parameter in segment '{segment}'"));
            }
            out.push('{');
            out.push_str(name);
            out.push('}');
        } else if let Some(name) = segment.strip_prefix('*') {
            if name.is_empty() {
                return Err("unnamed wildcard".into());
            }
            out.push_str("{*");
            out.push_str(name);
            out.push('}');
        } else {
            out.push_str(segment);
        }
    }
    Ok(out)
}

/// `/modules/a` + `/hello` → `/modules/a/hello`; `/` + `/hello` → `/hello`.
pub(crate) fn join_paths(prefix: &str, path: &str) -> String {
    match (prefix.trim_end_matches('/'), path) {
        ("", p) => p.to_string(),
        (pre, "/") => pre.to_string(),
        (pre, p) => format!("{pre}{p}"),
    }
}

fn method_router(method: &str, target: RouteTarget) -> Option<MethodRouter> {
    let handler = move |req: Request| {
        let target = target.clone();
        async move { dispatch(target, req).await }
    };
    let filter = match method {
        "GET" => MethodFilter::GET,
        "POST" => MethodFilter::POST,
        "PUT" => MethodFilter::PUT,
        "DELETE" => MethodFilter::DELETE,
        "PATCH" => MethodFilter::PATCH,
        "ALL" => return Some(any(handler)),
        _ => return None,
    };
    Some(on(filter, handler))
}

async fn dispatch(target: RouteTarget, mut req: Request) -> Response {
    let module_id = target.context.module_id.as_str();

    if let Some(gate) = &target.gate {
        match gate.upgrade().and_then(|r| r.state_of(module_id)) {
            Some(state) if state.is_serving() => {}
            Some(state) => {
                return service_unavailable(format!("module '{module_id}' is {state}"))
                    .into_response()
            }
            None => {
                return service_unavailable(format!("module '{module_id}' is not registered"))
                    .into_response()
            }
        }
    }

    req.extensions_mut().insert(target.context.clone());
    let handler = target.handler.clone();
    let route = RouteRequest {
        context: target.context.clone(),
        request: req,
    };

    match guarded(move || handler(route)).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::error!(
                module = %module_id,
                route = %target.context.route_path,
                error = %format!("{err:#}"),
                "module handler failed"
            );
            ProblemResponse::from(
                Problem::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    format!("{err:#}"),
                )
                .with_code("MODULE_HANDLER")
                .with_module(module_id)
                .with_instance(target.context.route_path.clone()),
            )
            .into_response()
        }
    }
}

/// Build the sub-router for `entry`. Panics raised by the router while
/// composing (overlapping methods, malformed patterns) are reported as
/// [`MountFailure::InvalidPath`].
pub(crate) fn build_module_router(
    entry: &ModuleEntry,
    prefix: &str,
    gate: Option<Weak<ModuleRegistry>>,
) -> Result<(Router, Vec<MountedRoute>), MountFailure> {
    let mut planned = Vec::new();
    for (path, spec) in entry.routes.resolved() {
        let handler = spec
            .handler
            .clone()
            .ok_or_else(|| MountFailure::MissingHandler {
                method: spec.method.clone(),
                path: path.to_string(),
            })?;
        let router_path = to_router_path(path).map_err(|reason| MountFailure::InvalidPath {
            path: path.to_string(),
            reason,
        })?;
        let target = RouteTarget {
            context: ModuleContext {
                module_id: entry.id.clone(),
                module_name: entry.name.clone(),
                route_path: path.to_string(),
            },
            handler,
            gate: gate.clone(),
        };
        let mut mr = method_router(&spec.method, target).ok_or_else(|| {
            MountFailure::UnsupportedMethod {
                method: spec.method.clone(),
                path: path.to_string(),
            }
        })?;
        // last layer runs first, so install in reverse declaration order
        for mw in spec.middleware.iter().rev() {
            let mw = mw.clone();
            mr = mr.layer(from_fn(move |req: Request, next: Next| mw(req, next)));
        }
        planned.push((path.to_string(), spec.method.clone(), router_path, mr));
    }

    let composed = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut router = Router::new();
        let mut mounted = Vec::with_capacity(planned.len());
        for (path, method, router_path, mr) in planned {
            router = router.route(&router_path, mr);
            mounted.push(MountedRoute {
                method,
                full_path: join_paths(prefix, &router_path),
                path,
            });
        }
        for mw in entry.middleware.iter().rev() {
            let mw = mw.clone();
            router = router.layer(from_fn(move |req: Request, next: Next| mw(req, next)));
        }
        (router, mounted)
    }));

    composed.map_err(|payload| MountFailure::InvalidPath {
        path: entry.routes.paths().join(", "),
        reason: panic_message(&*payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn express_params_become_router_params() {
        assert_eq!(to_router_path("/reports/:id").unwrap(), "/reports/{id}");
        assert_eq!(to_router_path("files/*rest/").unwrap(), "/files/{*rest}");
        assert_eq!(to_router_path("/").unwrap(), "/");
        assert_eq!(to_router_path("").unwrap(), "/");
        assert!(to_router_path("/a//b").is_err());
        assert!(to_router_path("/a/:").is_err());
    }

    #[test]
    fn join_handles_root_prefix_and_root_route() {
        assert_eq!(join_paths("/modules/a", "/hello"), "/modules/a/hello");
        assert_eq!(join_paths("/modules/a/", "/"), "/modules/a");
        assert_eq!(join_paths("/", "/hello"), "/hello");
        assert_eq!(join_paths("/", "/"), "/");
    }
}

//! Request correlation for the ingress: id generation, the `http_request`
//! span and the mount prefix that served each request.

use std::time::Duration;

use axum::http::{HeaderName, Request};
use axum::{body::Body, middleware::Next, response::Response};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{MakeRequestId, RequestId};
use tower_http::trace::{DefaultOnRequest, TraceLayer};
use tracing::field::Empty;
use tracing::Span;

const UNKNOWN: &str = "n/a";

/// Request id as seen by handlers (`req.extensions().get::<XRequestId>()`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XRequestId(pub String);

pub fn header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

fn request_id_of<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or(UNKNOWN)
}

/// nanoid-based ids for requests that arrive without `x-request-id`.
#[derive(Clone, Default)]
pub struct MakeReqId;

impl MakeRequestId for MakeReqId {
    fn make_request_id<B>(&mut self, _req: &Request<B>) -> Option<RequestId> {
        Some(RequestId::new(nanoid::nanoid!().parse().ok()?))
    }
}

pub async fn push_req_id_to_extensions(mut req: Request<Body>, next: Next) -> Response {
    let rid = XRequestId(request_id_of(&req).to_owned());
    Span::current().record("request_id", rid.0.as_str());
    req.extensions_mut().insert(rid);
    next.run(req).await
}

/// Longest mounted prefix owning `path`, on a segment boundary. `/` owns
/// whatever nothing else claims.
pub fn owning_prefix<'a>(prefixes: &'a [String], path: &str) -> Option<&'a str> {
    prefixes
        .iter()
        .map(String::as_str)
        .filter(|prefix| {
            *prefix == "/"
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
        .max_by_key(|prefix| prefix.len())
}

/// Fill the `mount` field of the current request span.
pub(crate) fn record_mount(prefix: Option<&str>) {
    Span::current().record("mount", prefix.unwrap_or("-"));
}

#[allow(clippy::type_complexity)]
pub fn create_trace_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    impl Fn(&Request<Body>) -> Span + Clone,
    DefaultOnRequest,
    impl Fn(&Response<Body>, Duration, &Span) + Clone,
> {
    TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %req.method(),
                path = %req.uri().path(),
                request_id = %request_id_of(req),
                mount = Empty,
                status = Empty,
                latency_ms = Empty
            )
        })
        .on_response(|resp: &Response<Body>, latency: Duration, span: &Span| {
            let status = resp.status().as_u16();
            span.record("status", status);
            span.record("latency_ms", latency.as_millis() as u64);
            tracing::debug!(parent: span, status, "request finished");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn longest_prefix_wins_on_segment_boundaries() {
        let mounts = prefixes(&["/", "/api/inspector", "/api/registry", "/modules/scan"]);
        assert_eq!(owning_prefix(&mounts, "/api/inspector/reports"), Some("/api/inspector"));
        assert_eq!(owning_prefix(&mounts, "/api/registry"), Some("/api/registry"));
        assert_eq!(owning_prefix(&mounts, "/modules/scanner/x"), Some("/"));
        assert_eq!(owning_prefix(&mounts, "/health"), Some("/"));
    }

    #[test]
    fn unclaimed_path_without_root_mount() {
        let mounts = prefixes(&["/api/inspector"]);
        assert_eq!(owning_prefix(&mounts, "/api/inspectors"), None);
        assert_eq!(owning_prefix(&[], "/anything"), None);
    }

    #[test]
    fn generated_ids_are_header_safe() {
        let req = Request::builder().uri("/").body(()).unwrap();
        let id = MakeReqId.make_request_id(&req).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert_eq!(value.len(), 21);
    }
}

use axum::{
    extract::{Request, State},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::ApiIngress;

pub async fn health_check(State(ingress): State<Arc<ApiIngress>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "mounts": ingress.mounted_prefixes(),
        "router_generation": ingress.generation(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn not_found(req: Request) -> Response {
    let path = req.uri().path().to_string();
    modkit::problem::not_found(format!("no route for {} {}", req.method(), path))
        .into_response()
}

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Content type for Problem Details as per RFC 9457.
pub const APPLICATION_PROBLEM_JSON: &str = "application/problem+json";

/// RFC 9457 Problem Details for HTTP APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    /// Module the failure belongs to, when a module handler or registry call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// Every violation, for validation/conflict failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl Problem {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            type_url: "about:blank".to_string(),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: String::new(),
            code: String::new(),
            module_id: None,
            errors: None,
        }
    }

    pub fn with_instance(mut self, uri: impl Into<String>) -> Self {
        self.instance = uri.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = Some(errors);
        self
    }
}

/// Axum response wrapper that renders `Problem` with correct status & content type.
#[derive(Debug, Clone)]
pub struct ProblemResponse(pub Problem);

impl From<Problem> for ProblemResponse {
    fn from(p: Problem) -> Self {
        Self(p)
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut resp = axum::Json(self.0).into_response();
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static(APPLICATION_PROBLEM_JSON),
        );
        resp
    }
}

impl From<&RegistryError> for ProblemResponse {
    fn from(err: &RegistryError) -> Self {
        let detail = err.to_string();
        let p = match err {
            RegistryError::Validation { errors, .. } => Problem::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation Failed",
                detail,
            )
            .with_code("MODULE_VALIDATION")
            .with_errors(errors.clone()),
            RegistryError::Conflict { conflicts, .. } => {
                Problem::new(StatusCode::CONFLICT, "Conflict", detail)
                    .with_code("MODULE_CONFLICT")
                    .with_errors(conflicts.iter().map(ToString::to_string).collect())
            }
            RegistryError::DependencyViolation { .. } => {
                Problem::new(StatusCode::CONFLICT, "Conflict", detail)
                    .with_code("MODULE_DEPENDENCY_VIOLATION")
            }
            RegistryError::NotFound(_) => {
                Problem::new(StatusCode::NOT_FOUND, "Not Found", detail).with_code("MODULE_NOT_FOUND")
            }
            RegistryError::Import(_) => Problem::new(StatusCode::BAD_REQUEST, "Bad Request", detail)
                .with_code("REGISTRY_IMPORT"),
            RegistryError::Mount(_) => Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                detail,
            )
            .with_code("MODULE_MOUNT"),
            RegistryError::Hook { .. } => Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                detail,
            )
            .with_code("MODULE_HOOK"),
        };
        match err.module_id() {
            Some(id) => p.with_module(id).into(),
            None => p.into(),
        }
    }
}

impl From<RegistryError> for ProblemResponse {
    fn from(err: RegistryError) -> Self {
        (&err).into()
    }
}

pub fn bad_request(detail: impl Into<String>) -> ProblemResponse {
    Problem::new(StatusCode::BAD_REQUEST, "Bad Request", detail).into()
}

pub fn not_found(detail: impl Into<String>) -> ProblemResponse {
    Problem::new(StatusCode::NOT_FOUND, "Not Found", detail).into()
}

pub fn internal_error(detail: impl Into<String>) -> ProblemResponse {
    Problem::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
        detail,
    )
    .into()
}

pub fn service_unavailable(detail: impl Into<String>) -> ProblemResponse {
    Problem::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "Service Unavailable",
        detail,
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConflictKind, ModuleConflict};

    fn content_type(resp: &Response) -> &str {
        resp.headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    #[test]
    fn problem_into_response_sets_status_and_content_type() {
        let resp = service_unavailable("module 'scan' is DISABLED").into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(content_type(&resp), APPLICATION_PROBLEM_JSON);
    }

    #[test]
    fn registry_errors_map_to_statuses() {
        let not_found: ProblemResponse = RegistryError::NotFound("ghost".into()).into();
        assert_eq!(not_found.0.status, 404);
        assert_eq!(not_found.0.module_id.as_deref(), Some("ghost"));

        let conflict: ProblemResponse = RegistryError::Conflict {
            module_id: "b".into(),
            conflicts: vec![ModuleConflict {
                existing_id: "a".into(),
                kind: ConflictKind::Name { name: "Scan".into() },
            }],
        }
        .into();
        assert_eq!(conflict.0.status, 409);
        assert_eq!(conflict.0.errors.as_ref().map(Vec::len), Some(1));

        let invalid: ProblemResponse = RegistryError::Validation {
            module_id: "x".into(),
            errors: vec!["name: must not be empty".into(), "routes[0]: empty path".into()],
        }
        .into();
        assert_eq!(invalid.0.status, 422);
        assert_eq!(invalid.0.code, "MODULE_VALIDATION");
        assert_eq!(invalid.0.errors.unwrap().len(), 2);
    }

    #[test]
    fn empty_optional_fields_are_not_serialized() {
        let v = serde_json::to_value(internal_error("boom").0).unwrap();
        assert_eq!(v["type"], "about:blank");
        assert!(v.get("instance").is_none());
        assert!(v.get("module_id").is_none());
    }
}

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of overlap two modules have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
    /// Normalized route paths are equal or one is a `/`-bounded prefix of the other.
    Route { path: String, existing_path: String },
    /// Display names equal ignoring case.
    Name { name: String },
    /// One side listed the other (by id or route prefix) in `conflicts`.
    Declared { declared_by: String, rule: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConflict {
    /// Id of the already registered module.
    pub existing_id: String,
    #[serde(flatten)]
    pub kind: ConflictKind,
}

impl fmt::Display for ModuleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConflictKind::Route {
                path,
                existing_path,
            } => write!(
                f,
                "route '{path}' overlaps '{existing_path}' of module '{}'",
                self.existing_id
            ),
            ConflictKind::Name { name } => {
                write!(f, "name '{name}' is already used by module '{}'", self.existing_id)
            }
            ConflictKind::Declared { declared_by, rule } => write!(
                f,
                "module '{declared_by}' declares a conflict '{rule}' with module '{}'",
                self.existing_id
            ),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Init,
    Cleanup,
    ConfigChange,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::Init => "init",
            HookKind::Cleanup => "cleanup",
            HookKind::ConfigChange => "onConfigChange",
        })
    }
}

#[derive(Debug, Error)]
pub enum MountFailure {
    #[error("route '{method} {path}' has no handler")]
    MissingHandler { method: String, path: String },
    #[error("route '{method} {path}' uses an unsupported method")]
    UnsupportedMethod { method: String, path: String },
    #[error("route path '{path}' is not mountable: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("routing surface rejected the mount: {0:#}")]
    Surface(anyhow::Error),
}

#[derive(Debug, Error)]
#[error("failed to mount module '{module_id}': {reason}")]
pub struct MountError {
    pub module_id: String,
    #[source]
    pub reason: MountFailure,
}

impl MountError {
    pub fn new(module_id: impl Into<String>, reason: MountFailure) -> Self {
        Self {
            module_id: module_id.into(),
            reason,
        }
    }
}

/// Structured errors for the module registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module '{module_id}' failed validation: {}", errors.join("; "))]
    Validation {
        module_id: String,
        errors: Vec<String>,
    },

    #[error("module '{module_id}' conflicts with registered modules: {}", join(conflicts))]
    Conflict {
        module_id: String,
        conflicts: Vec<ModuleConflict>,
    },

    #[error("module '{module_id}' is required by: {}", dependents.join(", "))]
    DependencyViolation {
        module_id: String,
        dependents: Vec<String>,
    },

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error("module '{0}' is not registered")]
    NotFound(String),

    #[error("{hook} hook of module '{module_id}' failed: {source:#}")]
    Hook {
        module_id: String,
        hook: HookKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("registry state import rejected: {0}")]
    Import(String),
}

impl RegistryError {
    /// Module the error is about, when it concerns a single one.
    pub fn module_id(&self) -> Option<&str> {
        match self {
            RegistryError::Validation { module_id, .. }
            | RegistryError::Conflict { module_id, .. }
            | RegistryError::DependencyViolation { module_id, .. }
            | RegistryError::Hook { module_id, .. } => Some(module_id),
            RegistryError::Mount(e) => Some(&e.module_id),
            RegistryError::NotFound(id) => Some(id),
            RegistryError::Import(_) => None,
        }
    }
}

/// Minimum-shape check result for a module definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid {
            f.write_str("valid")
        } else {
            f.write_str(&self.errors.join("; "))
        }
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("module '{0}' was not found by the definition source")]
    NotFound(String),

    #[error("module '{module_id}' is invalid: {report}")]
    Invalid {
        module_id: String,
        report: ValidationReport,
    },

    #[error("module '{module_id}' names unknown factory '{factory}'")]
    UnknownFactory { module_id: String, factory: String },

    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse manifest {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("initialize failed for module '{module_id}': {source:#}")]
    Initialize {
        module_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_lists_every_conflict() {
        let err = RegistryError::Conflict {
            module_id: "b".into(),
            conflicts: vec![
                ModuleConflict {
                    existing_id: "a".into(),
                    kind: ConflictKind::Route {
                        path: "scan/".into(),
                        existing_path: "/scan".into(),
                    },
                },
                ModuleConflict {
                    existing_id: "c".into(),
                    kind: ConflictKind::Name {
                        name: "Scanner".into(),
                    },
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("'/scan' of module 'a'"), "{msg}");
        assert!(msg.contains("used by module 'c'"), "{msg}");
        assert_eq!(err.module_id(), Some("b"));
    }

    #[test]
    fn cycle_message_shows_path() {
        let err = LoaderError::DependencyCycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn report_validity_follows_errors() {
        assert!(ValidationReport::from_errors(vec![], vec!["w".into()]).is_valid);
        let bad = ValidationReport::from_errors(vec!["id: missing".into()], vec![]);
        assert!(!bad.is_valid);
        assert_eq!(bad.to_string(), "id: missing");
    }
}

//! Shape validation and conflict detection for incoming definitions.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::contracts::ModuleDefinition;
use crate::entry::ModuleEntry;
use crate::error::{ConflictKind, ModuleConflict};

/// Ids become URL segments (`/modules/{id}`), so they stay path-safe.
static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("invalid module id regex")
});

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "ALL"];

#[derive(Debug, Default)]
pub(crate) struct Findings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check a definition against the required contract and the current registry.
///
/// Unknown dependencies are warnings only; their existence is checked later.
pub(crate) fn validate_definition(
    def: &ModuleDefinition,
    existing: &HashMap<String, ModuleEntry>,
) -> Findings {
    let mut f = Findings::default();

    if def.id.trim().is_empty() {
        f.errors.push("id: must be a non-empty string".into());
    } else if !ID_PATTERN.is_match(&def.id) {
        f.errors.push(format!(
            "id: '{}' may only contain letters, digits, '_' and '-'",
            def.id
        ));
    } else if existing.contains_key(&def.id) {
        f.errors
            .push(format!("id: module '{}' is already registered", def.id));
    }

    if def.name.trim().is_empty() {
        f.errors.push("name: must be a non-empty string".into());
    }

    if def.version.as_deref().map_or(true, |v| v.trim().is_empty()) {
        f.warnings.push("version: not specified".into());
    }

    let mut seen = HashSet::new();
    for (i, (path, spec)) in def.routes.resolved().into_iter().enumerate() {
        if path.trim().is_empty() {
            f.errors.push(format!("routes[{i}]: path must not be empty"));
            continue;
        }
        if !METHODS.contains(&spec.method.as_str()) {
            f.errors.push(format!(
                "routes[{i}]: unsupported method '{}' for '{path}'",
                spec.method
            ));
        }
        if !seen.insert((spec.method.clone(), normalize_path(path))) {
            f.errors.push(format!(
                "routes[{i}]: duplicate route '{} {path}'",
                spec.method
            ));
        }
    }

    let mut deps = HashSet::new();
    for dep in &def.dependencies {
        if dep.trim().is_empty() {
            f.errors.push("dependencies: entries must be non-empty ids".into());
        } else if *dep == def.id {
            f.errors.push(format!("dependencies: module '{dep}' depends on itself"));
        } else if !deps.insert(dep.as_str()) {
            f.errors.push(format!("dependencies: '{dep}' listed twice"));
        } else if !existing.contains_key(dep) {
            f.warnings
                .push(format!("dependencies: '{dep}' is not registered yet"));
        }
    }

    if def.conflicts.iter().any(|c| c.trim().is_empty()) {
        f.errors.push("conflicts: entries must be non-empty".into());
    }

    f
}

/// Strip surrounding whitespace and slashes, then case-fold.
pub fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_lowercase()
}

/// `a` and `b` are equal, or one is a `/`-bounded prefix of the other.
/// Both must already be normalized.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    fn under(long: &str, short: &str) -> bool {
        long.len() > short.len()
            && long.starts_with(short)
            && long.as_bytes()[short.len()] == b'/'
    }
    a == b || (!a.is_empty() && under(b, a)) || (!b.is_empty() && under(a, b))
}

/// Every route, name and declared conflict between `def` and the registered modules.
pub(crate) fn detect_conflicts<'a>(
    def: &ModuleDefinition,
    existing: impl IntoIterator<Item = &'a ModuleEntry>,
) -> Vec<ModuleConflict> {
    let mut out = Vec::new();
    let new_paths: Vec<(&str, String)> = def
        .routes
        .paths()
        .into_iter()
        .map(|p| (p, normalize_path(p)))
        .collect();
    let name = def.name.trim().to_lowercase();

    for other in existing {
        if other.id == def.id {
            continue;
        }
        let other_paths: Vec<(&str, String)> = other
            .routes
            .paths()
            .into_iter()
            .map(|p| (p, normalize_path(p)))
            .collect();

        for (raw, norm) in &new_paths {
            for (other_raw, other_norm) in &other_paths {
                if paths_overlap(norm, other_norm) {
                    out.push(ModuleConflict {
                        existing_id: other.id.clone(),
                        kind: ConflictKind::Route {
                            path: (*raw).to_string(),
                            existing_path: (*other_raw).to_string(),
                        },
                    });
                }
            }
        }

        if !name.is_empty() && other.name.trim().to_lowercase() == name {
            out.push(ModuleConflict {
                existing_id: other.id.clone(),
                kind: ConflictKind::Name {
                    name: def.name.clone(),
                },
            });
        }

        let kinds = declared(&def.id, &def.conflicts, &other.id, &other_paths)
            .into_iter()
            .chain(declared(&other.id, &other.conflicts, &def.id, &new_paths));
        out.extend(kinds.map(|kind| ModuleConflict {
            existing_id: other.id.clone(),
            kind,
        }));
    }

    out
}

fn declared(
    declared_by: &str,
    rules: &[String],
    target_id: &str,
    target_paths: &[(&str, String)],
) -> Vec<ConflictKind> {
    rules
        .iter()
        .filter(|rule| declared_rule_matches(rule, target_id, target_paths))
        .map(|rule| ConflictKind::Declared {
            declared_by: declared_by.to_string(),
            rule: rule.clone(),
        })
        .collect()
}

fn declared_rule_matches(rule: &str, target_id: &str, target_paths: &[(&str, String)]) -> bool {
    let rule = rule.trim();
    if rule.starts_with('/') {
        let prefix = normalize_path(rule);
        target_paths.iter().any(|(_, p)| paths_overlap(&prefix, p))
    } else {
        rule == target_id
    }
}

//! Sample feature module: AWS Inspector findings served from the storage
//! handle the host supplies.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{FromRequestParts, Path as UrlPath, Query};
use axum::response::{IntoResponse, Json};
use modkit::{
    async_trait, config_change_hook, handler, lifecycle_hook, problem, ConfigMap, Module,
    ModuleContext, ModuleCtx, ModuleDefinition, RouteSpec,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const MODULE_ID: &str = "inspector-reports";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(json!(s.to_ascii_uppercase())).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub resource: String,
    #[serde(default)]
    pub cve: Option<String>,
}

/// Findings snapshot handed to the module as its storage handle.
#[derive(Debug, Default)]
pub struct FindingStore {
    findings: Vec<Finding>,
}

impl FindingStore {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    /// JSON array of findings.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let findings = serde_json::from_str(&raw)
            .with_context(|| format!("invalid findings file {}", path.display()))?;
        Ok(Self { findings })
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    fn at_least(&self, floor: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity >= floor)
    }

    fn summary(&self, floor: Severity) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for f in self.at_least(floor) {
            *counts.entry(f.severity).or_insert(0) += 1;
        }
        counts
    }
}

/// State shared by the handlers and hooks of one loaded instance.
struct Shared {
    store: Option<Arc<FindingStore>>,
    floor: RwLock<Severity>,
}

impl Shared {
    fn apply(&self, config: &ConfigMap) {
        let floor = config
            .get("min_severity")
            .and_then(|v| v.as_str())
            .and_then(Severity::parse)
            .unwrap_or(Severity::Low);
        *self.floor.write() = floor;
    }

    fn store(&self) -> Arc<FindingStore> {
        self.store.clone().unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    severity: Option<String>,
}

pub struct InspectorReports {
    shared: RwLock<Option<Arc<Shared>>>,
}

impl Default for InspectorReports {
    fn default() -> Self {
        Self {
            shared: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Module for InspectorReports {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn name(&self) -> &str {
        "Inspector Reports"
    }

    fn default_config(&self) -> ConfigMap {
        let mut config = ConfigMap::new();
        config.insert("min_severity".into(), json!("LOW"));
        config
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), Vec<String>> {
        match config.get("min_severity") {
            None => Ok(()),
            Some(v) if v.as_str().and_then(Severity::parse).is_some() => Ok(()),
            Some(v) => Err(vec![format!(
                "min_severity: expected one of INFORMATIONAL, LOW, MEDIUM, HIGH, CRITICAL, got {v}"
            )]),
        }
    }

    fn tab_content(&self, _ctx: &ModuleContext) -> Option<String> {
        let shared = self.shared.read().clone()?;
        let floor = *shared.floor.read();
        let rows: String = shared
            .store()
            .summary(floor)
            .iter()
            .rev()
            .map(|(sev, n)| format!("<tr><td>{sev:?}</td><td>{n}</td></tr>"))
            .collect();
        Some(format!(
            "<table class=\"inspector-summary\"><tr><th>Severity</th><th>Findings</th></tr>{rows}</table>"
        ))
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<ModuleDefinition> {
        let store = ctx.db_as::<FindingStore>();
        if store.is_none() {
            tracing::info!(module = MODULE_ID, "no findings store supplied; serving empty reports");
        }
        let shared = Arc::new(Shared {
            store,
            floor: RwLock::new(Severity::Low),
        });
        *self.shared.write() = Some(shared.clone());

        let on_init = shared.clone();
        let on_change = shared.clone();
        let list = shared.clone();
        let one = shared.clone();
        let summary = shared;

        Ok(ModuleDefinition::new(MODULE_ID, self.name())
            .with_description("AWS Inspector findings by severity")
            .with_route_prefix("/api/inspector")
            .with_init_hook(lifecycle_hook(move |hook| {
                let shared = on_init.clone();
                async move {
                    shared.apply(&hook.config);
                    Ok::<_, anyhow::Error>(())
                }
            }))
            .with_config_change_hook(config_change_hook(move |change| {
                let shared = on_change.clone();
                async move {
                    shared.apply(&change.new_config);
                    Ok::<_, anyhow::Error>(())
                }
            }))
            .with_route(RouteSpec::get(
                "/reports",
                handler(move |req| {
                    let shared = list.clone();
                    async move {
                        let (mut parts, _) = req.request.into_parts();
                        let Query(q) = Query::<ListQuery>::from_request_parts(&mut parts, &())
                            .await
                            .unwrap_or_default();
                        let floor = match q.severity.as_deref() {
                            None => *shared.floor.read(),
                            Some(raw) => match Severity::parse(raw) {
                                Some(s) => s,
                                None => {
                                    return Ok(problem::bad_request(format!(
                                        "unknown severity '{raw}'"
                                    ))
                                    .into_response())
                                }
                            },
                        };
                        let store = shared.store();
                        let items: Vec<&Finding> = store.at_least(floor).collect();
                        Ok::<_, anyhow::Error>(Json(json!({ "items": items })).into_response())
                    }
                }),
            ))
            .with_route(RouteSpec::get(
                "/reports/:id",
                handler(move |req| {
                    let shared = one.clone();
                    async move {
                        let (mut parts, _) = req.request.into_parts();
                        let id = match UrlPath::<String>::from_request_parts(&mut parts, &()).await {
                            Ok(UrlPath(id)) => id,
                            Err(e) => return Ok(problem::bad_request(e.body_text()).into_response()),
                        };
                        let store = shared.store();
                        let resp = match store.findings.iter().find(|f| f.id == id) {
                            Some(f) => Json(f).into_response(),
                            None => problem::not_found(format!("finding '{id}' not found"))
                                .into_response(),
                        };
                        Ok::<_, anyhow::Error>(resp)
                    }
                }),
            ))
            .with_route(RouteSpec::get(
                "/summary",
                handler(move |_req| {
                    let shared = summary.clone();
                    async move {
                        let floor = *shared.floor.read();
                        Ok::<_, anyhow::Error>(Json(json!({
                            "min_severity": floor,
                            "counts": shared.store().summary(floor),
                        })))
                    }
                }),
            )))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit::ModuleCtxBuilder;
    use tokio_util::sync::CancellationToken;

    fn finding(id: &str, severity: Severity) -> Finding {
        Finding {
            id: id.into(),
            title: format!("finding {id}"),
            severity,
            resource: "arn:aws:ec2:eu-west-1:123456789012:instance/i-0abc".into(),
            cve: None,
        }
    }

    #[test]
    fn severity_parsing_and_order() {
        assert_eq!(Severity::parse("high"), Some(Severity::High));
        assert_eq!(Severity::parse("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::parse("loud"), None);
        assert!(Severity::Critical > Severity::Medium);
    }

    #[test]
    fn summary_respects_floor() {
        let store = FindingStore::new(vec![
            finding("a", Severity::Low),
            finding("b", Severity::High),
            finding("c", Severity::High),
            finding("d", Severity::Critical),
        ]);
        let counts = store.summary(Severity::High);
        assert_eq!(counts.get(&Severity::High), Some(&2));
        assert_eq!(counts.get(&Severity::Critical), Some(&1));
        assert!(!counts.contains_key(&Severity::Low));
    }

    #[test]
    fn config_validation() {
        let module = InspectorReports::default();
        let mut config = module.default_config();
        assert!(module.validate_config(&config).is_ok());

        config.insert("min_severity".into(), json!("SEVERE"));
        let errors = module.validate_config(&config).unwrap_err();
        assert!(errors[0].starts_with("min_severity:"));
    }

    #[tokio::test]
    async fn initialize_reads_the_storage_handle() {
        let store = Arc::new(FindingStore::new(vec![finding("a", Severity::High)]));
        let ctx = ModuleCtxBuilder::new(CancellationToken::new())
            .with_db(store)
            .build();

        let module = InspectorReports::default();
        let def = module.initialize(&ctx).await.unwrap();
        assert_eq!(def.id, MODULE_ID);
        assert_eq!(def.routes.len(), 3);
        assert_eq!(def.metadata.route_prefix.as_deref(), Some("/api/inspector"));

        let ui_ctx = ModuleContext {
            module_id: MODULE_ID.into(),
            module_name: "Inspector Reports".into(),
            route_path: String::new(),
        };
        let html = module.tab_content(&ui_ctx).unwrap();
        assert!(html.contains("<td>High</td><td>1</td>"), "{html}");
    }
}

//! Mounting registered modules onto an HTTP routing surface.
//!
//! [`RouterIntegration`] observes a [`ModuleRegistry`]: a registered module
//! gets a freshly built sub-router mounted at its resolved prefix and is moved
//! to `ACTIVE`. The surface has no unmount primitive, so an unregistered or
//! disabled module's routes stay installed; with
//! [`RouterConfig::enforce_module_state`] every request checks the live module
//! state and gets `503` instead.

mod docs;
mod handler;

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::entry::{ModuleEntry, ModuleState};
use crate::error::{MountError, MountFailure, RegistryError};
use crate::events::{RegistryEvent, RegistryEventKind, RegistryObserver};
use crate::registry::ModuleRegistry;

pub use docs::RouteDocumentation;
pub use handler::MountedRoute;

/// The external "mount sub-router at prefix" primitive.
pub trait HttpSurface: Send + Sync {
    /// Install `router` under `prefix` (`/` means merge at the root). Mounting
    /// again at the same prefix replaces the previous router.
    fn mount(&self, prefix: &str, router: Router) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Root of the default `{root}/{id}` prefix.
    pub default_prefix_root: String,
    /// Check the live module state on every request (`503` unless LOADED/ACTIVE).
    pub enforce_module_state: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_prefix_root: "/modules".to_string(),
            enforce_module_state: false,
        }
    }
}

/// What is mounted for one module.
#[derive(Debug, Clone)]
pub struct MountRecord {
    pub module_id: String,
    pub module_name: String,
    pub router: Router,
    pub prefix: String,
    pub routes: Vec<MountedRoute>,
    pub mounted_at: DateTime<Utc>,
    /// Logically disabled; routes keep answering unless state is enforced.
    pub disabled: bool,
}

/// Prefix priority: config `route_prefix`/`routePrefix`, then
/// `metadata.route_prefix`, then `{root}/{id}`.
pub fn resolve_prefix(entry: &ModuleEntry, root: &str) -> String {
    let from_config = ["route_prefix", "routePrefix"]
        .iter()
        .find_map(|k| entry.config.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty());
    let from_metadata = entry
        .metadata
        .route_prefix
        .as_deref()
        .filter(|s| !s.trim().is_empty());

    match from_config.or(from_metadata) {
        Some(p) => normalize_prefix(p),
        None => normalize_prefix(&format!("{}/{}", root.trim_end_matches('/'), entry.id)),
    }
}

fn normalize_prefix(p: &str) -> String {
    let t = p.trim().trim_matches('/');
    if t.is_empty() {
        "/".to_string()
    } else {
        format!("/{t}")
    }
}

pub struct RouterIntegration {
    registry: Weak<ModuleRegistry>,
    surface: Arc<dyn HttpSurface>,
    config: RouterConfig,
    mounts: RwLock<BTreeMap<String, MountRecord>>,
}

impl std::fmt::Debug for RouterIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterIntegration")
            .field("config", &self.config)
            .field("mounted", &self.mounts.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RouterIntegration {
    /// Create the integration and subscribe it to `registry`.
    ///
    /// The registry keeps the integration alive; the integration only holds a
    /// weak reference back.
    pub fn attach(
        registry: &Arc<ModuleRegistry>,
        surface: Arc<dyn HttpSurface>,
        config: RouterConfig,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            registry: Arc::downgrade(registry),
            surface,
            config,
            mounts: RwLock::new(BTreeMap::new()),
        });
        registry.observe(this.clone());
        this
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Build and mount `entry`'s routes, replacing any previous record.
    fn mount_entry(&self, entry: &ModuleEntry) -> Result<MountRecord, MountError> {
        let prefix = resolve_prefix(entry, &self.config.default_prefix_root);
        let gate = self
            .config
            .enforce_module_state
            .then(|| self.registry.clone());

        let (router, routes) = handler::build_module_router(entry, &prefix, gate)
            .map_err(|reason| MountError::new(&entry.id, reason))?;

        if !routes.is_empty() {
            let surface = self.surface.clone();
            let mounted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                surface.mount(&prefix, router.clone())
            }));
            match mounted {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(MountError::new(&entry.id, MountFailure::Surface(e))),
                Err(payload) => {
                    return Err(MountError::new(
                        &entry.id,
                        MountFailure::Surface(anyhow::anyhow!(
                            "panicked: {}",
                            crate::guard::panic_message(&*payload)
                        )),
                    ))
                }
            }
        }

        let record = MountRecord {
            module_id: entry.id.clone(),
            module_name: entry.name.clone(),
            router,
            prefix,
            routes,
            mounted_at: Utc::now(),
            disabled: entry.state == ModuleState::Disabled,
        };
        tracing::info!(
            module = %entry.id,
            prefix = %record.prefix,
            routes = record.routes.len(),
            "module routes mounted"
        );
        self.mounts
            .write()
            .insert(entry.id.clone(), record.clone());
        Ok(record)
    }

    /// Mount, recording failures on the entry (`ERROR` + `last_error`).
    fn mount_or_mark(
        &self,
        registry: &ModuleRegistry,
        entry: &ModuleEntry,
    ) -> Result<MountRecord, RegistryError> {
        self.mount_entry(entry).map_err(|err| {
            tracing::error!(module = %entry.id, error = %err, "mount failed");
            if let Err(mark) = registry.mark_error(&entry.id, err.to_string()) {
                tracing::warn!(module = %entry.id, error = %mark, "could not record mount failure");
            }
            RegistryError::Mount(err)
        })
    }

    fn on_registered(&self, entry: &ModuleEntry) -> Result<(), RegistryError> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let record = self.mount_or_mark(&registry, entry)?;
        if registry.state_of(&entry.id) == Some(ModuleState::Loaded) {
            registry.update_module_state(
                &entry.id,
                ModuleState::Active,
                Some(serde_json::json!({ "route_prefix": record.prefix })),
            )?;
        }
        Ok(())
    }

    fn on_unregistered(&self, entry: &ModuleEntry) {
        let Some(record) = self.mounts.write().remove(&entry.id) else {
            return;
        };
        if self.config.enforce_module_state {
            tracing::info!(
                module = %entry.id,
                prefix = %record.prefix,
                "module unregistered; its routes now answer 503"
            );
        } else {
            tracing::warn!(
                module = %entry.id,
                prefix = %record.prefix,
                "module unregistered; its routes stay installed until restart"
            );
        }
    }

    fn on_state_changed(&self, id: &str, new_state: ModuleState) -> Result<(), RegistryError> {
        match new_state {
            ModuleState::Active => {
                let known = {
                    let mut mounts = self.mounts.write();
                    match mounts.get_mut(id) {
                        Some(record) => {
                            record.disabled = false;
                            true
                        }
                        None => false,
                    }
                };
                if !known {
                    let Some(registry) = self.registry.upgrade() else {
                        return Ok(());
                    };
                    if let Some(entry) = registry.snapshot(id) {
                        tracing::debug!(module = %id, "lazy mount on activation");
                        self.mount_or_mark(&registry, &entry)?;
                    }
                }
            }
            ModuleState::Disabled => {
                if let Some(record) = self.mounts.write().get_mut(id) {
                    record.disabled = true;
                    tracing::info!(
                        module = %id,
                        enforced = self.config.enforce_module_state,
                        "module routes disabled"
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ---- Explicit operations ----

    /// Mount (or remount) a registered module now, whatever its state.
    pub fn mount_router(&self, id: &str) -> Result<MountRecord, RegistryError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let entry = registry
            .snapshot(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        self.mount_or_mark(&registry, &entry)
    }

    /// Mount every `ACTIVE` module that has no mount record yet. Returns the
    /// ids that were mounted; failures are logged and recorded on the entry.
    pub fn register_all_active_modules(&self) -> Vec<String> {
        let Some(registry) = self.registry.upgrade() else {
            return Vec::new();
        };
        let active = registry.get_all_modules(&crate::registry::ModuleFilter {
            state: Some(ModuleState::Active),
            ..Default::default()
        });
        let mut mounted = Vec::new();
        for entry in active {
            if self.mounts.read().contains_key(&entry.id) {
                continue;
            }
            if self.mount_or_mark(&registry, &entry).is_ok() {
                mounted.push(entry.id);
            }
        }
        mounted
    }

    // ---- Introspection ----

    pub fn get_all_registered_routes(&self) -> BTreeMap<String, Vec<MountedRoute>> {
        self.mounts
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.routes.clone()))
            .collect()
    }

    pub fn get_module_routes(&self, id: &str) -> Option<Vec<MountedRoute>> {
        self.mounts.read().get(id).map(|r| r.routes.clone())
    }

    pub fn has_registered_routes(&self, id: &str) -> bool {
        self.mounts
            .read()
            .get(id)
            .is_some_and(|r| !r.routes.is_empty())
    }

    pub fn mount_record(&self, id: &str) -> Option<MountRecord> {
        self.mounts.read().get(id).cloned()
    }
}

impl RegistryObserver for RouterIntegration {
    fn on_event(&self, event: &RegistryEvent) -> Result<(), RegistryError> {
        match &event.kind {
            RegistryEventKind::Registered { entry } => self.on_registered(entry),
            RegistryEventKind::Unregistered { entry } => {
                self.on_unregistered(entry);
                Ok(())
            }
            RegistryEventKind::StateChanged {
                module_id,
                new_state,
                ..
            } => self.on_state_changed(module_id, *new_state),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ModuleDefinition;

    fn entry(def: ModuleDefinition) -> ModuleEntry {
        ModuleEntry::from_definition(def, Utc::now())
    }

    #[test]
    fn prefix_priority() {
        let plain = entry(ModuleDefinition::new("scan", "Scan"));
        assert_eq!(resolve_prefix(&plain, "/modules"), "/modules/scan");
        assert_eq!(resolve_prefix(&plain, "/api/"), "/api/scan");

        let meta = entry(ModuleDefinition::new("scan", "Scan").with_route_prefix("scanner/"));
        assert_eq!(resolve_prefix(&meta, "/modules"), "/scanner");

        let both = entry(
            ModuleDefinition::new("scan", "Scan")
                .with_route_prefix("/scanner")
                .with_config("routePrefix", serde_json::json!("/api/scan")),
        );
        assert_eq!(resolve_prefix(&both, "/modules"), "/api/scan");

        let root = entry(ModuleDefinition::new("home", "Home").with_route_prefix("/"));
        assert_eq!(resolve_prefix(&root, "/modules"), "/");
    }
}

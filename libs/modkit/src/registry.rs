//! The authoritative in-memory store of module entries.
//!
//! Mutations (`register`, `unregister`, `clear_registry`, `import_state`) are
//! single-flight: they queue on a fair async mutex and run one at a time in
//! submission order. Reads go straight to the map and return clones, so they
//! see the state before or after a mutation but never a half-built entry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::contracts::{ConfigChange, ConfigMap, HookContext, ModuleDefinition};
use crate::entry::{ModuleEntry, ModuleRecord, ModuleState};
use crate::error::{HookKind, RegistryError};
use crate::events::{
    ClearFailure, ClearReport, RegistryEvent, RegistryEventKind, RegistryObserver,
};
use crate::graph::topo_sort;
use crate::guard::guarded_with_timeout;
use crate::validation::{detect_conflicts, validate_definition};

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Deadline for `init`/`cleanup`/`onConfigChange` hooks; `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub hook_timeout: Option<Duration>,
    /// Buffer of the broadcast event stream.
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Some(Duration::from_secs(30)),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Skip route/name/declared conflict detection.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnregisterOptions {
    /// Remove even while other modules depend on this one.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    RegisteredAt,
    Name,
    /// Any field of the serialized [`ModuleRecord`], as a name (`version`) or
    /// a JSON pointer (`/statistics/load_count`).
    Field(String),
}

impl From<&str> for SortKey {
    fn from(s: &str) -> Self {
        match s {
            "registered_at" | "registeredAt" => SortKey::RegisteredAt,
            "name" => SortKey::Name,
            other => SortKey::Field(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    pub state: Option<ModuleState>,
    /// Case-insensitive substring of the display name.
    pub name_contains: Option<String>,
    pub version: Option<String>,
    pub has_dependency: Option<String>,
    pub sort_by: Option<SortKey>,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_modules: usize,
    pub by_state: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
    pub total_registrations: u64,
    pub total_unregistrations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub created_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
    pub total_registrations: u64,
    pub total_unregistrations: u64,
}

/// Data-only registry dump produced by `export_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    pub metadata: RegistryMetadata,
    pub modules: Vec<ModuleRecord>,
}

pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, ModuleEntry>>,
    flight: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
    events: broadcast::Sender<RegistryEvent>,
    config: RegistryConfig,
    created_at: RwLock<DateTime<Utc>>,
    total_registrations: AtomicU64,
    total_unregistrations: AtomicU64,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.modules.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("ModuleRegistry")
            .field("modules", &ids)
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ModuleRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            modules: RwLock::new(HashMap::new()),
            flight: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            events,
            config,
            created_at: RwLock::new(Utc::now()),
            total_registrations: AtomicU64::new(0),
            total_unregistrations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ---- Subscriptions ----

    /// Add a synchronous observer. Observers are called in subscription order.
    pub fn observe(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.write().push(observer);
    }

    /// Asynchronous event stream; slow receivers lose the oldest events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Deliver to every observer, returning the first observer error.
    fn emit(&self, kind: RegistryEventKind) -> Result<(), RegistryError> {
        let event = RegistryEvent::now(kind);
        // published first: observer reactions must follow their cause on the stream
        let _ = self.events.send(event.clone());
        // snapshot: observers may re-enter the registry
        let observers: Vec<_> = self.observers.read().clone();
        let mut first_err = None;
        for obs in observers {
            if let Err(err) = obs.on_event(&event) {
                tracing::error!(event = event.name(), error = %err, "registry observer failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Same as `emit` for events whose observer failures must not change the outcome.
    fn notify(&self, kind: RegistryEventKind) {
        let _ = self.emit(kind);
    }

    // ---- Mutations (single-flight) ----

    /// Validate, conflict-check, run the `init` hook and store a new module.
    ///
    /// Returns a snapshot taken after all `moduleRegistered` observers ran, so
    /// a module mounted by the router integration comes back `ACTIVE`.
    pub async fn register(
        &self,
        def: ModuleDefinition,
        opts: RegisterOptions,
    ) -> Result<ModuleEntry, RegistryError> {
        let _flight = self.flight.lock().await;
        let id = def.id.clone();

        let (findings, conflicts) = {
            let map = self.modules.read();
            let findings = validate_definition(&def, &map);
            let conflicts = if opts.force || !findings.errors.is_empty() {
                Vec::new()
            } else {
                detect_conflicts(&def, map.values())
            };
            (findings, conflicts)
        };

        if !findings.errors.is_empty() {
            tracing::warn!(module = %id, errors = ?findings.errors, "module registration rejected");
            self.notify(RegistryEventKind::RegistrationFailed {
                module_id: id.clone(),
                errors: findings.errors.clone(),
            });
            return Err(RegistryError::Validation {
                module_id: id,
                errors: findings.errors,
            });
        }

        if !conflicts.is_empty() {
            tracing::warn!(module = %id, conflicts = conflicts.len(), "module conflicts with registered modules");
            self.notify(RegistryEventKind::RegistrationFailed {
                module_id: id.clone(),
                errors: conflicts.iter().map(ToString::to_string).collect(),
            });
            return Err(RegistryError::Conflict {
                module_id: id,
                conflicts,
            });
        }

        if !findings.warnings.is_empty() {
            tracing::warn!(module = %id, warnings = ?findings.warnings, "module registered with warnings");
            self.notify(RegistryEventKind::Warnings {
                module_id: id.clone(),
                warnings: findings.warnings,
            });
        }

        let mut entry = ModuleEntry::from_definition(def, Utc::now());

        if let Some(init) = entry.hooks.init.clone() {
            let ctx = HookContext {
                module_id: id.clone(),
                config: entry.config.clone(),
            };
            if let Err(source) =
                guarded_with_timeout(self.config.hook_timeout, move || init(ctx)).await
            {
                tracing::error!(module = %id, error = %source, "init hook failed");
                entry.state = ModuleState::Error;
                entry.last_state_change = Some(Utc::now());
                entry.record_error(format!("init hook failed: {source:#}"));
                self.modules.write().insert(id.clone(), entry);
                self.notify(RegistryEventKind::RegistrationFailed {
                    module_id: id.clone(),
                    errors: vec![format!("init hook failed: {source:#}")],
                });
                return Err(RegistryError::Hook {
                    module_id: id,
                    hook: HookKind::Init,
                    source,
                });
            }
        }

        let snapshot = entry.clone();
        self.modules.write().insert(id.clone(), entry);
        self.total_registrations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(module = %id, version = ?snapshot.version, routes = snapshot.routes.len(), "module registered");

        self.emit(RegistryEventKind::Registered {
            entry: Box::new(snapshot.clone()),
        })?;

        Ok(self.snapshot(&id).unwrap_or(snapshot))
    }

    pub async fn unregister(
        &self,
        id: &str,
        opts: UnregisterOptions,
    ) -> Result<ModuleEntry, RegistryError> {
        let _flight = self.flight.lock().await;
        self.unregister_locked(id, opts.force).await
    }

    async fn unregister_locked(&self, id: &str, force: bool) -> Result<ModuleEntry, RegistryError> {
        let blocked = {
            let mut map = self.modules.write();
            if !map.contains_key(id) {
                None
            } else {
                let mut dependents: Vec<String> = map
                    .values()
                    .filter(|e| e.id != id && e.dependencies.iter().any(|d| d == id))
                    .map(|e| e.id.clone())
                    .collect();
                dependents.sort();
                if !force && !dependents.is_empty() {
                    if let Some(entry) = map.get_mut(id) {
                        entry.record_error(format!(
                            "unregister blocked by dependents: {}",
                            dependents.join(", ")
                        ));
                    }
                    Some(Some(dependents))
                } else {
                    if let Some(entry) = map.get_mut(id) {
                        entry.state = ModuleState::Unloading;
                        entry.last_state_change = Some(Utc::now());
                    }
                    Some(None)
                }
            }
        };

        let err = match blocked {
            None => RegistryError::NotFound(id.to_string()),
            Some(Some(dependents)) => RegistryError::DependencyViolation {
                module_id: id.to_string(),
                dependents,
            },
            Some(None) => return self.finish_unregister(id).await,
        };
        tracing::warn!(module = %id, error = %err, "module unregistration rejected");
        self.notify(RegistryEventKind::UnregistrationFailed {
            module_id: id.to_string(),
            error: err.to_string(),
        });
        Err(err)
    }

    /// Entry is already `UNLOADING`: run cleanup (best-effort), then remove.
    async fn finish_unregister(&self, id: &str) -> Result<ModuleEntry, RegistryError> {
        self.notify(RegistryEventKind::Unloading {
            module_id: id.to_string(),
        });

        let (cleanup, config) = match self.modules.read().get(id) {
            Some(e) => (e.hooks.cleanup.clone(), e.config.clone()),
            None => (None, ConfigMap::new()),
        };
        if let Some(cleanup) = cleanup {
            let ctx = HookContext {
                module_id: id.to_string(),
                config,
            };
            if let Err(err) =
                guarded_with_timeout(self.config.hook_timeout, move || cleanup(ctx)).await
            {
                tracing::warn!(module = %id, error = %err, "cleanup hook failed; removing anyway");
                self.notify(RegistryEventKind::CleanupError {
                    module_id: id.to_string(),
                    error: format!("{err:#}"),
                });
            }
        }

        let removed = self
            .modules
            .write()
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        self.total_unregistrations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(module = %id, "module unregistered");

        self.notify(RegistryEventKind::Unregistered {
            entry: Box::new(removed.clone()),
        });
        Ok(removed)
    }

    /// Unregister everything, dependents before their dependencies.
    pub async fn clear_registry(&self, force: bool) -> ClearReport {
        let _flight = self.flight.lock().await;

        let order = {
            let map = self.modules.read();
            let mut ids: Vec<&ModuleEntry> = map.values().collect();
            ids.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
            let sorted = topo_sort(
                ids.iter()
                    .map(|e| (e.id.as_str(), e.dependencies.iter().map(String::as_str))),
            );
            match sorted {
                Ok(mut order) => {
                    order.reverse();
                    order
                }
                Err(cycle) => {
                    tracing::warn!(cycle = %cycle.join(" -> "), "dependency cycle; clearing in registration order");
                    ids.iter().rev().map(|e| e.id.clone()).collect()
                }
            }
        };

        let mut report = ClearReport::default();
        for id in order {
            match self.unregister_locked(&id, force).await {
                Ok(_) => report.cleared.push(id),
                Err(err) => report.failed.push(ClearFailure {
                    module_id: id,
                    error: err.to_string(),
                }),
            }
        }

        tracing::info!(
            cleared = report.cleared.len(),
            failed = report.failed.len(),
            "registry cleared"
        );
        self.notify(RegistryEventKind::RegistryCleared {
            report: report.clone(),
        });
        report
    }

    /// Replace the whole map with `state`. No validation is re-run; callables
    /// are carried over from live entries with the same id.
    pub async fn import_state(&self, state: RegistryState) -> Result<usize, RegistryError> {
        let _flight = self.flight.lock().await;

        let mut seen = HashSet::new();
        if let Some(dup) = state.modules.iter().find(|m| !seen.insert(m.id.as_str())) {
            let err = RegistryError::Import(format!("duplicate module id '{}'", dup.id));
            self.notify(RegistryEventKind::StateImportFailed {
                error: err.to_string(),
            });
            return Err(err);
        }

        let count = state.modules.len();
        {
            let mut map = self.modules.write();
            let rebuilt: HashMap<String, ModuleEntry> = state
                .modules
                .into_iter()
                .map(|record| {
                    let live = map.get(&record.id).cloned();
                    let entry = ModuleEntry::from_record(record, live.as_ref());
                    (entry.id.clone(), entry)
                })
                .collect();
            *map = rebuilt;
        }
        *self.created_at.write() = state.metadata.created_at;
        self.total_registrations
            .store(state.metadata.total_registrations, Ordering::Relaxed);
        self.total_unregistrations
            .store(state.metadata.total_unregistrations, Ordering::Relaxed);

        tracing::info!(modules = count, "registry state imported");
        self.notify(RegistryEventKind::StateImported {
            module_count: count,
        });
        Ok(count)
    }

    /// `import_state` from an untyped JSON document.
    pub async fn import_state_json(&self, value: serde_json::Value) -> Result<usize, RegistryError> {
        match serde_json::from_value::<RegistryState>(value) {
            Ok(state) => self.import_state(state).await,
            Err(e) => {
                let err = RegistryError::Import(e.to_string());
                self.notify(RegistryEventKind::StateImportFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    // ---- Updates (not serialized; observers call these) ----

    /// Record a caller-driven transition and fire `moduleStateChanged` once.
    ///
    /// Object `metadata` is merged into the entry's `state_details`; any
    /// other JSON value is stored under `details`.
    pub fn update_module_state(
        &self,
        id: &str,
        new_state: ModuleState,
        metadata: Option<serde_json::Value>,
    ) -> Result<ModuleEntry, RegistryError> {
        let (old_state, snapshot) = {
            let mut map = self.modules.write();
            let entry = map
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let old = entry.state;
            entry.state = new_state;
            entry.last_state_change = Some(Utc::now());
            match &metadata {
                Some(serde_json::Value::Object(m)) => {
                    for (k, v) in m {
                        entry.state_details.insert(k.clone(), v.clone());
                    }
                }
                Some(other) => {
                    entry.state_details.insert("details".into(), other.clone());
                }
                None => {}
            }
            (old, entry.clone())
        };

        tracing::info!(module = %id, from = %old_state, to = %new_state, "module state changed");
        self.emit(RegistryEventKind::StateChanged {
            module_id: id.to_string(),
            old_state,
            new_state,
            metadata,
        })?;
        Ok(snapshot)
    }

    /// Move a module to `ERROR`, recording `message` in `last_error`.
    pub fn mark_error(&self, id: &str, message: impl Into<String>) -> Result<(), RegistryError> {
        let message = message.into();
        let old_state = {
            let mut map = self.modules.write();
            let entry = map
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let old = entry.state;
            entry.state = ModuleState::Error;
            entry.last_state_change = Some(Utc::now());
            entry.record_error(message.clone());
            old
        };
        tracing::error!(module = %id, error = %message, "module moved to ERROR");
        self.notify(RegistryEventKind::StateChanged {
            module_id: id.to_string(),
            old_state,
            new_state: ModuleState::Error,
            metadata: Some(serde_json::json!({ "error": message })),
        });
        Ok(())
    }

    /// Shallow-merge `patch` into the module's config, fire `moduleConfigChanged`,
    /// then await the module's `onConfigChange` hook.
    pub async fn update_module_config(
        &self,
        id: &str,
        patch: ConfigMap,
    ) -> Result<ModuleEntry, RegistryError> {
        let (old_config, new_config, hook) = {
            let mut map = self.modules.write();
            let entry = map
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let old = entry.config.clone();
            for (k, v) in patch {
                entry.config.insert(k, v);
            }
            entry.last_config_update = Some(Utc::now());
            (old, entry.config.clone(), entry.hooks.on_config_change.clone())
        };

        tracing::info!(module = %id, keys = new_config.len(), "module config updated");
        self.emit(RegistryEventKind::ConfigChanged {
            module_id: id.to_string(),
            old_config: old_config.clone(),
            new_config: new_config.clone(),
        })?;

        if let Some(hook) = hook {
            let change = ConfigChange {
                module_id: id.to_string(),
                old_config,
                new_config,
            };
            if let Err(source) =
                guarded_with_timeout(self.config.hook_timeout, move || hook(change)).await
            {
                tracing::warn!(module = %id, error = %source, "onConfigChange hook failed");
                if let Some(entry) = self.modules.write().get_mut(id) {
                    entry.record_error(format!("onConfigChange hook failed: {source:#}"));
                }
                return Err(RegistryError::Hook {
                    module_id: id.to_string(),
                    hook: HookKind::ConfigChange,
                    source,
                });
            }
        }

        self.snapshot(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    // ---- Reads ----

    /// Independent copy of the entry. Counts as an access: bumps
    /// `statistics.load_count` and `last_access` on the stored entry.
    pub fn get_module(&self, id: &str) -> Option<ModuleEntry> {
        let mut map = self.modules.write();
        let entry = map.get_mut(id)?;
        entry.statistics.load_count += 1;
        entry.statistics.last_access = Some(Utc::now());
        tracing::trace!(module = %id, "module read");
        Some(entry.clone())
    }

    /// Copy of the entry without touching its statistics.
    pub fn snapshot(&self, id: &str) -> Option<ModuleEntry> {
        self.modules.read().get(id).cloned()
    }

    pub fn state_of(&self, id: &str) -> Option<ModuleState> {
        self.modules.read().get(id).map(|e| e.state)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    pub fn get_all_modules(&self, filter: &ModuleFilter) -> Vec<ModuleEntry> {
        let needle = filter.name_contains.as_ref().map(|s| s.to_lowercase());
        let mut out: Vec<ModuleEntry> = self
            .modules
            .read()
            .values()
            .filter(|e| filter.state.map_or(true, |s| e.state == s))
            .filter(|e| {
                needle
                    .as_ref()
                    .map_or(true, |n| e.name.to_lowercase().contains(n.as_str()))
            })
            .filter(|e| {
                filter
                    .version
                    .as_ref()
                    .map_or(true, |v| e.version.as_ref() == Some(v))
            })
            .filter(|e| {
                filter
                    .has_dependency
                    .as_ref()
                    .map_or(true, |d| e.dependencies.contains(d))
            })
            .cloned()
            .collect();

        match filter.sort_by.as_ref().unwrap_or(&SortKey::RegisteredAt) {
            SortKey::RegisteredAt => {
                out.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)))
            }
            SortKey::Name => out.sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then(a.id.cmp(&b.id))
            }),
            SortKey::Field(field) => {
                let pointer = if field.starts_with('/') {
                    field.clone()
                } else {
                    format!("/{field}")
                };
                let mut keyed: Vec<(serde_json::Value, ModuleEntry)> = out
                    .into_iter()
                    .map(|e| {
                        let key = serde_json::to_value(e.to_record())
                            .ok()
                            .and_then(|v| v.pointer(&pointer).cloned())
                            .unwrap_or(serde_json::Value::Null);
                        (key, e)
                    })
                    .collect();
                keyed.sort_by(|(ka, a), (kb, b)| compare_json(ka, kb).then(a.id.cmp(&b.id)));
                out = keyed.into_iter().map(|(_, e)| e).collect();
            }
        }
        if filter.order == SortOrder::Desc {
            out.reverse();
        }
        out
    }

    /// Registered modules that list `id` in their dependencies.
    pub fn get_dependent_modules(&self, id: &str) -> Vec<ModuleEntry> {
        let mut out: Vec<ModuleEntry> = self
            .modules
            .read()
            .values()
            .filter(|e| e.dependencies.iter().any(|d| d == id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Dependencies of `id` that are missing or not `ACTIVE`.
    pub fn unmet_dependencies(&self, id: &str) -> Result<Vec<String>, RegistryError> {
        let map = self.modules.read();
        let entry = map
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(entry
            .dependencies
            .iter()
            .filter(|d| map.get(*d).map_or(true, |dep| dep.state != ModuleState::Active))
            .cloned()
            .collect())
    }

    pub fn stats(&self) -> RegistryStats {
        let map = self.modules.read();
        let mut by_state = BTreeMap::new();
        for e in map.values() {
            *by_state.entry(e.state.as_str().to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            total_modules: map.len(),
            by_state,
            created_at: *self.created_at.read(),
            total_registrations: self.total_registrations.load(Ordering::Relaxed),
            total_unregistrations: self.total_unregistrations.load(Ordering::Relaxed),
        }
    }

    pub fn export_state(&self) -> RegistryState {
        let mut modules: Vec<ModuleRecord> =
            self.modules.read().values().map(ModuleEntry::to_record).collect();
        modules.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        RegistryState {
            metadata: RegistryMetadata {
                created_at: *self.created_at.read(),
                exported_at: Utc::now(),
                total_registrations: self.total_registrations.load(Ordering::Relaxed),
                total_unregistrations: self.total_unregistrations.load(Ordering::Relaxed),
            },
            modules,
        }
    }
}

fn compare_json(a: &serde_json::Value, b: &serde_json::Value) -> std::cmp::Ordering {
    use serde_json::Value;
    use std::cmp::Ordering as O;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(O::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => O::Equal,
        // nulls (missing fields) sort first
        (Value::Null, _) => O::Less,
        (_, Value::Null) => O::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

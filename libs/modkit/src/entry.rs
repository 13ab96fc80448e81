use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contracts::{
    ConfigMap, Exports, Middleware, ModuleDefinition, ModuleHooks, ModuleMetadata,
    RouteDescriptor, RouteTable,
};

/// Lifecycle state of a registered module.
///
/// Transitions are caller-driven; the registry records whatever it is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    Loaded,
    Active,
    Disabled,
    Error,
    Unloading,
}

impl ModuleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ModuleState::Loaded => "LOADED",
            ModuleState::Active => "ACTIVE",
            ModuleState::Disabled => "DISABLED",
            ModuleState::Error => "ERROR",
            ModuleState::Unloading => "UNLOADING",
        }
    }

    /// States whose routes are expected to serve traffic.
    pub const fn is_serving(self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Active)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown module state '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for ModuleState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOADED" => Ok(ModuleState::Loaded),
            "ACTIVE" => Ok(ModuleState::Active),
            "DISABLED" => Ok(ModuleState::Disabled),
            "ERROR" => Ok(ModuleState::Error),
            "UNLOADING" => Ok(ModuleState::Unloading),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// Access/error counters. Only the registry's own read and write paths touch these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatistics {
    pub load_count: u64,
    pub error_count: u64,
    pub last_access: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// A registered module as the registry keeps it.
///
/// Callers only ever receive clones. Data fields are copied; callables
/// (handlers, middleware, hooks, exports) stay shared behind `Arc` and are
/// never mutated by the registry.
#[derive(Clone)]
pub struct ModuleEntry {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub state: ModuleState,
    pub routes: RouteTable,
    pub middleware: Vec<Middleware>,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    pub exports: Exports,
    pub config: ConfigMap,
    pub hooks: ModuleHooks,
    pub metadata: ModuleMetadata,
    pub statistics: ModuleStatistics,
    pub last_error: Option<ErrorRecord>,
    pub registered_at: DateTime<Utc>,
    pub last_state_change: Option<DateTime<Utc>>,
    pub last_config_update: Option<DateTime<Utc>>,
    /// Merged metadata passed along with state updates.
    pub state_details: ConfigMap,
}

impl ModuleEntry {
    pub(crate) fn from_definition(def: ModuleDefinition, now: DateTime<Utc>) -> Self {
        Self {
            id: def.id,
            name: def.name,
            version: def.version,
            description: def.description,
            state: ModuleState::Loaded,
            routes: def.routes,
            middleware: def.middleware,
            dependencies: def.dependencies,
            conflicts: def.conflicts,
            exports: def.exports,
            config: def.config,
            hooks: def.hooks,
            metadata: def.metadata,
            statistics: ModuleStatistics::default(),
            last_error: None,
            registered_at: now,
            last_state_change: None,
            last_config_update: None,
            state_details: ConfigMap::new(),
        }
    }

    /// Rebuild an entry from exported data. Callables are taken from `live`
    /// when an entry with the same id still exists.
    pub(crate) fn from_record(record: ModuleRecord, live: Option<&ModuleEntry>) -> Self {
        let (routes, middleware, exports, hooks) = match live {
            Some(e) => (
                e.routes.clone(),
                e.middleware.clone(),
                e.exports.clone(),
                e.hooks.clone(),
            ),
            None => Default::default(),
        };
        Self {
            id: record.id,
            name: record.name,
            version: record.version,
            description: record.description,
            state: record.state,
            routes,
            middleware,
            dependencies: record.dependencies,
            conflicts: record.conflicts,
            exports,
            config: record.config,
            hooks,
            metadata: record.metadata,
            statistics: record.statistics,
            last_error: record.last_error,
            registered_at: record.registered_at,
            last_state_change: record.last_state_change,
            last_config_update: record.last_config_update,
            state_details: record.state_details,
        }
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(ErrorRecord::now(message));
        self.statistics.error_count += 1;
    }

    /// Serializable data of this entry (callables are dropped, route shapes kept).
    pub fn to_record(&self) -> ModuleRecord {
        ModuleRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            state: self.state,
            routes: self.routes.descriptors(),
            dependencies: self.dependencies.clone(),
            conflicts: self.conflicts.clone(),
            exports: self.exports.names(),
            config: self.config.clone(),
            metadata: self.metadata.clone(),
            statistics: self.statistics.clone(),
            last_error: self.last_error.clone(),
            registered_at: self.registered_at,
            last_state_change: self.last_state_change,
            last_config_update: self.last_config_update,
            state_details: self.state_details.clone(),
        }
    }
}

impl fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("routes", &self.routes.len())
            .field("dependencies", &self.dependencies)
            .field("exports", &self.exports)
            .field("statistics", &self.statistics)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Data-only form of a [`ModuleEntry`], used for export/import and HTTP views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub state: ModuleState,
    #[serde(default)]
    pub routes: Vec<RouteDescriptor>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Names only; export values cannot be serialized.
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub metadata: ModuleMetadata,
    #[serde(default)]
    pub statistics: ModuleStatistics,
    #[serde(default)]
    pub last_error: Option<ErrorRecord>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_state_change: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_config_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state_details: ConfigMap,
}

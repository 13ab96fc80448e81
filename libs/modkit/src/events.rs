use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::contracts::ConfigMap;
use crate::entry::{ModuleEntry, ModuleState};
use crate::error::RegistryError;

/// One registry lifecycle notification.
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    pub kind: RegistryEventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RegistryEventKind {
    Registered {
        entry: Box<ModuleEntry>,
    },
    RegistrationFailed {
        module_id: String,
        errors: Vec<String>,
    },
    Warnings {
        module_id: String,
        warnings: Vec<String>,
    },
    Unloading {
        module_id: String,
    },
    Unregistered {
        entry: Box<ModuleEntry>,
    },
    UnregistrationFailed {
        module_id: String,
        error: String,
    },
    CleanupError {
        module_id: String,
        error: String,
    },
    StateChanged {
        module_id: String,
        old_state: ModuleState,
        new_state: ModuleState,
        metadata: Option<serde_json::Value>,
    },
    ConfigChanged {
        module_id: String,
        old_config: ConfigMap,
        new_config: ConfigMap,
    },
    RegistryCleared {
        report: ClearReport,
    },
    StateImported {
        module_count: usize,
    },
    StateImportFailed {
        error: String,
    },
}

/// Outcome of `clear_registry`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub cleared: Vec<String>,
    pub failed: Vec<ClearFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearFailure {
    pub module_id: String,
    pub error: String,
}

impl RegistryEvent {
    pub(crate) fn now(kind: RegistryEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Wire name, e.g. `moduleRegistered`.
    pub fn name(&self) -> &'static str {
        use RegistryEventKind::*;
        match &self.kind {
            Registered { .. } => "moduleRegistered",
            RegistrationFailed { .. } => "moduleRegistrationFailed",
            Warnings { .. } => "moduleWarnings",
            Unloading { .. } => "moduleUnloading",
            Unregistered { .. } => "moduleUnregistered",
            UnregistrationFailed { .. } => "moduleUnregistrationFailed",
            CleanupError { .. } => "moduleCleanupError",
            StateChanged { .. } => "moduleStateChanged",
            ConfigChanged { .. } => "moduleConfigChanged",
            RegistryCleared { .. } => "registryCleared",
            StateImported { .. } => "registryStateImported",
            StateImportFailed { .. } => "registryStateImportFailed",
        }
    }

    /// `None` for registry-wide events.
    pub fn module_id(&self) -> Option<&str> {
        use RegistryEventKind::*;
        match &self.kind {
            Registered { entry } | Unregistered { entry } => Some(&entry.id),
            RegistrationFailed { module_id, .. }
            | Warnings { module_id, .. }
            | Unloading { module_id }
            | UnregistrationFailed { module_id, .. }
            | CleanupError { module_id, .. }
            | StateChanged { module_id, .. }
            | ConfigChanged { module_id, .. } => Some(module_id),
            RegistryCleared { .. } | StateImported { .. } | StateImportFailed { .. } => None,
        }
    }
}

/// Synchronous registry subscriber.
///
/// Called in commit order, outside of the registry's map lock, so an observer
/// may call back into the registry (e.g. `update_module_state`). An `Err`
/// from a `Registered`/`StateChanged` reaction is returned to the caller of
/// the operation that fired it.
pub trait RegistryObserver: Send + Sync {
    fn on_event(&self, event: &RegistryEvent) -> Result<(), RegistryError>;
}

impl<F> RegistryObserver for F
where
    F: Fn(&RegistryEvent) -> Result<(), RegistryError> + Send + Sync,
{
    fn on_event(&self, event: &RegistryEvent) -> Result<(), RegistryError> {
        self(event)
    }
}

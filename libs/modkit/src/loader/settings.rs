use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Persisted per-module switches owned by the dashboard's settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSettings {
    #[serde(default)]
    pub module_id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub display_order: Option<u32>,
}

fn enabled_by_default() -> bool {
    true
}

impl ModuleSettings {
    pub fn enabled(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            enabled: true,
            display_order: None,
        }
    }

    pub fn disabled(module_id: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::enabled(module_id)
        }
    }

    pub fn with_display_order(mut self, order: u32) -> Self {
        self.display_order = Some(order);
        self
    }
}

/// The settings collaborator consumed by `ModuleLoader::load_enabled`.
#[async_trait]
pub trait ModuleSettingsStore: Send + Sync {
    /// `None` means "no stored preference"; the manifest's `enabled` applies.
    async fn get(&self, module_id: &str) -> anyhow::Result<Option<ModuleSettings>>;

    async fn all(&self) -> anyhow::Result<Vec<ModuleSettings>>;
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    items: RwLock<HashMap<String, ModuleSettings>>,
}

impl InMemorySettingsStore {
    pub fn new(items: impl IntoIterator<Item = ModuleSettings>) -> Self {
        Self {
            items: RwLock::new(
                items
                    .into_iter()
                    .map(|s| (s.module_id.clone(), s))
                    .collect(),
            ),
        }
    }

    pub fn put(&self, settings: ModuleSettings) {
        self.items
            .write()
            .insert(settings.module_id.clone(), settings);
    }
}

#[async_trait]
impl ModuleSettingsStore for InMemorySettingsStore {
    async fn get(&self, module_id: &str) -> anyhow::Result<Option<ModuleSettings>> {
        Ok(self.items.read().get(module_id).cloned())
    }

    async fn all(&self) -> anyhow::Result<Vec<ModuleSettings>> {
        let mut all: Vec<_> = self.items.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.display_order
                .unwrap_or(u32::MAX)
                .cmp(&b.display_order.unwrap_or(u32::MAX))
                .then_with(|| a.module_id.cmp(&b.module_id))
        });
        Ok(all)
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::manifest::ModuleManifest;
use crate::contracts::Module;

/// Produces the compiled module for a manifest.
pub trait ModuleFactory: Send + Sync {
    fn create(&self, manifest: &ModuleManifest) -> anyhow::Result<Arc<dyn Module>>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&ModuleManifest) -> anyhow::Result<Arc<dyn Module>> + Send + Sync,
{
    fn create(&self, manifest: &ModuleManifest) -> anyhow::Result<Arc<dyn Module>> {
        self(manifest)
    }
}

/// Named factories; a manifest's `factory` key selects one.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, Arc<dyn ModuleFactory>>,
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, factory: impl ModuleFactory + 'static) -> Self {
        self.insert(key, factory);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, factory: impl ModuleFactory + 'static) {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ModuleFactory>> {
        self.factories.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

//! Modules compiled into the server binary.

use std::sync::Arc;

use modkit::{Module, ModuleCatalog, ModuleManifest};

pub mod inspector_reports;
pub mod registry_admin;

pub use inspector_reports::{Finding, FindingStore, InspectorReports, Severity};
pub use registry_admin::RegistryAdmin;

/// Factories for every built-in, keyed by module id.
pub fn catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with(registry_admin::MODULE_ID, |_: &ModuleManifest| {
            Ok::<_, anyhow::Error>(Arc::new(RegistryAdmin) as Arc<dyn Module>)
        })
        .with(inspector_reports::MODULE_ID, |_: &ModuleManifest| {
            Ok::<_, anyhow::Error>(Arc::new(InspectorReports::default()) as Arc<dyn Module>)
        })
}

/// Default manifests; a manifest with the same id in the module directory
/// takes precedence.
pub fn manifests() -> Vec<ModuleManifest> {
    let mut admin = ModuleManifest::new(registry_admin::MODULE_ID, "Registry Admin");
    admin.version = Some(env!("CARGO_PKG_VERSION").to_string());
    admin.metadata.tags = vec!["builtin".into(), "admin".into()];

    let mut reports = ModuleManifest::new(inspector_reports::MODULE_ID, "Inspector Reports");
    reports.version = Some(env!("CARGO_PKG_VERSION").to_string());
    reports.description = Some("AWS Inspector findings by severity".into());
    reports.metadata.tags = vec!["builtin".into(), "aws".into()];

    vec![admin, reports]
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit::ModuleFactory;

    #[test]
    fn every_manifest_has_a_factory() {
        let catalog = catalog();
        for manifest in manifests() {
            assert!(catalog.contains(manifest.factory_key()), "{}", manifest.id);
            let module = catalog
                .get(manifest.factory_key())
                .unwrap()
                .create(&manifest)
                .unwrap();
            assert_eq!(module.id(), manifest.id);
        }
    }
}

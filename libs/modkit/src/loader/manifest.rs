use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::contracts::{ConfigMap, ModuleMetadata};
use crate::error::LoaderError;

/// Declarative half of a module: identity, wiring and configuration. The
/// compiled half comes from the factory named by `factory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Catalog key of the module implementation; defaults to `id`.
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub metadata: ModuleMetadata,
}

fn default_enabled() -> bool {
    true
}

impl ModuleManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: None,
            description: None,
            factory: None,
            enabled: true,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            config: ConfigMap::new(),
            metadata: ModuleMetadata::default(),
        }
    }

    pub fn factory_key(&self) -> &str {
        self.factory.as_deref().unwrap_or(&self.id)
    }

    pub fn descriptor(&self, location: Option<PathBuf>) -> ModuleDescriptor {
        ModuleDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            enabled: self.enabled,
            location,
        }
    }

    /// Minimal contract: non-empty `id` and `name`.
    pub fn shape_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.id.trim().is_empty() {
            errors.push("id: must be a non-empty string".to_string());
        }
        if self.name.trim().is_empty() {
            errors.push("name: must be a non-empty string".to_string());
        }
        if self.factory.as_deref().is_some_and(|f| f.trim().is_empty()) {
            errors.push("factory: must not be empty when given".to_string());
        }
        errors
    }
}

/// Lightweight identity produced by discovery, without instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// File the manifest came from, when file-backed.
    pub location: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManifestFormat {
    Yaml,
    Json,
}

impl ManifestFormat {
    pub(crate) fn of(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(ManifestFormat::Yaml),
            "json" => Some(ManifestFormat::Json),
            _ => None,
        }
    }
}

pub(crate) fn parse_manifest(path: &Path, text: &str) -> Result<ModuleManifest, LoaderError> {
    let parse_err = |message: String| LoaderError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match ManifestFormat::of(path) {
        Some(ManifestFormat::Yaml) => {
            serde_yaml::from_str(text).map_err(|e| parse_err(e.to_string()))
        }
        Some(ManifestFormat::Json) => {
            serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))
        }
        None => Err(parse_err("unsupported manifest extension".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_manifest_with_defaults() {
        let m = parse_manifest(
            Path::new("reports.yaml"),
            "id: reports\nname: Inspector Reports\nconfig:\n  page_size: 50\nmetadata:\n  route_prefix: /reports\n  tags: [aws]\n",
        )
        .unwrap();
        assert!(m.enabled);
        assert_eq!(m.factory_key(), "reports");
        assert_eq!(m.config["page_size"], 50);
        assert_eq!(m.metadata.route_prefix.as_deref(), Some("/reports"));
        assert_eq!(m.metadata.tags, vec!["aws"]);
        assert!(m.shape_errors().is_empty());
    }

    #[test]
    fn json_manifest_and_unknown_fields() {
        let ok = parse_manifest(
            Path::new("m.JSON"),
            r#"{"id":"a","name":"A","factory":"shared","enabled":false}"#,
        )
        .unwrap();
        assert_eq!(ok.factory_key(), "shared");
        assert!(!ok.enabled);

        let bad = parse_manifest(Path::new("m.json"), r#"{"id":"a","name":"A","route":"/x"}"#);
        assert!(matches!(bad, Err(LoaderError::Parse { .. })));

        let ext = parse_manifest(Path::new("m.toml"), "id = 'a'");
        assert!(matches!(ext, Err(LoaderError::Parse { .. })));
    }

    #[test]
    fn shape_errors_collects_all() {
        let m = ModuleManifest::new(" ", "");
        assert_eq!(m.shape_errors().len(), 2);
    }
}

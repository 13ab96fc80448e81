//! Where module manifests come from.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;

use super::manifest::{parse_manifest, ModuleDescriptor, ModuleManifest};
use crate::error::LoaderError;

/// Pluggable provider of module manifests.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Cheap pre-scan: identity of every available module.
    async fn discover(&self) -> Result<Vec<ModuleDescriptor>, LoaderError>;

    /// Full manifest for one discovered module.
    async fn fetch(&self, id: &str) -> Result<ModuleManifest, LoaderError>;

    /// Directory a watcher should poll, if the source is file-backed.
    fn watch_root(&self) -> Option<PathBuf> {
        None
    }
}

/// Manifests in a directory: `*.yaml|*.yml|*.json` files and
/// `<subdir>/module.yaml|module.yml|module.json`.
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
    /// id → file, refreshed by every `discover`.
    index: RwLock<HashMap<String, PathBuf>>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate manifest files, sorted for a stable discovery order.
    pub(crate) async fn candidate_files(root: &Path) -> Result<Vec<PathBuf>, LoaderError> {
        let io_err = |path: &Path, source: std::io::Error| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut out = Vec::new();
        let mut rd = match fs::read_dir(root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(io_err(root, e)),
        };
        while let Some(entry) = rd.next_entry().await.map_err(|e| io_err(root, e))? {
            let path = entry.path();
            let ft = entry.file_type().await.map_err(|e| io_err(&path, e))?;
            if ft.is_dir() {
                for name in ["module.yaml", "module.yml", "module.json"] {
                    let candidate = path.join(name);
                    if fs::try_exists(&candidate).await.unwrap_or(false) {
                        out.push(candidate);
                        break;
                    }
                }
            } else if super::manifest::ManifestFormat::of(&path).is_some() {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }

    async fn read(path: &Path) -> Result<ModuleManifest, LoaderError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| LoaderError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        parse_manifest(path, &text)
    }
}

#[async_trait]
impl DefinitionSource for DirectorySource {
    /// Unparseable files and duplicate ids are skipped with a warning; a
    /// missing directory yields nothing.
    async fn discover(&self) -> Result<Vec<ModuleDescriptor>, LoaderError> {
        let mut found = Vec::new();
        let mut index: HashMap<String, PathBuf> = HashMap::new();
        for path in Self::candidate_files(&self.root).await? {
            let manifest = match Self::read(&path).await {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping module manifest");
                    continue;
                }
            };
            if let Some(prev) = index.get(&manifest.id) {
                tracing::warn!(
                    module = %manifest.id,
                    path = %path.display(),
                    first = %prev.display(),
                    "duplicate module id; keeping the first manifest"
                );
                continue;
            }
            index.insert(manifest.id.clone(), path.clone());
            found.push(manifest.descriptor(Some(path)));
        }
        tracing::debug!(root = %self.root.display(), modules = found.len(), "module discovery finished");
        *self.index.write() = index;
        Ok(found)
    }

    async fn fetch(&self, id: &str) -> Result<ModuleManifest, LoaderError> {
        let known = self.index.read().get(id).cloned();
        let path = match known {
            Some(p) => p,
            None => {
                self.discover().await?;
                self.index
                    .read()
                    .get(id)
                    .cloned()
                    .ok_or_else(|| LoaderError::NotFound(id.to_string()))?
            }
        };
        let manifest = Self::read(&path).await?;
        if manifest.id != id {
            // file was edited to another id since discovery
            return Err(LoaderError::NotFound(id.to_string()));
        }
        Ok(manifest)
    }

    fn watch_root(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}

/// In-process manifests, for built-in modules and tests.
#[derive(Debug, Default)]
pub struct StaticSource {
    manifests: RwLock<BTreeMap<String, ModuleManifest>>,
}

impl StaticSource {
    pub fn new(manifests: impl IntoIterator<Item = ModuleManifest>) -> Self {
        Self {
            manifests: RwLock::new(
                manifests
                    .into_iter()
                    .map(|m| (m.id.clone(), m))
                    .collect(),
            ),
        }
    }

    /// Insert or replace a manifest (picked up by the next `reload`).
    pub fn upsert(&self, manifest: ModuleManifest) {
        self.manifests.write().insert(manifest.id.clone(), manifest);
    }

    pub fn remove(&self, id: &str) -> Option<ModuleManifest> {
        self.manifests.write().remove(id)
    }
}

#[async_trait]
impl DefinitionSource for StaticSource {
    async fn discover(&self) -> Result<Vec<ModuleDescriptor>, LoaderError> {
        Ok(self
            .manifests
            .read()
            .values()
            .map(|m| m.descriptor(None))
            .collect())
    }

    async fn fetch(&self, id: &str) -> Result<ModuleManifest, LoaderError> {
        self.manifests
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound(id.to_string()))
    }
}

/// Several sources stacked; a later layer overrides an earlier one with the
/// same id. The first file-backed layer is the watch root.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Arc<dyn DefinitionSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: Arc<dyn DefinitionSource>) -> Self {
        self.layers.push(layer);
        self
    }
}

#[async_trait]
impl DefinitionSource for LayeredSource {
    async fn discover(&self) -> Result<Vec<ModuleDescriptor>, LoaderError> {
        let mut by_id: BTreeMap<String, ModuleDescriptor> = BTreeMap::new();
        for layer in &self.layers {
            for descriptor in layer.discover().await? {
                by_id.insert(descriptor.id.clone(), descriptor);
            }
        }
        Ok(by_id.into_values().collect())
    }

    async fn fetch(&self, id: &str) -> Result<ModuleManifest, LoaderError> {
        for layer in self.layers.iter().rev() {
            match layer.fetch(id).await {
                Err(LoaderError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(LoaderError::NotFound(id.to_string()))
    }

    fn watch_root(&self) -> Option<PathBuf> {
        self.layers.iter().find_map(|l| l.watch_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_discovery_reads_files_and_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "id: a\nname: A\n").unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"id":"b","name":"B","enabled":false}"#)
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.yml"), "id: [").unwrap();
        std::fs::write(dir.path().join("dup.yml"), "id: a\nname: Again\n").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();
        std::fs::write(dir.path().join("c").join("module.yaml"), "id: c\nname: C\n").unwrap();

        let src = DirectorySource::new(dir.path());
        let found = src.discover().await.unwrap();
        let ids: Vec<_> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!found[1].enabled);
        assert_eq!(found[0].name, "A");

        let c = src.fetch("c").await.unwrap();
        assert_eq!(c.name, "C");
        assert!(matches!(src.fetch("zzz").await, Err(LoaderError::NotFound(_))));
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let src = DirectorySource::new(dir.path().join("nope"));
        assert!(src.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn static_source_upsert_and_remove() {
        let src = StaticSource::new([ModuleManifest::new("a", "A")]);
        src.upsert(ModuleManifest::new("b", "B"));
        assert_eq!(src.discover().await.unwrap().len(), 2);
        assert!(src.remove("a").is_some());
        assert!(src.fetch("a").await.is_err());
        assert!(src.watch_root().is_none());
    }

    #[tokio::test]
    async fn layered_source_prefers_later_layers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "id: a\nname: From disk\n").unwrap();
        std::fs::write(dir.path().join("c.yaml"), "id: c\nname: C\n").unwrap();

        let src = LayeredSource::new()
            .with_layer(Arc::new(StaticSource::new([
                ModuleManifest::new("a", "Built in"),
                ModuleManifest::new("b", "B"),
            ])))
            .with_layer(Arc::new(DirectorySource::new(dir.path())));

        let found = src.discover().await.unwrap();
        let ids: Vec<_> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(found[0].name, "From disk");
        assert!(found[0].location.is_some());

        assert_eq!(src.fetch("a").await.unwrap().name, "From disk");
        assert_eq!(src.fetch("b").await.unwrap().name, "B");
        assert!(matches!(src.fetch("z").await, Err(LoaderError::NotFound(_))));
        assert_eq!(src.watch_root().as_deref(), Some(dir.path()));
    }
}

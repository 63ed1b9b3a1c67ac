//! Loading strategies for mapping models.
//!
//! Every strategy returns a batch: all models it could produce while
//! looking for the requested lookup name. The registry caches the whole
//! batch and checks it for the requested key afterwards.

use crate::loader::load_from_file;
use crate::model::MappingModel;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Manifest file name at the root of a model archive
pub const ARCHIVE_MANIFEST: &str = "mapping-models.lst";

const MODEL_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// A pluggable source of mapping models
pub trait ModelLoader: Send + Sync {
    /// Load a batch of models expected to contain `lookup_name`.
    ///
    /// Returning a batch without the requested model is not an error here;
    /// the registry reports the miss.
    fn load(&self, lookup_name: &str) -> Result<Vec<MappingModel>>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Loads an explicit list of model files, always as one batch.
#[derive(Debug, Clone)]
pub struct FileListLoader {
    files: Vec<PathBuf>,
}

impl FileListLoader {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Parse a comma-separated list of paths.
    pub fn from_list(list: &str) -> Self {
        let files = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { files }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl ModelLoader for FileListLoader {
    fn load(&self, _lookup_name: &str) -> Result<Vec<MappingModel>> {
        let mut batch = Vec::new();
        for file in &self.files {
            batch.extend(load_from_file(file)?);
        }
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("file list ({} files)", self.files.len())
    }
}

/// Loads every model listed in an archive's manifest.
///
/// An archive is a directory with a [`ARCHIVE_MANIFEST`] at its root. Each
/// non-empty line not starting with `#` names a model file relative to the
/// archive root.
#[derive(Debug, Clone)]
pub struct ArchiveLoader {
    root: PathBuf,
}

impl ArchiveLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Entries of the manifest, resolved against the archive root.
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let manifest = self.root.join(ARCHIVE_MANIFEST);
        let content = std::fs::read_to_string(&manifest).map_err(|e| {
            Error::InvalidFormat(format!(
                "cannot read archive manifest {}: {e}",
                manifest.display()
            ))
        })?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| self.root.join(line))
            .collect())
    }
}

impl ModelLoader for ArchiveLoader {
    fn load(&self, _lookup_name: &str) -> Result<Vec<MappingModel>> {
        let mut batch = Vec::new();
        for entry in self.entries()? {
            if !is_model_file(&entry) {
                debug!("Skipping archive entry {:?}, not a model file", entry);
                continue;
            }
            trace!("Loading archive entry {:?}", entry);
            batch.extend(load_from_file(&entry)?);
        }
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("archive {}", self.root.display())
    }
}

/// Finds a model file by naming convention in a set of directories.
///
/// For `ORDERS:D:96A:UN` it tries `orders_d_96a_un.{yaml,yml,json}`, then
/// `orders.{yaml,yml,json}`, in each directory in order.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    directories: Vec<PathBuf>,
}

impl DirectoryLoader {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    /// Candidate file stems for a lookup name, most specific first.
    pub fn candidate_stems(lookup_name: &str) -> Vec<String> {
        let full = lookup_name.to_lowercase().replace(':', "_");
        let name = lookup_name
            .split(':')
            .next()
            .unwrap_or(lookup_name)
            .to_lowercase();
        if name == full {
            vec![full]
        } else {
            vec![full, name]
        }
    }

    fn find(&self, lookup_name: &str) -> Option<PathBuf> {
        let stems = Self::candidate_stems(lookup_name);
        self.directories.iter().find_map(|dir| {
            stems.iter().find_map(|stem| {
                MODEL_EXTENSIONS
                    .iter()
                    .map(|ext| dir.join(format!("{stem}.{ext}")))
                    .find(|path| path.is_file())
            })
        })
    }
}

impl ModelLoader for DirectoryLoader {
    fn load(&self, lookup_name: &str) -> Result<Vec<MappingModel>> {
        match self.find(lookup_name) {
            Some(path) => {
                debug!("Found model file {:?} for {}", path, lookup_name);
                load_from_file(&path)
            }
            None => {
                debug!(
                    "No model file for {} in {:?}",
                    lookup_name, self.directories
                );
                Ok(Vec::new())
            }
        }
    }

    fn describe(&self) -> String {
        format!("directories {:?}", self.directories)
    }
}

/// Serves models that are already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    models: Vec<MappingModel>,
}

impl InMemoryLoader {
    pub fn new(models: Vec<MappingModel>) -> Self {
        Self { models }
    }
}

impl ModelLoader for InMemoryLoader {
    fn load(&self, _lookup_name: &str) -> Result<Vec<MappingModel>> {
        Ok(self.models.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory ({} models)", self.models.len())
    }
}

/// Tries several strategies in order.
///
/// Batches accumulate until one contains the requested model, so models
/// found along the way are cached too.
#[derive(Default)]
pub struct CompositeLoader {
    loaders: Vec<Box<dyn ModelLoader>>,
}

impl CompositeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, loader: impl ModelLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    pub fn push(&mut self, loader: Box<dyn ModelLoader>) {
        self.loaders.push(loader);
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl ModelLoader for CompositeLoader {
    fn load(&self, lookup_name: &str) -> Result<Vec<MappingModel>> {
        let mut batch = Vec::new();
        for loader in &self.loaders {
            trace!("Trying {} for {}", loader.describe(), lookup_name);
            let models = loader.load(lookup_name)?;
            let found = models.iter().any(|m| m.lookup_name() == lookup_name);
            batch.extend(models);
            if found {
                break;
            }
        }
        Ok(batch)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.loaders.iter().map(|l| l.describe()).collect();
        format!("composite [{}]", parts.join(", "))
    }
}

/// True when `path` looks like a model file.
pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MODEL_EXTENSIONS.contains(&e))
}

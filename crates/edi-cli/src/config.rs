//! Engine configuration file
//!
//! A YAML (or JSON, by extension) document naming where mapping models come
//! from and how the parser behaves. Command line flags are merged on top.

use edi_adapter_edifact::ParserSettings;
use edi_schema::{ArchiveLoader, CompositeLoader, DirectoryLoader, FileListLoader, MappingsRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Problems reading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML config {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Where mapping models are loaded from. Sources are tried in this order:
/// explicit files, archives, then directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingSources {
    pub files: Vec<PathBuf>,
    pub archives: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
}

impl MappingSources {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.archives.is_empty() && self.directories.is_empty()
    }

    /// Put `other` in front of these sources.
    pub fn prepend(&mut self, other: MappingSources) {
        let merge = |first: Vec<PathBuf>, rest: &mut Vec<PathBuf>| {
            let tail = std::mem::replace(rest, first);
            rest.extend(tail);
        };
        merge(other.files, &mut self.files);
        merge(other.archives, &mut self.archives);
        merge(other.directories, &mut self.directories);
    }

    fn resolve_against(&mut self, base: &Path) {
        for path in self
            .files
            .iter_mut()
            .chain(self.archives.iter_mut())
            .chain(self.directories.iter_mut())
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// A registry that loads lazily from these sources.
    pub fn registry(&self) -> MappingsRegistry {
        if self.is_empty() {
            warn!("No mapping sources configured, every message type will be unknown");
        }

        let mut loader = CompositeLoader::new();
        if !self.files.is_empty() {
            loader.push(Box::new(FileListLoader::new(self.files.clone())));
        }
        for archive in &self.archives {
            loader.push(Box::new(ArchiveLoader::new(archive.clone())));
        }
        if !self.directories.is_empty() {
            loader.push(Box::new(DirectoryLoader::new(self.directories.clone())));
        }
        MappingsRegistry::new(loader)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mappings: MappingSources,
    pub parser: ParserSettings,
}

impl EngineConfig {
    /// Load a config file. Relative mapping paths are taken from the
    /// directory the file lives in.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not deserialize.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut config: Self = if is_json {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        };

        if let Some(base) = path.parent() {
            config.mappings.resolve_against(base);
        }
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

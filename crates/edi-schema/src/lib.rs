//! # edi-schema
//!
//! Mapping models, delimiters, model loading and the model registry.
//!
//! A mapping model describes one message type's segment grammar. Models are
//! loaded from YAML or JSON files through pluggable [`ModelLoader`]
//! strategies and cached by the [`MappingsRegistry`], which loads each
//! missing model at most once however many threads ask for it.

pub mod delimiters;
pub mod loader;
pub mod model;
pub mod registry;
pub mod sources;

pub use delimiters::{DelimiterError, Delimiters};
pub use model::{
    ComponentDef, DataType, Description, FieldDef, GroupItem, MappingModel, MappingNode,
    MaxOccurs, Namespace, NodeKind, Occurs, SegmentDef, SegmentGroup, SubComponentDef, ValueNode,
    ValueSpec, lookup_name,
};
pub use registry::MappingsRegistry;
pub use sources::{
    ArchiveLoader, CompositeLoader, DirectoryLoader, FileListLoader, InMemoryLoader, ModelLoader,
};

use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when loading or resolving mapping models
///
/// All of these are configuration problems: retrying the same lookup will
/// not change the outcome.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("No mapping model registered for message type '{0}'")]
    NotFound(String),

    #[error("Duplicate mapping model registration for '{0}'")]
    Duplicate(String),

    #[error("Invalid message identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Invalid mapping model format: {0}")]
    InvalidFormat(String),

    #[error("Invalid mapping model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Mapping model registry with on-demand, single-flight loading.
//!
//! Cached models live in a concurrent map. On a miss, callers for the same
//! key share one in-flight slot: exactly one of them runs the loader while
//! the others block on the slot and then read the same result. Lookups for
//! different keys never wait on each other.

use crate::delimiters::Delimiters;
use crate::model::{MappingModel, lookup_name};
use crate::sources::ModelLoader;
use crate::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, trace};

type Flight = Arc<OnceLock<Result<Arc<MappingModel>>>>;

/// Registry of mapping models keyed by lookup name
pub struct MappingsRegistry {
    models: DashMap<String, Arc<MappingModel>>,
    in_flight: DashMap<String, Flight>,
    loader: Option<Arc<dyn ModelLoader>>,
}

impl std::fmt::Debug for MappingsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingsRegistry")
            .field("models", &self.models.len())
            .field("has_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

impl MappingsRegistry {
    /// Registry that loads misses through `loader`
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self::with_loader(Arc::new(loader))
    }

    pub fn with_loader(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            models: DashMap::new(),
            in_flight: DashMap::new(),
            loader: Some(loader),
        }
    }

    /// Registry holding only explicitly registered models
    pub fn without_loader() -> Self {
        Self {
            models: DashMap::new(),
            in_flight: DashMap::new(),
            loader: None,
        }
    }

    /// Register a model. A second model with the same lookup name is a
    /// configuration error.
    pub fn register(&self, model: MappingModel) -> Result<Arc<MappingModel>> {
        let name = model.lookup_name();
        match self.models.entry(name) {
            Entry::Occupied(entry) => Err(Error::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!("Registered mapping model {}", entry.key());
                Ok(Arc::clone(entry.insert(Arc::new(model)).value()))
            }
        }
    }

    /// Resolve the model for a raw, still escaped message identifier.
    ///
    /// The identifier is split with the active delimiters and the first four
    /// components form the lookup key.
    pub fn resolve(
        &self,
        message_identifier: &str,
        delimiters: &Delimiters,
    ) -> Result<Arc<MappingModel>> {
        let components: Vec<_> = delimiters
            .split_components(message_identifier)
            .into_iter()
            .map(|c| delimiters.unescape(c))
            .collect();

        if components.len() < 4 || components.iter().take(4).any(|c| c.is_empty()) {
            return Err(Error::InvalidIdentifier {
                identifier: message_identifier.to_string(),
                reason: "expected type, version, release and agency components".to_string(),
            });
        }

        self.get(&lookup_name(&components))
    }

    /// Cached model for `name`, loading it on a miss.
    pub fn get(&self, name: &str) -> Result<Arc<MappingModel>> {
        if let Some(model) = self.models.get(name) {
            trace!("Cache hit for mapping model: {}", name);
            return Ok(Arc::clone(model.value()));
        }

        trace!("Cache miss for mapping model: {}", name);
        let flight: Flight =
            Arc::clone(self.in_flight.entry(name.to_string()).or_default().value());
        let outcome = flight.get_or_init(|| self.load(name)).clone();
        self.in_flight
            .remove_if(name, |_, current| Arc::ptr_eq(current, &flight));
        outcome
    }

    fn load(&self, name: &str) -> Result<Arc<MappingModel>> {
        // A previous flight may have finished between the first check and
        // joining this one.
        if let Some(model) = self.models.get(name) {
            return Ok(Arc::clone(model.value()));
        }

        let Some(loader) = &self.loader else {
            return Err(Error::NotFound(name.to_string()));
        };

        info!("Loading mapping models for {} via {}", name, loader.describe());
        let batch = loader.load(name)?;

        let mut seen = HashSet::new();
        for model in &batch {
            let key = model.lookup_name();
            if !seen.insert(key.clone()) {
                return Err(Error::Duplicate(key));
            }
        }

        for model in batch {
            let key = model.lookup_name();
            self.models.entry(key).or_insert_with(|| Arc::new(model));
        }
        debug!("Registry now holds {} mapping model(s)", self.models.len());

        self.models
            .get(name)
            .map(|model| Arc::clone(model.value()))
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Lookup names of every cached model, sorted.
    pub fn lookup_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for MappingsRegistry {
    fn default() -> Self {
        Self::without_loader()
    }
}

//! Layer catalog
//!
//! Registry of vector layers. With a data directory every layer persists its
//! committed state after each write and is loaded back at startup; without
//! one the catalog lives in memory.

mod errors;
mod layer;
pub mod persist;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

pub use errors::{CatalogError, CatalogResult};
pub use layer::Layer;

use crate::layer::LayerDefinition;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::store::{LayerState, LayerStore, SnapshotSink};

/// Catalog-wide layer identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(u64);

impl LayerId {
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Registry {
    last_id: u64,
    layers: BTreeMap<LayerId, Arc<Layer>>,
}

fn poisoned() -> CatalogError {
    CatalogError::Io("catalog lock poisoned".to_string())
}

pub struct Catalog {
    registry: RwLock<Registry>,
    data_dir: Option<PathBuf>,
    metrics: Arc<MetricsRegistry>,
}

impl Catalog {
    /// Creates a catalog without persistence.
    pub fn in_memory() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            data_dir: None,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Opens a persistent catalog, loading every snapshot under `data_dir`.
    pub fn open(data_dir: &Path) -> CatalogResult<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let mut registry = Registry::default();
        for (id, state) in persist::load_all(data_dir)? {
            let sink = persist::FileSink::new(data_dir, id, metrics.clone());
            let store = LayerStore::with_sink(state, Arc::new(sink));
            registry.last_id = registry.last_id.max(id.value());
            registry
                .layers
                .insert(id, Arc::new(Layer::new(id, store, metrics.clone())));
        }
        Ok(Self {
            registry: RwLock::new(registry),
            data_dir: Some(data_dir.to_path_buf()),
            metrics,
        })
    }

    #[inline]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    #[inline]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Creates a layer, optionally with versioning already enabled.
    pub fn create_layer(&self, definition: LayerDefinition, versioning: bool) -> CatalogResult<Arc<Layer>> {
        let mut state = LayerState::new(definition)?;
        if versioning {
            state.enable_versioning()?;
        }
        let mut registry = self.registry.write().map_err(|_| poisoned())?;
        let id = LayerId::new(registry.last_id + 1);

        let store = match &self.data_dir {
            Some(dir) => {
                let sink = persist::FileSink::new(dir, id, self.metrics.clone());
                sink.persist(&state)?;
                LayerStore::with_sink(state, Arc::new(sink))
            }
            None => LayerStore::new(state),
        };
        let layer = Arc::new(Layer::new(id, store, self.metrics.clone()));
        registry.last_id = id.value();
        registry.layers.insert(id, layer.clone());
        drop(registry);

        self.metrics.increment_layers_created();
        log_event_with_fields(
            Event::LayerCreated,
            &[("layer", &id.to_string()), ("versioning", if versioning { "true" } else { "false" })],
        );
        Ok(layer)
    }

    pub fn layer(&self, id: LayerId) -> CatalogResult<Arc<Layer>> {
        let registry = self.registry.read().map_err(|_| poisoned())?;
        registry
            .layers
            .get(&id)
            .cloned()
            .ok_or(CatalogError::LayerNotFound(id))
    }

    pub fn delete_layer(&self, id: LayerId) -> CatalogResult<()> {
        let mut registry = self.registry.write().map_err(|_| poisoned())?;
        if !registry.layers.contains_key(&id) {
            return Err(CatalogError::LayerNotFound(id));
        }
        if let Some(dir) = &self.data_dir {
            persist::remove(dir, id)?;
        }
        registry.layers.remove(&id);
        log_event_with_fields(Event::LayerDeleted, &[("layer", &id.to_string())]);
        Ok(())
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.registry
            .read()
            .map(|r| r.layers.keys().copied().collect())
            .unwrap_or_default()
    }
}

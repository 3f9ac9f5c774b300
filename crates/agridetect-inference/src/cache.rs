//! Process-wide model cache keyed by category
//!
//! Each key owns a once-cell. The map lock is held only long enough to fetch
//! or create the cell, so loads for different categories run concurrently
//! while concurrent first requests for the same category share one load.
//! A failed load leaves the cell empty and the next request retries.

use crate::backend::Backend;
use crate::runtime::ModelHandle;
use agridetect_core::Result;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// Model resident in the cache
pub struct LoadedModel {
    category: String,
    backend: Backend,
    class_count: usize,
    handle: Box<dyn ModelHandle>,
}

impl LoadedModel {
    pub fn new(
        category: impl Into<String>,
        backend: Backend,
        class_count: usize,
        handle: impl ModelHandle + 'static,
    ) -> Self {
        Self {
            category: category.into(),
            backend,
            class_count,
            handle: Box::new(handle),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    pub fn handle(&self) -> &dyn ModelHandle {
        self.handle.as_ref()
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("category", &self.category)
            .field("backend", &self.backend)
            .field("class_count", &self.class_count)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<OnceCell<Arc<LoadedModel>>>;

/// Lazily populated `category -> model` cache with no eviction
#[derive(Default)]
pub struct ModelCache {
    slots: RwLock<HashMap<String, Slot>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached model for `category`, without loading
    pub async fn get(&self, category: &str) -> Option<Arc<LoadedModel>> {
        let slots = self.slots.read().await;
        slots.get(category).and_then(|slot| slot.get().cloned())
    }

    /// Cached model for `category`, running `load` on a miss.
    ///
    /// Concurrent callers for the same category await the one in-flight load.
    pub async fn get_or_try_load<F, Fut>(&self, category: &str, load: F) -> Result<Arc<LoadedModel>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LoadedModel>>,
    {
        let slot = self.slot(category).await;
        let model = slot
            .get_or_try_init(|| async move { load().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(model))
    }

    /// Whether a model for `category` finished loading
    pub async fn is_loaded(&self, category: &str) -> bool {
        self.get(category).await.is_some()
    }

    /// Categories with a loaded model, sorted
    pub async fn loaded_keys(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of loaded models
    pub async fn len(&self) -> usize {
        let slots = self.slots.read().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot(&self, category: &str) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(category) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(category.to_string()).or_default())
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache").finish_non_exhaustive()
    }
}

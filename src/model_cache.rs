//! Keyed model cache with single-flight loading
//!
//! One entry per model name. Concurrent requests for a key that is still
//! loading await the in-progress load instead of starting another one. A failed
//! load leaves the entry empty so a later request can try again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Process-wide cache of loaded model handles, keyed by model name
pub struct ModelCache<M: ?Sized> {
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<M>>>>>,
}

impl<M: ?Sized> Default for ModelCache<M> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<M: ?Sized + Send + Sync> ModelCache<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<Arc<M>>> {
        // The map lock is held only to fetch the cell, never across a load
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(entries.entry(key.to_string()).or_default())
    }

    /// Return the cached handle for `key`, loading it with `load` if needed
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, load: F) -> Result<Arc<M>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<M>, E>>,
    {
        let cell = self.cell(key);
        cell.get_or_try_init(load).await.cloned()
    }

    /// Cached handle, if already loaded
    pub fn get(&self, key: &str) -> Option<Arc<M>> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Names of fully loaded models
    pub fn loaded_keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

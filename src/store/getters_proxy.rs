//! Read-only, module-scoped view over derived values.
//!
//! Selectors receive this proxy instead of the store's whole getter
//! surface, so a module's emitters can only ever couple to the module's own
//! derived values. Built once per module registration.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{GetterFn, StoreError, StoreResult};

/// Snapshot provider for the owning module's state slice.
pub type SliceSnapshotFn = Arc<dyn Fn() -> StoreResult<Value> + Send + Sync>;

/// Read-only capability over one module's own getters.
#[derive(Clone)]
pub struct GettersProxy {
    module: String,
    getters: Arc<HashMap<String, GetterFn>>,
    snapshot: SliceSnapshotFn,
}

impl GettersProxy {
    pub fn new(
        module: impl Into<String>,
        getters: Arc<HashMap<String, GetterFn>>,
        snapshot: SliceSnapshotFn,
    ) -> Self {
        Self {
            module: module.into(),
            getters,
            snapshot,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Evaluates the named getter against the current slice. Getters from
    /// other modules do not exist from this proxy's point of view.
    pub fn get(&self, name: &str) -> StoreResult<Value> {
        let getter = self.getters.get(name).ok_or_else(|| StoreError::UnknownGetter {
            module: self.module.clone(),
            name: name.to_string(),
        })?;
        let state = (self.snapshot)()?;
        getter(&state)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.getters.keys().map(String::as_str)
    }
}

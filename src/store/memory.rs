//! Reference in-memory [`StateStore`] implementation.
//!
//! Slices are `serde_json::Value` records held per module. `commit` applies
//! the named mutation and then re-evaluates every watch installed on that
//! module, invoking callbacks synchronously with `(new, old)` when the
//! selected value changed. Operations run with an [`OperationContext`] so
//! they can commit their results back (which in turn drives watches).
//!
//! Change detection note: slices here have value semantics, so the `deep`
//! flag degenerates to the same structural comparison as the shallow mode.
//! The flag is accepted and recorded at install time for parity with stores
//! whose values carry identity. Callers always pass it through unchanged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::getters_proxy::GettersProxy;
use super::{
    GetterFn, MutationFn, OperationContext, OperationFn, StateStore, StoreError,
    StoreModuleDef, StoreResult, WatchCallback, WatchId, WatchSelector,
};

#[derive(Clone)]
struct ModuleSurface {
    mutations: Arc<HashMap<String, MutationFn>>,
    operations: Arc<HashMap<String, OperationFn>>,
    getters: Arc<HashMap<String, GetterFn>>,
}

struct Watcher {
    module: String,
    selector: WatchSelector,
    callback: WatchCallback,
    last: Mutex<Value>,
}

#[derive(Default)]
struct Inner {
    slices: DashMap<String, Value>,
    surfaces: DashMap<String, ModuleSurface>,
    watchers: DashMap<WatchId, Arc<Watcher>>,
}

/// In-memory store suitable for tests, demos, and single-process apps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn surface(&self, module: &str) -> StoreResult<ModuleSurface> {
        self.inner
            .surfaces
            .get(module)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::UnknownModule(module.to_string()))
    }

    /// Re-evaluates every watch on `module` against the current slice and
    /// fires callbacks for changed values. Runs outside any map guard so
    /// callbacks may commit re-entrantly.
    fn notify_watchers(&self, module: &str) {
        let snapshot = match self.state(module) {
            Ok(snapshot) => snapshot,
            Err(_) => return,
        };
        let watchers: Vec<Arc<Watcher>> = self
            .inner
            .watchers
            .iter()
            .filter(|entry| entry.value().module == module)
            .map(|entry| entry.value().clone())
            .collect();

        for watcher in watchers {
            let new_value = match (watcher.selector)(&snapshot) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(
                        module,
                        %error,
                        "watch selector failed, skipping this tick"
                    );
                    continue;
                }
            };
            let old_value = {
                let mut last = watcher
                    .last
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if *last == new_value {
                    continue;
                }
                std::mem::replace(&mut *last, new_value.clone())
            };
            (watcher.callback)(new_value, old_value);
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn register_module(&self, module: &str, def: StoreModuleDef) -> StoreResult<()> {
        if self.inner.surfaces.contains_key(module) {
            return Err(StoreError::ModuleAlreadyRegistered(module.to_string()));
        }
        self.inner
            .slices
            .insert(module.to_string(), def.initial_state);
        self.inner.surfaces.insert(
            module.to_string(),
            ModuleSurface {
                mutations: Arc::new(def.mutations),
                operations: Arc::new(def.operations),
                getters: Arc::new(def.getters),
            },
        );
        Ok(())
    }

    fn remove_module(&self, module: &str) -> StoreResult<()> {
        if self.inner.surfaces.remove(module).is_none() {
            return Err(StoreError::UnknownModule(module.to_string()));
        }
        self.inner.slices.remove(module);
        self.inner
            .watchers
            .retain(|_, watcher| watcher.module != module);
        Ok(())
    }

    fn state(&self, module: &str) -> StoreResult<Value> {
        self.inner
            .slices
            .get(module)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::UnknownModule(module.to_string()))
    }

    fn getters(&self, module: &str) -> StoreResult<GettersProxy> {
        let surface = self.surface(module)?;
        let store = self.clone();
        let module_name = module.to_string();
        Ok(GettersProxy::new(
            module,
            surface.getters,
            Arc::new(move || store.state(&module_name)),
        ))
    }

    fn commit(&self, module: &str, mutation: &str, payload: Option<Value>) -> StoreResult<()> {
        let surface = self.surface(module)?;
        let mutation_fn = surface
            .mutations
            .get(mutation)
            .cloned()
            .ok_or_else(|| StoreError::UnknownMutation {
                module: module.to_string(),
                name: mutation.to_string(),
            })?;
        {
            let mut slice = self
                .inner
                .slices
                .get_mut(module)
                .ok_or_else(|| StoreError::UnknownModule(module.to_string()))?;
            mutation_fn(&mut slice, payload)?;
        }
        tracing::debug!(module, mutation, "committed mutation");
        self.notify_watchers(module);
        Ok(())
    }

    async fn dispatch(
        &self,
        module: &str,
        operation: &str,
        payload: Option<Value>,
    ) -> StoreResult<Value> {
        let surface = self.surface(module)?;
        let operation_fn = surface
            .operations
            .get(operation)
            .cloned()
            .ok_or_else(|| StoreError::UnknownOperation {
                module: module.to_string(),
                name: operation.to_string(),
            })?;
        let context = OperationContext::new(module, Arc::new(self.clone()) as Arc<dyn StateStore>);
        operation_fn(context, payload).await
    }

    fn watch(
        &self,
        module: &str,
        selector: WatchSelector,
        callback: WatchCallback,
        deep: bool,
    ) -> StoreResult<WatchId> {
        let snapshot = self.state(module)?;
        // Seed the comparison baseline; installation itself never fires.
        let initial = selector(&snapshot)?;
        let id = WatchId::new();
        tracing::debug!(module, watch = %id, deep, "installed watch");
        self.inner.watchers.insert(
            id,
            Arc::new(Watcher {
                module: module.to_string(),
                selector,
                callback,
                last: Mutex::new(initial),
            }),
        );
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) {
        self.inner.watchers.remove(&id);
    }
}

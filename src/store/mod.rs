//! # State Store Boundary
//!
//! The coordination layer never owns application state; it consumes a
//! reactive store through the [`StateStore`] trait: module-scoped slices,
//! named mutations and async operations, namespaced derived values, and a
//! watch primitive with its own change detection. The wiring table is the
//! only core component that mutates through this boundary, and the emitter
//! registry only ever watches through it.
//!
//! A module's store surface is declared up front in a [`StoreModuleDef`];
//! the declared mutation and operation names are what wiring validation
//! checks wire references against at composition time.
//!
//! [`memory::MemoryStore`] is the reference implementation shipped with the
//! crate; embedders with their own reactive store implement the trait
//! instead.

pub mod getters_proxy;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub use getters_proxy::GettersProxy;

/// Selector over a module's state slice and its own derived values.
pub type SelectorFn =
    Arc<dyn Fn(&Value, &GettersProxy) -> StoreResult<Value> + Send + Sync>;

/// Store-facing selector, already bound to a module's getters proxy.
pub type WatchSelector = Arc<dyn Fn(&Value) -> StoreResult<Value> + Send + Sync>;

/// Raw watch tick callback: `(new_value, old_value)`.
///
/// Invoked synchronously by the store when the selected value changes; the
/// callback may arm timers or spawn tasks but must not block.
pub type WatchCallback = Arc<dyn Fn(Value, Value) + Send + Sync>;

/// State mutation: `(slice, payload)`.
pub type MutationFn =
    Arc<dyn Fn(&mut Value, Option<Value>) -> StoreResult<()> + Send + Sync>;

/// Async store operation: `(context, payload)`. Operations commit their own
/// results through the context.
pub type OperationFn = Arc<
    dyn Fn(OperationContext, Option<Value>) -> BoxFuture<'static, StoreResult<Value>>
        + Send
        + Sync,
>;

/// Derived value computed from a module's state slice.
pub type GetterFn = Arc<dyn Fn(&Value) -> StoreResult<Value> + Send + Sync>;

/// Handle for an installed watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(Uuid);

impl WatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("module `{0}` is not registered in the store")]
    UnknownModule(String),
    #[error("module `{0}` is already registered in the store")]
    ModuleAlreadyRegistered(String),
    #[error("module `{module}` has no mutation `{name}`")]
    UnknownMutation { module: String, name: String },
    #[error("module `{module}` has no operation `{name}`")]
    UnknownOperation { module: String, name: String },
    #[error("module `{module}` has no getter `{name}`")]
    UnknownGetter { module: String, name: String },
    #[error("selector evaluation failed: {0}")]
    Selector(String),
    #[error("operation `{name}` in module `{module}` failed: {message}")]
    OperationFailed {
        module: String,
        name: String,
        message: String,
    },
    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A module's declared store surface: initial slice plus named mutations,
/// operations, and getters.
#[derive(Clone, Default)]
pub struct StoreModuleDef {
    pub initial_state: Value,
    pub mutations: HashMap<String, MutationFn>,
    pub operations: HashMap<String, OperationFn>,
    pub getters: HashMap<String, GetterFn>,
}

impl StoreModuleDef {
    pub fn new(initial_state: Value) -> Self {
        Self {
            initial_state,
            ..Self::default()
        }
    }

    pub fn mutation(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Value, Option<Value>) -> StoreResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.mutations.insert(name.into(), Arc::new(f));
        self
    }

    pub fn operation(
        mut self,
        name: impl Into<String>,
        f: impl Fn(OperationContext, Option<Value>) -> BoxFuture<'static, StoreResult<Value>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.operations.insert(name.into(), Arc::new(f));
        self
    }

    pub fn getter(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value) -> StoreResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(name.into(), Arc::new(f));
        self
    }

    pub fn has_mutation(&self, name: &str) -> bool {
        self.mutations.contains_key(name)
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }
}

/// Capability handed to a running operation: scoped to its own module, it
/// can read the slice, commit mutations, and chain further operations.
#[derive(Clone)]
pub struct OperationContext {
    module: String,
    store: Arc<dyn StateStore>,
}

impl OperationContext {
    pub fn new(module: impl Into<String>, store: Arc<dyn StateStore>) -> Self {
        Self {
            module: module.into(),
            store,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn state(&self) -> StoreResult<Value> {
        self.store.state(&self.module)
    }

    pub fn commit(&self, mutation: &str, payload: Option<Value>) -> StoreResult<()> {
        self.store.commit(&self.module, mutation, payload)
    }

    pub async fn dispatch(
        &self,
        operation: &str,
        payload: Option<Value>,
    ) -> StoreResult<Value> {
        self.store.dispatch(&self.module, operation, payload).await
    }
}

/// The consumed reactive state store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Registers a module's slice and surface. Fails if the name is taken.
    fn register_module(&self, module: &str, def: StoreModuleDef) -> StoreResult<()>;

    /// Removes a module's slice, surface, and watches.
    fn remove_module(&self, module: &str) -> StoreResult<()>;

    /// Snapshot of a module's state slice.
    fn state(&self, module: &str) -> StoreResult<Value>;

    /// Read-only derived-value view scoped to `module`'s own getters.
    fn getters(&self, module: &str) -> StoreResult<GettersProxy>;

    /// Applies the named mutation to the module's slice.
    fn commit(&self, module: &str, mutation: &str, payload: Option<Value>) -> StoreResult<()>;

    /// Runs the named async operation to completion.
    async fn dispatch(
        &self,
        module: &str,
        operation: &str,
        payload: Option<Value>,
    ) -> StoreResult<Value>;

    /// Installs a watch over `selector` of the module's slice. `deep`
    /// selects structural change detection and is interpreted by the store,
    /// never by the caller.
    fn watch(
        &self,
        module: &str,
        selector: WatchSelector,
        callback: WatchCallback,
        deep: bool,
    ) -> StoreResult<WatchId>;

    /// Removes a previously installed watch.
    fn unwatch(&self, id: WatchId);
}

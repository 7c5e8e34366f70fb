//! # Crosswire: Declarative Event Coordination
//!
//! Crosswire lets independent functional modules of an interactive
//! application communicate without direct references to each other. Modules
//! declare three things; the runtime composes them over one shared event
//! bus and one shared state store.
//!
//! ## Core Components
//!
//! ### 1. Event Bus
//! An in-process publish/subscribe primitive for named events carrying a
//! payload and contextual metadata ([`event`]). Handlers fire in
//! subscription order and are isolated from each other's failures; external
//! consumers attach through filtered streams.
//!
//! ### 2. Wiring Table
//! Per-module, declarative reactions to events ([`wiring`]): commit a value
//! into the store, dispatch an async store operation, gated and shaped by
//! composable combinators (condition, debounce, payload transform). Tables
//! are validated against the event catalog and the module's declared store
//! surface at composition time.
//!
//! ### 3. State Emitter Registry
//! Watches selected parts of a module's state slice and turns changes into
//! bus events ([`emitter`]), preserving a correct "old value" baseline
//! across debounce coalescing so before/after filters see the true
//! transition.
//!
//! ## Composition
//!
//! A [`module::Module`] bundles event declarations, a store surface, store
//! emitters, and a wiring table. [`context::RuntimeContext`] installs a
//! batch of modules, failing fast on configuration errors, and tears them
//! down again without leaking subscriptions or timers.
//!
//! ```text
//! store mutation -> emitter watch tick -> bus event -> wires -> commit/dispatch -> store mutation
//! ```
//!
//! The state store itself is external: anything implementing
//! [`store::StateStore`] works. [`store::memory::MemoryStore`] is the
//! bundled reference implementation.

pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod event;
pub mod module;
pub mod store;
pub mod wiring;

// Re-exports
pub use config::RuntimeConfig;
pub use context::{ModuleInfo, RegistrarError, RuntimeContext};
pub use emitter::{EmitterError, StateSelector, StoreEmitters};
pub use error::{Error, Result};
pub use event::{
    BusError, CatalogError, Event, EventBus, EventCatalog, EventHandler, EventMetadata,
    EventName, EventStream, SubscriptionId,
};
pub use module::Module;
pub use serde_json::Value;
pub use store::memory::MemoryStore;
pub use store::{
    GettersProxy, OperationContext, StateStore, StoreError, StoreModuleDef, WatchId,
};
pub use wiring::{Wire, WireContext, WiringError, WiringTable};

//! Module declarations.
//!
//! A module is an independently declared unit: the event names it owns, its
//! store surface (slice, mutations, operations, getters), the emitters that
//! turn its state changes into events, and the wiring that turns events into
//! store writes. Modules never hold references to each other; the bus is the
//! only channel between them.

use crate::emitter::StoreEmitters;
use crate::event::EventName;
use crate::store::StoreModuleDef;
use crate::wiring::WiringTable;

/// Declaration of one functional module, consumed by
/// [`RuntimeContext::install`](crate::context::RuntimeContext::install).
pub struct Module {
    pub name: String,
    /// Event names this module declares into the shared catalog.
    pub events: Vec<EventName>,
    pub store_module: StoreModuleDef,
    pub store_emitters: StoreEmitters,
    pub wiring: WiringTable,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Vec::new(),
            store_module: StoreModuleDef::default(),
            store_emitters: StoreEmitters::default(),
            wiring: WiringTable::default(),
        }
    }

    pub fn events(mut self, events: impl IntoIterator<Item = EventName>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    pub fn store_module(mut self, store_module: StoreModuleDef) -> Self {
        self.store_module = store_module;
        self
    }

    pub fn store_emitters(mut self, store_emitters: StoreEmitters) -> Self {
        self.store_emitters = store_emitters;
        self
    }

    pub fn wiring(mut self, wiring: WiringTable) -> Self {
        self.wiring = wiring;
        self
    }
}

//! # Wiring Table
//!
//! The wiring table maps event names to ordered lists of [`Wire`]s for one
//! module. It is built once at module-composition time and immutable
//! afterwards; the registrar validates it against the event catalog and the
//! module's declared store surface before anything is bound, so a
//! misspelled event, mutation, or operation name aborts startup instead of
//! producing a wire that never fires.
//!
//! Binding registers one bus handler per table entry; that handler runs the
//! entry's wires in insertion order, isolating each wire's failure from its
//! siblings. Teardown cancels the registrations and clears every pending
//! debounce timer the table's wires own.

pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::event::{Event, EventBus, EventHandler, EventName, SubscriptionId};
use crate::event::EventCatalog;
use crate::store::{StateStore, StoreError, StoreModuleDef};

pub use wire::{DebounceState, StoreRef, Wire, WireContext};

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("module `{module}` wires event `{event}` which is not a declared event")]
    UnknownEvent { module: String, event: String },
    #[error("wire `{wire}` in module `{module}` references unknown mutation `{name}`")]
    UnknownMutation {
        module: String,
        wire: String,
        name: String,
    },
    #[error("wire `{wire}` in module `{module}` references unknown operation `{name}`")]
    UnknownOperation {
        module: String,
        wire: String,
        name: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type WiringResult<T> = Result<T, WiringError>;

/// Immutable event-name -> wires mapping for one module.
///
/// Entry order and per-entry wire order follow declaration order.
#[derive(Default)]
pub struct WiringTable {
    entries: Vec<(EventName, Vec<Wire>)>,
}

impl WiringTable {
    pub fn builder() -> WiringTableBuilder {
        WiringTableBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &EventName> {
        self.entries.iter().map(|(event, _)| event)
    }

    /// Checks every key against the catalog and every wire's store
    /// reference against the owning module's declared surface.
    pub(crate) fn validate(
        &self,
        module: &str,
        catalog: &EventCatalog,
        surface: &StoreModuleDef,
    ) -> WiringResult<()> {
        for (event, wires) in &self.entries {
            if !catalog.contains(event) {
                return Err(WiringError::UnknownEvent {
                    module: module.to_string(),
                    event: event.to_string(),
                });
            }
            for wire in wires {
                match wire.store_ref() {
                    Some(StoreRef::Mutation(name)) if !surface.has_mutation(name) => {
                        return Err(WiringError::UnknownMutation {
                            module: module.to_string(),
                            wire: wire.name().to_string(),
                            name: name.clone(),
                        });
                    }
                    Some(StoreRef::Operation(name)) if !surface.has_operation(name) => {
                        return Err(WiringError::UnknownOperation {
                            module: module.to_string(),
                            wire: wire.name().to_string(),
                            name: name.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Binds every entry to the bus. The returned subscription ids are what
    /// teardown cancels; `active` is flipped off at teardown so handlers
    /// already cloned into an in-flight emission become no-ops.
    pub(crate) fn bind(
        &self,
        module: &str,
        bus: &EventBus,
        store: Arc<dyn StateStore>,
        active: Arc<AtomicBool>,
    ) -> Vec<(EventName, SubscriptionId)> {
        let mut subscriptions = Vec::with_capacity(self.entries.len());
        for (event, wires) in &self.entries {
            let wires = wires.clone();
            let module = module.to_string();
            let store = store.clone();
            let active = active.clone();
            let handler: EventHandler = Arc::new(move |event: &Event| {
                let wires = wires.clone();
                let module = module.clone();
                let store = store.clone();
                let active = active.clone();
                let payload = event.payload.clone();
                let metadata = event.metadata.clone();
                Box::pin(async move {
                    if !active.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    for wire in &wires {
                        let ctx = WireContext {
                            module: module.clone(),
                            store: store.clone(),
                        };
                        if let Err(error) =
                            wire.run(payload.clone(), metadata.clone(), ctx).await
                        {
                            tracing::warn!(
                                %module,
                                wire = %wire.name(),
                                %error,
                                "wire failed"
                            );
                        }
                    }
                    Ok(())
                })
            });
            subscriptions.push((event.clone(), bus.subscribe(event.clone(), handler)));
        }
        subscriptions
    }

    /// Every debounce state owned by this table's wires.
    pub(crate) fn debounce_states(&self) -> Vec<Arc<DebounceState>> {
        self.entries
            .iter()
            .flat_map(|(_, wires)| wires.iter())
            .flat_map(|wire| wire.debounce_states().iter().cloned())
            .collect()
    }
}

#[derive(Default)]
pub struct WiringTableBuilder {
    entries: Vec<(EventName, Vec<Wire>)>,
}

impl WiringTableBuilder {
    /// Appends a wire to `event`'s entry, preserving insertion order.
    pub fn on(mut self, event: EventName, wire: Wire) -> Self {
        match self.entries.iter_mut().find(|(name, _)| *name == event) {
            Some((_, wires)) => wires.push(wire),
            None => self.entries.push((event, vec![wire])),
        }
        self
    }

    pub fn build(self) -> WiringTable {
        WiringTable {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn search_surface() -> StoreModuleDef {
        StoreModuleDef::new(json!({ "query": "" }))
            .mutation("setQuery", |slice, payload| {
                slice["query"] = payload.unwrap_or(Value::Null);
                Ok(())
            })
            .operation("fetchAndSaveResults", |_ctx, _payload| {
                Box::pin(async { Ok(Value::Null) })
            })
    }

    fn catalog_with(events: &[&str]) -> EventCatalog {
        let catalog = EventCatalog::new();
        let names: Vec<EventName> = events.iter().copied().map(EventName::custom).collect();
        catalog.declare("search", &names).unwrap();
        catalog
    }

    #[test]
    fn test_validate_accepts_known_names() {
        let table = WiringTable::builder()
            .on(EventName::custom("UserAcceptedAQuery"), Wire::commit("setQuery"))
            .on(
                EventName::custom("SearchRequestChanged"),
                Wire::dispatch_without_payload("fetchAndSaveResults"),
            )
            .build();
        let catalog = catalog_with(&["UserAcceptedAQuery", "SearchRequestChanged"]);
        assert!(table.validate("search", &catalog, &search_surface()).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_event() {
        let table = WiringTable::builder()
            .on(EventName::custom("UserAceptedAQuery"), Wire::commit("setQuery"))
            .build();
        let catalog = catalog_with(&["UserAcceptedAQuery"]);
        assert!(matches!(
            table.validate("search", &catalog, &search_surface()),
            Err(WiringError::UnknownEvent { event, .. }) if event == "UserAceptedAQuery"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_mutation() {
        let table = WiringTable::builder()
            .on(EventName::custom("UserAcceptedAQuery"), Wire::commit("setQery"))
            .build();
        let catalog = catalog_with(&["UserAcceptedAQuery"]);
        assert!(matches!(
            table.validate("search", &catalog, &search_surface()),
            Err(WiringError::UnknownMutation { name, .. }) if name == "setQery"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_operation() {
        let table = WiringTable::builder()
            .on(
                EventName::custom("UserAcceptedAQuery"),
                Wire::dispatch("fetchResults"),
            )
            .build();
        let catalog = catalog_with(&["UserAcceptedAQuery"]);
        assert!(matches!(
            table.validate("search", &catalog, &search_surface()),
            Err(WiringError::UnknownOperation { name, .. }) if name == "fetchResults"
        ));
    }

    #[test]
    fn test_builder_preserves_insertion_order() {
        let table = WiringTable::builder()
            .on(EventName::custom("A"), Wire::commit("setQuery"))
            .on(EventName::custom("B"), Wire::commit("setQuery"))
            .on(EventName::custom("A"), Wire::dispatch("fetchAndSaveResults"))
            .build();
        let events: Vec<String> = table.events().map(ToString::to_string).collect();
        assert_eq!(events, vec!["A", "B"]);
        assert_eq!(table.entries[0].1.len(), 2);
    }
}

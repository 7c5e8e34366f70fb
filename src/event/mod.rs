//! Event primitives: the in-process bus and the closed event-name catalog.

pub mod event_bus;
pub mod event_catalog;

pub use event_bus::{
    BusError, BusResult, Event, EventBus, EventHandler, EventMetadata, EventStream,
    SubscriptionId,
};
pub use event_catalog::{CatalogError, CatalogResult, EventCatalog, EventInfo, EventName};

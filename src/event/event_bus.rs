//! # Event Bus
//!
//! In-process publish/subscribe for named events. Handlers registered for a
//! name are invoked in subscription order on every emission, each one
//! isolated: a failing handler is reported and its siblings still run, and
//! the emission never fails to its caller.
//!
//! Two consumer surfaces exist. [`EventBus::subscribe`] registers an async
//! handler and returns a [`SubscriptionId`] for explicit cancellation; this
//! is what the wiring layer binds through. [`EventBus::on`] returns an
//! [`EventStream`] of future occurrences for external consumers (the
//! rendering layer, ad-hoc listeners); dropping the stream unsubscribes.
//! Streams never replay past events, and a consumer that falls behind the
//! buffer loses events and is told so, keeping the at-most-once contract
//! explicit.
//!
//! The bus knows nothing about modules. The `module_name` in
//! [`EventMetadata`] is opaque metadata attached by whoever emits.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use super::event_catalog::EventName;

/// Contextual metadata attached to an emission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventMetadata {
    /// Name of the module that emitted the event, when known.
    pub module_name: Option<String>,
    /// Opaque reference to the origin of the event (a component id, a DOM
    /// node key, whatever the embedding layer uses).
    pub target: Option<String>,
}

impl EventMetadata {
    pub fn from_module(module: impl Into<String>) -> Self {
        Self {
            module_name: Some(module.into()),
            target: None,
        }
    }
}

/// An immutable event occurrence. The bus keeps no history of these.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: EventName,
    pub payload: Option<Value>,
    pub metadata: EventMetadata,
}

impl Event {
    pub fn new(name: EventName) -> Self {
        Self {
            name,
            payload: None,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn from_module(mut self, module: impl Into<String>) -> Self {
        self.metadata.module_name = Some(module.into());
        self
    }
}

/// Handle for a registered handler, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Async callback invoked once per matching emission.
pub type EventHandler =
    Arc<dyn Fn(&Event) -> BoxFuture<'static, BusResult<()>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("stream subscriber lagged behind by {count} events")]
    Lagged { count: u64 },
    #[error("event channel closed")]
    Closed,
    #[error("handler failed: {0}")]
    Handler(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// In-process publish/subscribe primitive.
pub struct EventBus {
    handlers: DashMap<EventName, Vec<(SubscriptionId, EventHandler)>>,
    stream_tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` bounds the buffer of the stream surface; handler
    /// subscriptions are not buffered at all.
    pub fn new(capacity: usize) -> Self {
        let (stream_tx, _) = broadcast::channel(capacity);
        Self {
            handlers: DashMap::new(),
            stream_tx,
        }
    }

    /// Emits an event: invokes every handler registered for its name, in
    /// subscription order, then forwards the event to stream subscribers.
    ///
    /// A failing handler is logged and does not stop its siblings; emission
    /// itself never fails.
    pub async fn emit(&self, event: Event) {
        tracing::debug!(event = %event.name, "emitting event");
        // Clone the handler list out so no map guard is held across awaits
        // and handlers registered mid-emission only see later emissions.
        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .handlers
            .get(&event.name)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        for (id, handler) in handlers {
            if let Err(error) = handler(&event).await {
                tracing::warn!(
                    event = %event.name,
                    subscription = %id,
                    %error,
                    "event handler failed"
                );
            }
        }
        // No stream subscribers is not an error.
        let _ = self.stream_tx.send(event);
    }

    /// Registers a handler for `name`. Handlers fire in registration order.
    pub fn subscribe(&self, name: EventName, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers.entry(name).or_default().push((id, handler));
        id
    }

    /// Cancels a handler registration. Returns whether it was present.
    pub fn unsubscribe(&self, name: &EventName, id: SubscriptionId) -> bool {
        match self.handlers.get_mut(name) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(sub_id, _)| *sub_id != id);
                before != entry.len()
            }
            None => false,
        }
    }

    /// Returns a stream of future occurrences of `name`. Nothing is
    /// replayed; dropping the stream unsubscribes.
    pub fn on(&self, name: EventName) -> EventStream {
        EventStream {
            name,
            receiver: self.stream_tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self, name: &EventName) -> usize {
        self.handlers.get(name).map(|entry| entry.len()).unwrap_or(0)
    }
}

/// Filtered stream of one event name's occurrences.
pub struct EventStream {
    name: EventName,
    receiver: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Receives the next matching event.
    ///
    /// A consumer that falls behind the bus buffer is resubscribed at the
    /// current position and gets [`BusError::Lagged`] so the loss is
    /// observable; call `recv` again to continue.
    pub async fn recv(&mut self) -> BusResult<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.name == self.name => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.receiver = self.receiver.resubscribe();
                    return Err(BusError::Lagged { count });
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }

    /// Adapts this subscription into a `Stream`, silently skipping lagged
    /// gaps. Use [`EventStream::recv`] when loss must be observable.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        let name = self.name;
        BroadcastStream::new(self.receiver).filter_map(move |item| match item {
            Ok(event) if event.name == name => Some(event),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_handler(
        log: Arc<std::sync::Mutex<Vec<String>>>,
        tag: &str,
    ) -> EventHandler {
        let tag = tag.to_string();
        Arc::new(move |_event| {
            let log = log.clone();
            let tag = tag.clone();
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_handlers_fire_in_subscription_order() {
        let bus = EventBus::new(16);
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let name = EventName::custom("UserAcceptedAQuery");

        for tag in ["first", "second", "third"] {
            bus.subscribe(name.clone(), recording_handler(log.clone(), tag));
        }

        bus.emit(Event::new(name)).await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_siblings() {
        let bus = EventBus::new(16);
        let name = EventName::custom("UserAcceptedAQuery");
        let ran = Arc::new(AtomicUsize::new(0));

        let failing: EventHandler =
            Arc::new(|_| Box::pin(async { Err(BusError::Handler("boom".into())) }));
        bus.subscribe(name.clone(), failing);
        let ran_clone = ran.clone();
        let counting: EventHandler = Arc::new(move |_| {
            let ran = ran_clone.clone();
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        bus.subscribe(name.clone(), counting);

        bus.emit(Event::new(name)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new(16);
        let name = EventName::custom("UserAcceptedAQuery");
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let id = bus.subscribe(name.clone(), recording_handler(log.clone(), "gone"));
        bus.subscribe(name.clone(), recording_handler(log.clone(), "kept"));

        assert!(bus.unsubscribe(&name, id));
        assert!(!bus.unsubscribe(&name, id));

        bus.emit(Event::new(name)).await;
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_stream_filters_by_name() {
        let bus = EventBus::new(16);
        let wanted = EventName::custom("ResultsChanged");
        let other = EventName::custom("FacetsChanged");

        let mut stream = bus.on(wanted.clone());
        bus.emit(Event::new(other).with_payload(serde_json::json!(1)))
            .await;
        bus.emit(Event::new(wanted.clone()).with_payload(serde_json::json!(2)))
            .await;

        let received = stream.recv().await.unwrap();
        assert_eq!(received.name, wanted);
        assert_eq!(received.payload, Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_stream_does_not_replay() {
        let bus = EventBus::new(16);
        let name = EventName::custom("ResultsChanged");

        bus.emit(Event::new(name.clone())).await;
        let mut stream = bus.on(name.clone());
        bus.emit(Event::new(name.clone()).with_payload(serde_json::json!("fresh")))
            .await;

        let received = stream.recv().await.unwrap();
        assert_eq!(received.payload, Some(serde_json::json!("fresh")));
    }

    #[tokio::test]
    async fn test_lagged_stream_reports_loss() {
        let bus = EventBus::new(4);
        let name = EventName::custom("ResultsChanged");
        let mut stream = bus.on(name.clone());

        for i in 0..20 {
            bus.emit(Event::new(name.clone()).with_payload(serde_json::json!(i)))
                .await;
        }

        assert!(matches!(
            stream.recv().await,
            Err(BusError::Lagged { .. })
        ));
    }
}

//! Wires: single configured reactions bound to one event.
//!
//! A wire is pure configuration around an async closure
//! `(payload, metadata, context) -> result`. Constructors cover the store
//! verbs (commit a mutation, dispatch an operation); combinators wrap an
//! existing wire with a condition gate, a payload transform, or a debounce
//! window. The only mutable state a wire owns is the [`DebounceState`] a
//! debounce combinator creates, held explicitly so teardown and tests can
//! reach it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::event::EventMetadata;
use crate::store::StateStore;

use super::{WiringError, WiringResult};

/// Per-invocation context: the owning module and the shared store handle.
#[derive(Clone)]
pub struct WireContext {
    pub module: String,
    pub store: Arc<dyn StateStore>,
}

type WireFn = Arc<
    dyn Fn(Option<Value>, EventMetadata, WireContext) -> BoxFuture<'static, WiringResult<()>>
        + Send
        + Sync,
>;

/// The store name a wire references, checked against the owning module's
/// declared surface at composition time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRef {
    Mutation(String),
    Operation(String),
}

/// Pending state of a debounced wire: `Idle` when `timer` is `None`,
/// `Pending` while a timer task is armed. Re-arming discards the previous
/// pending effect but keeps the latest captured invocation.
#[derive(Default)]
pub struct DebounceState {
    timer: Mutex<Option<JoinHandle<()>>>,
    latest: Mutex<Option<(Option<Value>, EventMetadata, WireContext)>>,
}

impl DebounceState {
    /// Clears the pending invocation and disarms the timer.
    pub async fn cancel(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
        *self.latest.lock().await = None;
    }
}

/// A named, composable side-effecting reaction.
#[derive(Clone)]
pub struct Wire {
    name: String,
    store_ref: Option<StoreRef>,
    handler: WireFn,
    debounce_states: Vec<Arc<DebounceState>>,
}

impl Wire {
    /// A wire from a raw handler, for reactions that are neither a commit
    /// nor a dispatch (side effects on the embedding layer).
    pub fn new(
        name: impl Into<String>,
        handler: impl Fn(Option<Value>, EventMetadata, WireContext) -> BoxFuture<'static, WiringResult<()>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            store_ref: None,
            handler: Arc::new(handler),
            debounce_states: Vec::new(),
        }
    }

    /// A wire that writes the event payload as the named mutation on the
    /// wire's own module.
    pub fn commit(mutation: impl Into<String>) -> Self {
        let mutation = mutation.into();
        let mutation_ref = mutation.clone();
        let handler: WireFn = Arc::new(move |payload, _metadata, ctx| {
            let mutation = mutation_ref.clone();
            Box::pin(async move {
                ctx.store
                    .commit(&ctx.module, &mutation, payload)
                    .map_err(WiringError::from)
            })
        });
        Self {
            name: format!("commit:{mutation}"),
            store_ref: Some(StoreRef::Mutation(mutation)),
            handler,
            debounce_states: Vec::new(),
        }
    }

    /// Like [`Wire::commit`], transforming the payload first.
    pub fn commit_with(
        mutation: impl Into<String>,
        transform: impl Fn(Option<Value>) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::commit(mutation).map_payload(transform)
    }

    /// A wire that starts the named async operation with the event payload.
    ///
    /// The operation is spawned, not awaited: completion side effects are
    /// expressed by the operation committing (and thereby emitting) itself.
    /// A failed operation is reported and never retried here.
    pub fn dispatch(operation: impl Into<String>) -> Self {
        Self::dispatch_inner(operation, true)
    }

    /// Like [`Wire::dispatch`] but the operation receives no payload.
    pub fn dispatch_without_payload(operation: impl Into<String>) -> Self {
        Self::dispatch_inner(operation, false)
    }

    fn dispatch_inner(operation: impl Into<String>, forward_payload: bool) -> Self {
        let operation = operation.into();
        let operation_ref = operation.clone();
        let handler: WireFn = Arc::new(move |payload, _metadata, ctx| {
            let operation = operation_ref.clone();
            let payload = if forward_payload { payload } else { None };
            Box::pin(async move {
                let WireContext { module, store } = ctx;
                tokio::spawn(async move {
                    if let Err(error) = store.dispatch(&module, &operation, payload).await {
                        tracing::warn!(%module, %operation, %error, "dispatched operation failed");
                    }
                });
                Ok(())
            })
        });
        Self {
            name: format!("dispatch:{operation}"),
            store_ref: Some(StoreRef::Operation(operation)),
            handler,
            debounce_states: Vec::new(),
        }
    }

    /// Delegates to this wire only when `pred(payload, metadata)` holds.
    pub fn with_condition(
        self,
        pred: impl Fn(&Option<Value>, &EventMetadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        let Self {
            name,
            store_ref,
            handler: inner,
            debounce_states,
        } = self;
        let handler: WireFn = Arc::new(move |payload, metadata, ctx| {
            if pred(&payload, &metadata) {
                inner(payload, metadata, ctx)
            } else {
                Box::pin(async { Ok(()) })
            }
        });
        Self {
            name,
            store_ref,
            handler,
            debounce_states,
        }
    }

    /// Transforms the payload before delegating.
    pub fn map_payload(
        self,
        transform: impl Fn(Option<Value>) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        let Self {
            name,
            store_ref,
            handler: inner,
            debounce_states,
        } = self;
        let handler: WireFn =
            Arc::new(move |payload, metadata, ctx| inner(transform(payload), metadata, ctx));
        Self {
            name,
            store_ref,
            handler,
            debounce_states,
        }
    }

    /// Coalesces invocations: only the last call within any `window`-length
    /// quiet period delegates, with that call's payload and metadata.
    pub fn with_debounce(self, window: Duration) -> Self {
        let state = Arc::new(DebounceState::default());
        let inner = self.handler;
        let name = self.name.clone();
        let armed_state = state.clone();
        let handler: WireFn = Arc::new(move |payload, metadata, ctx| {
            let state = armed_state.clone();
            let inner = inner.clone();
            let name = name.clone();
            Box::pin(async move {
                *state.latest.lock().await = Some((payload, metadata, ctx));
                let mut timer = state.timer.lock().await;
                if let Some(previous) = timer.take() {
                    previous.abort();
                }
                let flush_state = state.clone();
                *timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    let call = flush_state.latest.lock().await.take();
                    if let Some((payload, metadata, ctx)) = call {
                        if let Err(error) = inner(payload, metadata, ctx).await {
                            tracing::warn!(wire = %name, %error, "debounced wire failed");
                        }
                    }
                }));
                Ok(())
            })
        });
        let mut debounce_states = self.debounce_states;
        debounce_states.push(state);
        Self {
            name: self.name,
            store_ref: self.store_ref,
            handler,
            debounce_states,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn store_ref(&self) -> Option<&StoreRef> {
        self.store_ref.as_ref()
    }

    pub(crate) fn debounce_states(&self) -> &[Arc<DebounceState>] {
        &self.debounce_states
    }

    pub(crate) async fn run(
        &self,
        payload: Option<Value>,
        metadata: EventMetadata,
        ctx: WireContext,
    ) -> WiringResult<()> {
        (self.handler)(payload, metadata, ctx).await
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("name", &self.name)
            .field("store_ref", &self.store_ref)
            .field("debounced", &!self.debounce_states.is_empty())
            .finish()
    }
}

//! # State Emitter Registry
//!
//! Emitters turn store changes into bus events. Each declaration pairs an
//! event name with a [`StateSelector`] over the module's state slice and its
//! own derived values; the registry installs a store watch per declaration
//! and emits the event when the selected value changes according to the
//! declaration's filter.
//!
//! Flushes are debounced, which creates the one subtle correctness problem
//! this module exists to solve: the store reports `(new, old)` per raw tick,
//! but after coalescing a burst of ticks the filter must see the value that
//! preceded the *whole* burst, not the last-but-one tick's value. The
//! watcher keeps a `pending_baseline` that captures the first raw tick's old
//! value and holds it until the flush actually runs, then resets so the next
//! burst recaptures a fresh baseline. Without that guard a filter like
//! "query went from empty to non-empty" would be evaluated against an
//! intermediate value and misfire.
//!
//! `immediate` declarations additionally emit the selector's value at
//! registration time, deferred to the next scheduling turn so consumers that
//! subscribe right after registration still receive it. Immediate emissions
//! of one registration batch fire in registration order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::event::{Event, EventBus, EventName};
use crate::store::{
    GettersProxy, SelectorFn, StateStore, StoreError, StoreResult, WatchCallback, WatchId,
    WatchSelector,
};

/// Emission filter: `(new_value, baseline)`.
pub type FilterFn = Arc<dyn Fn(&Value, &Value) -> StoreResult<bool> + Send + Sync>;

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("module `{module}` declares more than one emitter for event `{event}`")]
    Duplicate { module: String, event: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EmitterResult<T> = Result<T, EmitterError>;

/// What a module watches to produce one event: either just a selector, or a
/// selector with options.
///
/// Both forms are normalized once at registration; the watch logic only ever
/// sees the normalized record.
pub enum StateSelector {
    Simple(SelectorFn),
    Complex {
        selector: SelectorFn,
        deep: bool,
        immediate: bool,
        filter: Option<FilterFn>,
    },
}

impl StateSelector {
    pub fn new(
        selector: impl Fn(&Value, &GettersProxy) -> StoreResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::Simple(Arc::new(selector))
    }

    /// Requests structural change detection from the store's watch
    /// primitive. The flag is forwarded unchanged.
    pub fn deep(self, deep: bool) -> Self {
        let (selector, _, immediate, filter) = self.into_parts();
        Self::Complex {
            selector,
            deep,
            immediate,
            filter,
        }
    }

    /// Also emit the selector's current value once at registration time.
    pub fn immediate(self, immediate: bool) -> Self {
        let (selector, deep, _, filter) = self.into_parts();
        Self::Complex {
            selector,
            deep,
            immediate,
            filter,
        }
    }

    /// Gates emission on `(new_value, baseline)`. A failing filter means "do
    /// not emit" for that flush.
    pub fn filter(
        self,
        filter: impl Fn(&Value, &Value) -> StoreResult<bool> + Send + Sync + 'static,
    ) -> Self {
        let (selector, deep, immediate, _) = self.into_parts();
        Self::Complex {
            selector,
            deep,
            immediate,
            filter: Some(Arc::new(filter)),
        }
    }

    fn into_parts(self) -> (SelectorFn, bool, bool, Option<FilterFn>) {
        match self {
            Self::Simple(selector) => (selector, false, false, None),
            Self::Complex {
                selector,
                deep,
                immediate,
                filter,
            } => (selector, deep, immediate, filter),
        }
    }

    fn normalize(self) -> NormalizedSelector {
        let (selector, deep, immediate, filter) = self.into_parts();
        NormalizedSelector {
            selector,
            deep,
            immediate,
            filter: filter.unwrap_or_else(|| Arc::new(|_, _| Ok(true))),
        }
    }
}

struct NormalizedSelector {
    selector: SelectorFn,
    deep: bool,
    immediate: bool,
    filter: FilterFn,
}

/// A module's emitter declarations, in declaration order.
#[derive(Default)]
pub struct StoreEmitters {
    entries: Vec<(EventName, StateSelector)>,
}

impl StoreEmitters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitter(mut self, event: EventName, selector: StateSelector) -> Self {
        self.entries.push((event, selector));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &EventName> {
        self.entries.iter().map(|(event, _)| event)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Watcher-local state of one installed emitter.
pub(crate) struct EmitterState {
    event: EventName,
    module: String,
    /// Old value as of the last flushed emission. `None` means the next raw
    /// tick captures a fresh baseline.
    pending_baseline: Mutex<Option<Value>>,
    /// Latest raw tick's new value, carried to the flush.
    latest: Mutex<Option<Value>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl EmitterState {
    fn new(event: EventName, module: &str) -> Self {
        Self {
            event,
            module: module.to_string(),
            pending_baseline: Mutex::new(None),
            latest: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn cancel(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
        *lock(&self.latest) = None;
        *lock(&self.pending_baseline) = None;
    }
}

/// Everything teardown needs to undo one module's emitter registrations.
#[derive(Default)]
pub(crate) struct EmitterHandles {
    pub(crate) watches: Vec<WatchId>,
    pub(crate) states: Vec<Arc<EmitterState>>,
    pub(crate) immediates: Vec<JoinHandle<()>>,
}

impl EmitterHandles {
    pub(crate) fn cancel(&mut self) {
        for immediate in self.immediates.drain(..) {
            immediate.abort();
        }
        for state in &self.states {
            state.cancel();
        }
    }
}

/// Installs a module's emitters: one store watch per declaration, plus the
/// deferred immediate emissions.
///
/// Duplicate declarations for one event are rejected before anything is
/// installed. A selector that fails at registration time is a configuration
/// error; a selector that fails on a later tick only skips that tick.
pub(crate) fn register_store_emitters(
    module: &str,
    emitters: StoreEmitters,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    window: Duration,
    active: Arc<AtomicBool>,
) -> EmitterResult<EmitterHandles> {
    let mut handles = EmitterHandles::default();
    if emitters.is_empty() {
        return Ok(handles);
    }

    let mut seen = HashSet::new();
    for (event, _) in &emitters.entries {
        if !seen.insert(event.clone()) {
            return Err(EmitterError::Duplicate {
                module: module.to_string(),
                event: event.to_string(),
            });
        }
    }

    let proxy = store.getters(module)?;
    for (event, selector) in emitters.entries {
        let normalized = selector.normalize();

        let bound: WatchSelector = {
            let selector = normalized.selector.clone();
            let proxy = proxy.clone();
            Arc::new(move |state: &Value| selector(state, &proxy))
        };

        let state = Arc::new(EmitterState::new(event.clone(), module));
        let callback: WatchCallback = {
            let state = state.clone();
            let bus = bus.clone();
            let filter = normalized.filter.clone();
            let active = active.clone();
            Arc::new(move |new_value: Value, raw_old: Value| {
                {
                    // Keep the value preceding the whole unflushed burst;
                    // intermediate raw ticks must not overwrite it.
                    let mut baseline = lock(&state.pending_baseline);
                    if baseline.is_none() {
                        *baseline = Some(raw_old);
                    }
                }
                *lock(&state.latest) = Some(new_value);

                let mut timer = lock(&state.timer);
                if let Some(previous) = timer.take() {
                    previous.abort();
                }
                let flush_state = state.clone();
                let bus = bus.clone();
                let filter = filter.clone();
                let active = active.clone();
                *timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    let new_value = lock(&flush_state.latest).take();
                    // Reset regardless of the filter outcome so the next raw
                    // tick recaptures a fresh baseline.
                    let baseline = lock(&flush_state.pending_baseline).take();
                    let (Some(new_value), Some(baseline)) = (new_value, baseline) else {
                        return;
                    };
                    match filter(&new_value, &baseline) {
                        Ok(true) => {
                            if active.load(Ordering::SeqCst) {
                                bus.emit(
                                    Event::new(flush_state.event.clone())
                                        .with_payload(new_value)
                                        .from_module(flush_state.module.clone()),
                                )
                                .await;
                            }
                        }
                        Ok(false) => {}
                        Err(error) => {
                            tracing::warn!(
                                module = %flush_state.module,
                                event = %flush_state.event,
                                %error,
                                "emitter filter failed, skipping emission"
                            );
                        }
                    }
                }));
            })
        };

        let watch_id = store.watch(module, bound.clone(), callback, normalized.deep)?;
        handles.watches.push(watch_id);
        handles.states.push(state);

        if normalized.immediate {
            let current = bound(&store.state(module)?)?;
            let bus = bus.clone();
            let event = event.clone();
            let active = active.clone();
            handles.immediates.push(tokio::spawn(async move {
                if active.load(Ordering::SeqCst) {
                    bus.emit(Event::new(event).with_payload(current)).await;
                }
            }));
        }
    }
    Ok(handles)
}

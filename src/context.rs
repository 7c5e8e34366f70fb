//! # Runtime Context
//!
//! The explicit composition root: one bus, one store handle, one event
//! catalog, and the per-module handles needed to tear everything down
//! again. There is no ambient global state; everything a module's wiring or
//! emitters touch is reached through this object.
//!
//! [`RuntimeContext::install`] is the single startup path. It validates the
//! whole batch (catalog declarations, wiring tables, emitter declarations)
//! before installing anything, so a configuration error aborts startup with
//! a descriptive identification of the offending module instead of leaving
//! a half-wired system behind. Teardown is the mirror image: the module's
//! activity flag flips off first, so nothing fires after
//! [`RuntimeContext::uninstall`] returns, then subscriptions, timers, and
//! watches are released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::emitter::{register_store_emitters, EmitterError, EmitterHandles};
use crate::event::{CatalogError, Event, EventBus, EventCatalog, EventName, SubscriptionId};
use crate::module::Module;
use crate::store::{StateStore, StoreError};
use crate::wiring::{DebounceState, WiringError};

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("module `{0}` is already installed")]
    ModuleAlreadyInstalled(String),
    #[error("module `{0}` is not installed")]
    ModuleNotInstalled(String),
    #[error("module `{module}` declares an emitter for undeclared event `{event}`")]
    UnknownEmitterEvent { module: String, event: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Wiring(#[from] WiringError),
    #[error(transparent)]
    Emitter(#[from] EmitterError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RegistrarResult<T> = Result<T, RegistrarError>;

/// Registration record for an installed module.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

struct ModuleHandle {
    info: ModuleInfo,
    active: Arc<AtomicBool>,
    subscriptions: Vec<(EventName, SubscriptionId)>,
    emitters: EmitterHandles,
    debounce_states: Vec<Arc<DebounceState>>,
}

/// Composition root shared by every installed module.
pub struct RuntimeContext {
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    catalog: EventCatalog,
    config: RuntimeConfig,
    modules: DashMap<String, ModuleHandle>,
}

impl RuntimeContext {
    pub fn new(store: Arc<dyn StateStore>, config: RuntimeConfig) -> Self {
        Self {
            bus: Arc::new(EventBus::new(config.event_buffer_size)),
            store,
            catalog: EventCatalog::new(),
            config,
            modules: DashMap::new(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn module_info(&self, name: &str) -> Option<ModuleInfo> {
        self.modules.get(name).map(|handle| handle.info.clone())
    }

    pub fn installed_modules(&self) -> Vec<String> {
        self.modules.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Installs a batch of modules against the shared bus and store.
    ///
    /// The whole batch is validated before anything is installed: a
    /// configuration error leaves nothing bound and the catalog as it was.
    /// A store-level failure during installation is also fatal, but modules
    /// installed earlier in the batch stay installed; abort startup on any
    /// `Err`. Immediate emitter emissions of the batch fire in registration
    /// order.
    #[tracing::instrument(skip(self, modules), level = "debug")]
    pub async fn install(&self, modules: Vec<Module>) -> RegistrarResult<()> {
        // Duplicate module names, against installed modules and within the batch.
        let mut batch_names = Vec::with_capacity(modules.len());
        for module in &modules {
            if self.modules.contains_key(&module.name) || batch_names.contains(&module.name) {
                return Err(RegistrarError::ModuleAlreadyInstalled(module.name.clone()));
            }
            batch_names.push(module.name.clone());
        }

        // The catalog must hold the whole batch's declarations before any
        // wiring is validated: modules wire each other's events.
        let validated = self.declare_and_validate(&modules);
        if let Err(error) = validated {
            for name in &batch_names {
                self.catalog.retract(name);
            }
            return Err(error);
        }

        for module in modules {
            self.install_validated(module).await?;
        }
        Ok(())
    }

    fn declare_and_validate(&self, modules: &[Module]) -> RegistrarResult<()> {
        for module in modules {
            self.catalog.declare(&module.name, &module.events)?;
        }
        for module in modules {
            module
                .wiring
                .validate(&module.name, &self.catalog, &module.store_module)?;
            for event in module.store_emitters.events() {
                if !self.catalog.contains(event) {
                    return Err(RegistrarError::UnknownEmitterEvent {
                        module: module.name.clone(),
                        event: event.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn install_validated(&self, module: Module) -> RegistrarResult<()> {
        let Module {
            name,
            events: _,
            store_module,
            store_emitters,
            wiring,
        } = module;

        self.store.register_module(&name, store_module)?;

        let active = Arc::new(AtomicBool::new(true));
        let emitters = register_store_emitters(
            &name,
            store_emitters,
            self.bus.clone(),
            self.store.clone(),
            self.config.emitter_debounce,
            active.clone(),
        )?;
        let debounce_states = wiring.debounce_states();
        let subscriptions = wiring.bind(&name, &self.bus, self.store.clone(), active.clone());

        let handle = ModuleHandle {
            info: ModuleInfo {
                name: name.clone(),
                registered_at: Utc::now(),
            },
            active,
            subscriptions,
            emitters,
            debounce_states,
        };
        self.modules.insert(name.clone(), handle);

        tracing::info!(module = %name, "module installed");
        self.bus
            .emit(
                Event::new(EventName::ModuleRegistered)
                    .with_payload(json!({ "module": name.as_str() }))
                    .from_module(name),
            )
            .await;
        Ok(())
    }

    /// Tears one module down: nothing of it fires once this returns.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn uninstall(&self, name: &str) -> RegistrarResult<()> {
        let (_, mut handle) = self
            .modules
            .remove(name)
            .ok_or_else(|| RegistrarError::ModuleNotInstalled(name.to_string()))?;

        // Flip the activity flag before releasing anything so handlers
        // already cloned into an in-flight emission become no-ops.
        handle.active.store(false, Ordering::SeqCst);

        for (event, id) in &handle.subscriptions {
            self.bus.unsubscribe(event, *id);
        }
        for state in &handle.debounce_states {
            state.cancel().await;
        }
        handle.emitters.cancel();
        for watch in &handle.emitters.watches {
            self.store.unwatch(*watch);
        }
        self.store.remove_module(name)?;
        self.catalog.retract(name);

        tracing::info!(module = %name, "module uninstalled");
        self.bus
            .emit(
                Event::new(EventName::ModuleUnregistered)
                    .with_payload(json!({ "module": name }))
                    .from_module(name),
            )
            .await;
        Ok(())
    }

    /// Tears every installed module down and releases all subscriptions and
    /// timers.
    pub async fn teardown(&self) -> RegistrarResult<()> {
        for name in self.installed_modules() {
            self.uninstall(&name).await?;
        }
        Ok(())
    }
}

//! # Event Catalog
//!
//! The catalog is the closed set of event names the runtime knows about.
//! Built-in lifecycle names are registered at construction; every other name
//! is contributed by a module at composition time. Wiring validation checks
//! its keys against this catalog, which is what turns a typo in a wiring
//! table into a fatal configuration error instead of a silently dead wire.

use dashmap::DashMap;
use thiserror::Error;

/// A named event in the catalog.
///
/// Lifecycle names are owned by the registrar. Everything else is a
/// [`EventName::Custom`] name declared by a module. `Custom` is the
/// `EnumString` default, so any unmatched string parses into it.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumString, strum::Display,
)]
pub enum EventName {
    /// A module finished installing against the shared bus and store.
    ModuleRegistered,
    /// A module was torn down and its subscriptions released.
    ModuleUnregistered,
    /// A module-declared event name.
    #[strum(default)]
    Custom(String),
}

impl EventName {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Whether this name is reserved for the registrar.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

/// Catalog entry: the event name and the module that declared it
/// (`None` for built-in names).
#[derive(Debug, Clone)]
pub struct EventInfo {
    pub name: EventName,
    pub module: Option<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("event `{event}` declared by module `{module}` is already declared by `{existing}`")]
    AlreadyDeclared {
        event: String,
        module: String,
        existing: String,
    },
    #[error("event `{event}` is a built-in name and cannot be declared by module `{module}`")]
    BuiltinReserved { event: String, module: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// The closed event-name catalog shared by one runtime.
#[derive(Default)]
pub struct EventCatalog {
    events: DashMap<EventName, EventInfo>,
}

impl EventCatalog {
    pub fn new() -> Self {
        let catalog = Self::default();
        catalog.register_builtin_events();
        catalog
    }

    fn register_builtin_events(&self) {
        for name in [EventName::ModuleRegistered, EventName::ModuleUnregistered] {
            self.events.insert(
                name.clone(),
                EventInfo {
                    name,
                    module: None,
                },
            );
        }
    }

    /// Registers the event names a module declares it owns.
    ///
    /// Declaring a built-in name or a name another module already declared is
    /// a configuration error.
    pub fn declare(&self, module: &str, names: &[EventName]) -> CatalogResult<()> {
        for name in names {
            if name.is_builtin() {
                return Err(CatalogError::BuiltinReserved {
                    event: name.to_string(),
                    module: module.to_string(),
                });
            }
            if let Some(existing) = self.events.get(name) {
                return Err(CatalogError::AlreadyDeclared {
                    event: name.to_string(),
                    module: module.to_string(),
                    existing: existing
                        .module
                        .clone()
                        .unwrap_or_else(|| "<builtin>".to_string()),
                });
            }
            self.events.insert(
                name.clone(),
                EventInfo {
                    name: name.clone(),
                    module: Some(module.to_string()),
                },
            );
        }
        Ok(())
    }

    /// Removes a module's declarations, reopening those names.
    pub fn retract(&self, module: &str) {
        self.events
            .retain(|_, info| info.module.as_deref() != Some(module));
    }

    pub fn contains(&self, name: &EventName) -> bool {
        self.events.contains_key(name)
    }

    /// The module that declared `name`, if it is a declared custom event.
    pub fn owner(&self, name: &EventName) -> Option<String> {
        self.events.get(name).and_then(|info| info.module.clone())
    }

    pub fn declared_events(&self) -> Vec<EventInfo> {
        self.events.iter().map(|entry| entry.value().clone()).collect()
    }
}

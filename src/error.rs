//! Crate-level error aggregation.
//!
//! Each subsystem carries its own error enum; this type is the convergence
//! point for callers that cross subsystem boundaries.

use thiserror::Error;

use crate::context::RegistrarError;
use crate::emitter::EmitterError;
use crate::event::{BusError, CatalogError};
use crate::store::StoreError;
use crate::wiring::WiringError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Wiring(#[from] WiringError),
    #[error(transparent)]
    Emitter(#[from] EmitterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registrar(#[from] RegistrarError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

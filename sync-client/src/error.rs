//! Driver errors.

use crate::link::LinkError;
use misync_core::{ContractError, PersistenceError, SinkRegistryError};
use misync_types::WireError;
use thiserror::Error;

/// Master driver errors.
///
/// Modules that do not answer are not errors; they only lose liveness.
#[derive(Debug, Error)]
pub enum MasterError {
    /// Link failure that stops the master.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Module list could not be parsed.
    #[error("invalid module list: {0}")]
    ModuleList(#[from] WireError),

    /// No sink slot left.
    #[error("sink registration failed: {0}")]
    Sinks(#[from] SinkRegistryError),
}

/// Device driver errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Link failure that stops the device.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Contracts could not be declared.
    #[error("invalid contract: {0}")]
    Contract(#[from] ContractError),

    /// Settings snapshot failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] PersistenceError),
}

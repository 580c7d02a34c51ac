//! # sync-core
//!
//! Pure logic for misync (no I/O, instant tests).
//!
//! This crate implements the variable model and the module/master state
//! machines without any transport, timer or disk access. Time is passed in
//! explicitly as an [`Instant`](std::time::Instant), so every behaviour can
//! be tested deterministically.
//!
//! ## Layers
//!
//! - [`VariableCell`] - one typed value with change, event and per-sink bits
//! - [`VariableSet`] - ordered cells plus a contract
//! - [`ModuleEndpoint`] / [`RemoteModule`] - the module and master sides of
//!   one module's three sets, both implementing [`ModuleInterface`]
//! - [`ModuleInterfaceSet`] - all modules of a master with cross-module
//!   dependencies
//! - [`SinkSlot`] - per-sink delivery discipline for external synchronizers
//!
//! The actual I/O (transport, sinks, timers) is performed by `sync-client`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod handle;
pub mod interface;
pub mod interface_set;
pub mod module;
pub mod oom;
pub mod persistence;
pub mod remote;
pub mod sink;
pub mod time;
pub mod variable_set;

pub use cell::{VariableCell, ALL_SINKS};
pub use handle::VariableHandle;
pub use interface::{
    Handled, InterfaceCore, ModuleInterface, Notification, NotifyFn, Reply, SetKind,
};
pub use interface_set::{ModuleEntry, ModuleInterfaceSet, TimeSyncPlan};
pub use module::ModuleEndpoint;
pub use oom::{clear_out_of_memory, flag_out_of_memory, out_of_memory};
pub use persistence::{
    read_settings, write_settings, write_when_due, MemoryStore, PersistenceError, SaveSchedule,
    SnapshotStore,
};
pub use remote::{Liveness, RemoteModule};
pub use sink::{SinkRegistry, SinkRegistryError, SinkSlot, SinkWrite, MAX_SINKS};
pub use time::{UtcClock, TIME_UTC_2017};
pub use variable_set::{
    Applied, ContractError, IngestOutcome, Role, ValueError, ValueSelection, VariableSet,
};

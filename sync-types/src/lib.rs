//! # sync-types
//!
//! Wire format types for the misync module/master variable protocol.
//!
//! This crate provides the foundational types used across all misync crates:
//! - [`Command`] - The command byte that starts every message
//! - [`VariableType`], [`Value`] - Typed variable values and their encodings
//! - [`StatusBits`] - Module status flags
//! - [`ContractId`], [`Address`] - Contract identity and transport addressing
//! - [`ContractMessage`], [`ValueHeader`], [`StatusMessage`], [`TimeMessage`],
//!   [`SnapshotHeader`] - Binary message layouts
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod error;
mod ids;
mod messages;
mod status;
mod variable;

pub use command::{split_command, Command};
pub use error::WireError;
pub use ids::{Address, ContractId};
pub use messages::{
    ContractEntry, ContractMessage, SnapshotHeader, StatusMessage, TimeMessage, ValueHeader,
    EVENT_FLAG, MAX_VARIABLES,
};
pub use status::StatusBits;
pub use variable::{Value, VariableType, MAX_NAME_LENGTH, PREFIX_LENGTH};

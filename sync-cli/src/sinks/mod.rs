//! Sinks the binary can attach to a master.

pub mod json;
pub mod log;

pub use json::JsonFileSink;
pub use log::LogSink;

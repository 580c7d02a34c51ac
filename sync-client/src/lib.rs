//! # sync-client
//!
//! Async drivers for the misync module/master variable synchronization.
//!
//! This is the library applications use to run a master or a device.
//!
//! ## Features
//!
//! - **Master driver**: contract discovery, periodic transfers, event
//!   forwarding and time distribution
//! - **Device driver**: answers requests and pushes output events
//! - **Link Abstraction**: Pluggable packet link (UDP in the binary, mock)
//! - **External Sinks**: async trait with per-sink delivery bits
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use misync_client::{Config, Master, MockLink};
//!
//! let config = Config::from_file("misync.toml".as_ref())?;
//! let mut master = Master::new(MockLink::new(config.udp.address), &config.master)?;
//!
//! loop {
//!     master.update().await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod device;
pub mod error;
pub mod link;
pub mod master;
pub mod sink;

pub use config::{
    Config, ConfigError, DeviceConfig, JsonSinkConfig, LogSinkConfig, MasterConfig, PeerConfig,
    SinksConfig, UdpConfig,
};
pub use device::{BoxedStore, Device};
pub use error::{DeviceError, MasterError};
pub use link::{Link, LinkError, MockLink, Packet, Responder, MAX_PAYLOAD};
pub use master::{Master, UnhandledFn};
pub use sink::{
    mark_ready_when_complete, write_named, ChannelSink, SettingWrite, Sink, SinkError, SinkUpdate,
};

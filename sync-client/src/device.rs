//! Device - the module side of misync over a [`Link`].
//!
//! A device answers whoever asks. The first peer that requests something or
//! pushes values is taken as its master, and output events are pushed there
//! as soon as they are raised.

use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::link::{Link, LinkError, Packet};
use crate::master::now;
use misync_core::{
    read_settings, write_when_due, Handled, ModuleEndpoint, ModuleInterface, PersistenceError,
    Role, SaveSchedule, SnapshotStore,
};
use misync_types::{Address, StatusBits};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Storage used for the settings snapshot.
pub type BoxedStore = Box<dyn SnapshotStore + Send>;

/// Snapshot offset inside the store.
const SNAPSHOT_START: usize = 0;

/// The module side of misync.
pub struct Device<L: Link> {
    link: L,
    endpoint: ModuleEndpoint,
    config: DeviceConfig,
    master: Option<Address>,
    snapshot: Option<(BoxedStore, SaveSchedule)>,
}

impl<L: Link> Device<L> {
    /// Wrap an existing endpoint.
    pub fn new(link: L, endpoint: ModuleEndpoint, config: DeviceConfig) -> Self {
        Self {
            link,
            endpoint,
            config,
            master: None,
            snapshot: None,
        }
    }

    /// Declare the endpoint from the contracts in `config`.
    pub fn from_config(link: L, config: &DeviceConfig) -> Result<Self, DeviceError> {
        let endpoint = ModuleEndpoint::new(
            &config.name,
            &config.settings,
            &config.inputs,
            &config.outputs,
            now(),
        )?;
        info!(name = %config.name, address = %link.address(), "device created");
        Ok(Self::new(link, endpoint, config.clone()))
    }

    /// Keep settings in `store`, restoring a matching snapshot right away.
    ///
    /// A missing or foreign snapshot is not an error; the device then waits
    /// for the master's settings as usual.
    pub fn with_snapshot(mut self, store: BoxedStore) -> Result<Self, DeviceError> {
        let now = now();
        let settings = &mut self.endpoint.core_mut().settings;
        if !settings.is_empty() {
            match read_settings(settings, store.as_ref(), SNAPSHOT_START, Role::Module, now) {
                Ok(applied) if applied.complete => {
                    info!(values = applied.values, "settings restored");
                    self.endpoint
                        .core_mut()
                        .status
                        .set(StatusBits::MISSING_SETTINGS, false);
                }
                Ok(_) => debug!("snapshot incomplete"),
                Err(e @ PersistenceError::Io(_)) => return Err(e.into()),
                Err(e) => debug!(error = %e, "no usable snapshot"),
            }
        }
        let schedule = SaveSchedule::new(self.config.save_interval(), now);
        self.snapshot = Some((store, schedule));
        Ok(self)
    }

    /// The module endpoint.
    pub fn endpoint(&self) -> &ModuleEndpoint {
        &self.endpoint
    }

    /// The module endpoint, for local edits.
    pub fn endpoint_mut(&mut self) -> &mut ModuleEndpoint {
        &mut self.endpoint
    }

    /// Address of the master, once it has been heard from.
    pub fn master(&self) -> Option<Address> {
        self.master
    }

    /// The underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// One round: answer requests, push events, save the snapshot when due.
    pub async fn update(&mut self) -> Result<(), DeviceError> {
        self.link.update().await?;

        let window = self.config.receive_window();
        let mut wait = window;
        while let Some(packet) = self.link.receive(wait).await? {
            self.handle(packet).await?;
            wait = std::time::Duration::ZERO;
        }

        let now = now();
        self.endpoint.update_time(now);
        self.push_output_events().await?;
        self.save_snapshot(now);
        Ok(())
    }

    /// Run [`update`](Self::update) until `shutdown` resolves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), DeviceError>
    where
        F: Future<Output = ()>,
    {
        let poll = self.config.poll_interval();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("device stopping");
                    return Ok(());
                }
                result = async {
                    self.update().await?;
                    tokio::time::sleep(poll).await;
                    Ok::<(), DeviceError>(())
                } => result?,
            }
        }
    }

    async fn handle(&mut self, packet: Packet) -> Result<(), DeviceError> {
        match self.endpoint.handle_message(&packet.payload, now()) {
            Handled::Reply(reply) => {
                self.remember_master(packet.from);
                match self
                    .link
                    .send(packet.from, &reply, self.config.send_timeout())
                    .await
                {
                    Ok(()) => {}
                    Err(LinkError::Closed) => return Err(LinkError::Closed.into()),
                    Err(e) => debug!(to = %packet.from, error = %e, "reply not acknowledged"),
                }
            }
            Handled::Input => {
                if !packet.from.is_broadcast() {
                    self.remember_master(packet.from);
                }
            }
            Handled::ReplySuppressed => {
                warn!(from = %packet.from, "out of memory, reply suppressed");
            }
            Handled::Unrecognized => {
                debug!(from = %packet.from, bytes = packet.payload.len(), "ignored packet");
            }
        }
        Ok(())
    }

    fn remember_master(&mut self, from: Address) {
        if self.master != Some(from) {
            info!(master = %from, "master found");
            self.master = Some(from);
        }
    }

    async fn push_output_events(&mut self) -> Result<(), DeviceError> {
        let Some(master) = self.master else {
            return Ok(());
        };
        let Some(message) = self.endpoint.output_events_message() else {
            return Ok(());
        };
        match self
            .link
            .send(master, &message, self.config.send_timeout())
            .await
        {
            Ok(()) => {
                debug!(bytes = message.len(), "output events delivered");
                self.endpoint.clear_output_events();
            }
            Err(LinkError::Closed) => return Err(LinkError::Closed.into()),
            Err(e) => debug!(%master, error = %e, "output events not acknowledged"),
        }
        Ok(())
    }

    fn save_snapshot(&mut self, now: Instant) {
        let Some((store, schedule)) = self.snapshot.as_mut() else {
            return;
        };
        let settings = &self.endpoint.core().settings;
        if settings.is_empty() || !settings.is_updated() {
            return;
        }
        match write_when_due(settings, store.as_mut(), SNAPSHOT_START, schedule, now) {
            Ok(true) => info!("settings snapshot saved"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "saving settings snapshot failed"),
        }
    }
}

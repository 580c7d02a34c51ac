//! Master - drives a set of remote modules over a [`Link`].
//!
//! The master owns the pure [`ModuleInterfaceSet`] from misync-core and
//! performs the I/O it needs: contract requests, periodic value transfers,
//! event forwarding, sink exchange and time distribution.
//!
//! # Architecture
//!
//! ```text
//! Sinks ⇄ Master → Link → Modules
//!            ↓
//!     ModuleInterfaceSet (pure logic)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let link = MockLink::new(Address::local(1));
//! let mut master = Master::new(link, &config.master)?;
//! master.add_sink(Box::new(LogSink::new()))?;
//! master.run_until(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

use crate::config::MasterConfig;
use crate::error::MasterError;
use crate::link::{Link, LinkError, Packet};
use crate::sink::Sink;
use misync_core::{
    Handled, ModuleInterface, ModuleInterfaceSet, RemoteModule, SetKind, SinkRegistry, SinkSlot,
    UtcClock,
};
use misync_types::{split_command, Address, Command, TimeMessage};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Callback for packets no module interface recognised.
///
/// Receives the module the packet came from, if the sender is known.
pub type UnhandledFn = Box<dyn FnMut(&Packet, Option<&RemoteModule>) + Send>;

/// Current instant on the runtime clock (follows paused time in tests).
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// The master side of misync.
pub struct Master<L: Link> {
    link: L,
    config: MasterConfig,
    modules: ModuleInterfaceSet,
    sinks: Vec<(SinkSlot, Box<dyn Sink>)>,
    registry: SinkRegistry,
    clock: UtcClock,
    last_transfer: Option<Instant>,
    last_time_sync: Option<Instant>,
    unhandled: Option<UnhandledFn>,
}

impl<L: Link> Master<L> {
    /// Create a master for the modules listed in `config`.
    pub fn new(link: L, config: &MasterConfig) -> Result<Self, MasterError> {
        let mut modules = ModuleInterfaceSet::new(&config.prefix);
        modules.set_liveness(config.liveness());
        modules.set_interface_list(&config.modules)?;
        info!(modules = modules.len(), address = %link.address(), "master created");
        Ok(Self {
            link,
            config: config.clone(),
            modules,
            sinks: Vec::new(),
            registry: SinkRegistry::new(),
            clock: UtcClock::System,
            last_transfer: None,
            last_time_sync: None,
            unhandled: None,
        })
    }

    /// Attach an external sink.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) -> Result<SinkSlot, MasterError> {
        let slot = self.registry.register()?;
        info!(sink = sink.name(), slot = slot.index(), "sink registered");
        self.sinks.push((slot, sink));
        Ok(slot)
    }

    /// Number of attached sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Register a callback for packets not meant for the module interfaces.
    pub fn set_unhandled_callback(&mut self, f: UnhandledFn) {
        self.unhandled = Some(f);
    }

    /// Replace the module list. Unchanged text keeps the current modules.
    pub fn set_module_list(&mut self, list: &str) -> Result<bool, MasterError> {
        let changed = self.modules.set_interface_list(list)?;
        if changed {
            self.last_time_sync = None;
        }
        Ok(changed)
    }

    /// Use another clock for time distribution.
    pub fn set_clock(&mut self, clock: UtcClock) {
        self.clock = clock;
    }

    /// Clock used for time distribution.
    pub fn clock_mut(&mut self) -> &mut UtcClock {
        &mut self.clock
    }

    /// The remote modules.
    pub fn modules(&self) -> &ModuleInterfaceSet {
        &self.modules
    }

    /// The remote modules, mutable.
    pub fn modules_mut(&mut self) -> &mut ModuleInterfaceSet {
        &mut self.modules
    }

    /// The underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// One round: frequent work, one sink update once every contract is known
    /// and, when due, a full transfer.
    pub async fn update(&mut self) -> Result<(), MasterError> {
        self.update_frequent().await?;

        let started = now();
        let initiated = self.modules.got_all_contracts(started);
        if initiated {
            self.update_sinks(started).await;
        }
        let due = self
            .last_transfer
            .map(|at| started.saturating_duration_since(at) >= self.config.transfer_interval())
            .unwrap_or(true);
        if initiated && due {
            self.last_transfer = Some(started);
            self.transfer_all().await?;
            let elapsed = now().saturating_duration_since(started);
            debug!(elapsed_ms = elapsed.as_millis() as u64, "transfer round done");
        }
        Ok(())
    }

    /// Work that should happen as often as possible: incoming packets,
    /// contract requests and events.
    pub async fn update_frequent(&mut self) -> Result<(), MasterError> {
        self.link.update().await?;
        self.drain_incoming().await?;
        self.update_contracts().await?;
        self.handle_events().await
    }

    /// Run [`update`](Self::update) until `shutdown` resolves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), MasterError>
    where
        F: Future<Output = ()>,
    {
        let poll = self.config.poll_interval();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("master stopping");
                    return Ok(());
                }
                result = async {
                    self.update().await?;
                    tokio::time::sleep(poll).await;
                    Ok::<(), MasterError>(())
                } => result?,
            }
        }
    }

    /// Full transfer: settings both ways, outputs and status from modules,
    /// outputs to dependent inputs and sinks, inputs to modules, time.
    pub async fn transfer_all(&mut self) -> Result<(), MasterError> {
        self.transfer_settings().await?;
        self.update_frequent().await?;

        self.request_values().await?;
        self.modules.transfer_outputs_to_inputs(now());
        self.update_frequent().await?;

        self.put_values_to_sinks().await;
        self.modules.clear_output_changes();

        self.send_inputs().await?;
        self.update_frequent().await?;

        self.broadcast_time().await?;
        self.update_frequent().await
    }

    // =========================================================================
    // Contracts, settings and values
    // =========================================================================

    async fn update_contracts(&mut self) -> Result<(), MasterError> {
        let now = now();
        for ix in 0..self.modules.len() {
            let Some(module) = self.modules.module_mut(ix) else {
                continue;
            };
            if module.missing_contract().is_none() {
                continue;
            }
            let interval = self.config.contract_interval(module.is_active(now));
            if !module.take_contract_request(interval, now) {
                continue;
            }
            for (kind, cmd) in [
                (SetKind::Settings, Command::SendSettingContract),
                (SetKind::Inputs, Command::SendInputContract),
                (SetKind::Outputs, Command::SendOutputContract),
            ] {
                let missing = self
                    .modules
                    .module(ix)
                    .map(|m| !m.core().set(kind).got_contract())
                    .unwrap_or(false);
                if missing {
                    self.request(ix, cmd).await?;
                }
            }
            self.drain_incoming().await?;
        }
        Ok(())
    }

    async fn transfer_settings(&mut self) -> Result<(), MasterError> {
        // Modules changed locally first, so sinks see those changes.
        for ix in 0..self.modules.len() {
            let wanted = self
                .modules
                .module(ix)
                .map(|m| {
                    let settings = &m.core().settings;
                    m.core().status.is_modified_settings()
                        && settings.got_contract()
                        && !settings.is_empty()
                })
                .unwrap_or(false);
            if wanted {
                self.request(ix, Command::SendSettings).await?;
                self.drain_incoming().await?;
            }
        }

        let now = now();
        for (slot, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.put_settings(&mut self.modules, *slot).await {
                warn!(sink = sink.name(), error = %e, "exporting settings failed");
            }
        }
        for (slot, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.get_settings(&mut self.modules, *slot, now).await {
                warn!(sink = sink.name(), error = %e, "importing settings failed");
            }
        }
        self.modules.settle_settings(self.registry.count());

        for ix in 0..self.modules.len() {
            let message = self.modules.module_mut(ix).and_then(|m| m.settings_message());
            if let Some(message) = message {
                if self.send_to(ix, &message).await? {
                    if let Some(m) = self.modules.module_mut(ix) {
                        m.delivered(SetKind::Settings);
                    }
                }
                self.drain_incoming().await?;
            }
        }
        Ok(())
    }

    async fn request_values(&mut self) -> Result<(), MasterError> {
        for ix in 0..self.modules.len() {
            let (has_outputs, has_contract) = self
                .modules
                .module(ix)
                .map(|m| (!m.core().outputs.is_empty(), m.got_contract()))
                .unwrap_or((false, false));
            if !has_contract {
                continue;
            }
            if has_outputs {
                self.request(ix, Command::SendOutputs).await?;
            }
            self.request(ix, Command::SendStatus).await?;
        }
        Ok(())
    }

    async fn send_inputs(&mut self) -> Result<(), MasterError> {
        for ix in 0..self.modules.len() {
            let message = self.modules.module_mut(ix).and_then(|m| m.inputs_message());
            if let Some(message) = message {
                if self.send_to(ix, &message).await? {
                    if let Some(m) = self.modules.module_mut(ix) {
                        m.delivered(SetKind::Inputs);
                    }
                }
                self.drain_incoming().await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Forward events: outputs to dependent inputs and sinks, settings to modules.
    pub async fn handle_events(&mut self) -> Result<(), MasterError> {
        if !self.modules.got_all_contracts(now()) {
            return Ok(());
        }

        if self.modules.dependencies_valid() {
            self.modules.transfer_output_events();
            for ix in 0..self.modules.len() {
                let message = self.modules.module(ix).and_then(|m| m.input_events_message());
                if let Some(message) = message {
                    debug!(module = ix, bytes = message.len(), "sending input events");
                    self.send_to(ix, &message).await?;
                }
            }
            self.modules.clear_input_events();
        }

        for (slot, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.put_events(&mut self.modules, *slot).await {
                warn!(sink = sink.name(), error = %e, "exporting events failed");
            }
        }
        self.modules.clear_output_events();

        for ix in 0..self.modules.len() {
            let message = self.modules.module(ix).and_then(|m| m.setting_events_message());
            if let Some(message) = message {
                self.send_to(ix, &message).await?;
            }
        }
        self.modules.clear_setting_events();
        Ok(())
    }

    // =========================================================================
    // Sinks
    // =========================================================================

    async fn update_sinks(&mut self, now: Instant) {
        for (slot, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.update(&mut self.modules, *slot, now).await {
                warn!(sink = sink.name(), error = %e, "sink update failed");
            }
            if let Err(e) = sink.get_values(&mut self.modules, *slot, now).await {
                warn!(sink = sink.name(), error = %e, "importing values failed");
            }
        }
    }

    async fn put_values_to_sinks(&mut self) {
        for (slot, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.put_values(&mut self.modules, *slot).await {
                warn!(sink = sink.name(), error = %e, "exporting values failed");
            }
        }
    }

    // =========================================================================
    // Time
    // =========================================================================

    async fn broadcast_time(&mut self) -> Result<(), MasterError> {
        let now = now();
        if !self.clock.is_synced(now) {
            return Ok(());
        }
        let scheduled = self
            .last_time_sync
            .map(|at| now.saturating_duration_since(at) >= self.config.time_sync_interval())
            .unwrap_or(true);
        let bus = self.link.address().bus;
        let plan = self.modules.plan_time_sync(bus, scheduled);
        let message = TimeMessage {
            utc_seconds: self.clock.now_utc(now),
        }
        .encode();
        let timeout = self.config.send_timeout(false);

        if plan.broadcast {
            debug!(utc = self.clock.now_utc(now), "broadcasting time");
            self.send_unchecked(Address::broadcast(bus), &message, timeout)
                .await?;
        }
        for ix in plan.directed {
            if let Some(address) = self.modules.module(ix).map(|m| m.address()) {
                debug!(module = ix, %address, "sending directed time sync");
                self.send_unchecked(address, &message, timeout).await?;
            }
        }
        if scheduled {
            self.last_time_sync = Some(now);
        }
        Ok(())
    }

    // =========================================================================
    // Link plumbing
    // =========================================================================

    /// Send without touching the receiver's liveness.
    async fn send_unchecked(
        &self,
        to: Address,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), MasterError> {
        match self.link.send(to, payload, timeout).await {
            Ok(()) => Ok(()),
            Err(LinkError::Closed) => Err(LinkError::Closed.into()),
            Err(e) => {
                debug!(%to, error = %e, "unacknowledged send");
                Ok(())
            }
        }
    }

    /// Send to module `ix`, recording the outcome. Returns whether it was acked.
    async fn send_to(&mut self, ix: usize, payload: &[u8]) -> Result<bool, MasterError> {
        let Some(module) = self.modules.module(ix) else {
            return Ok(false);
        };
        let address = module.address();
        let timeout = self.config.send_timeout(module.is_active(now()));
        let acked = match self.link.send(address, payload, timeout).await {
            Ok(()) => true,
            Err(LinkError::Closed) => return Err(LinkError::Closed.into()),
            Err(e) => {
                debug!(module = ix, %address, error = %e, "send failed");
                false
            }
        };
        if let Some(module) = self.modules.module_mut(ix) {
            module.record_send(acked);
        }
        Ok(acked)
    }

    /// Send request `cmd` to module `ix` and wait for its reply.
    ///
    /// Packets arriving meanwhile are dispatched as usual. Returns whether
    /// the expected reply arrived in time.
    async fn request(&mut self, ix: usize, cmd: Command) -> Result<bool, MasterError> {
        let Some(expected) = cmd.reply() else {
            return Ok(false);
        };
        if !self.send_to(ix, &[cmd.as_byte()]).await? {
            return Ok(false);
        }
        let deadline = tokio::time::Instant::now() + self.config.request_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                debug!(module = ix, cmd = ?cmd, "request timed out");
                return Ok(false);
            }
            match tokio::time::timeout(remaining, self.link.receive(remaining)).await {
                Err(_) => {
                    debug!(module = ix, cmd = ?cmd, "request timed out");
                    return Ok(false);
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(None)) => continue,
                Ok(Ok(Some(packet))) => {
                    if self.dispatch(packet).await? == Some((ix, expected)) {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Handle everything already received.
    async fn drain_incoming(&mut self) -> Result<(), MasterError> {
        while let Some(packet) = self.link.receive(Duration::ZERO).await? {
            self.dispatch(packet).await?;
        }
        Ok(())
    }

    /// Pass a packet to the module it came from.
    ///
    /// Returns the module and command when a module interface handled it.
    async fn dispatch(&mut self, packet: Packet) -> Result<Option<(usize, Command)>, MasterError> {
        let now = now();
        let located = self.modules.locate(packet.from);
        if let Some(ix) = located {
            let cmd = split_command(&packet.payload).and_then(|(c, _)| c.ok());
            let handled = match self.modules.module_mut(ix) {
                Some(module) => module.handle_message(&packet.payload, now),
                None => Handled::Unrecognized,
            };
            match (handled, cmd) {
                (Handled::Input, Some(cmd)) => return Ok(Some((ix, cmd))),
                (Handled::Reply(reply), Some(cmd)) => {
                    self.send_to(ix, &reply).await?;
                    return Ok(Some((ix, cmd)));
                }
                (Handled::ReplySuppressed, Some(cmd)) => {
                    warn!(module = ix, cmd = ?cmd, "out of memory, reply suppressed");
                    return Ok(Some((ix, cmd)));
                }
                _ => {}
            }
        }
        debug!(from = %packet.from, bytes = packet.payload.len(), "unhandled packet");
        if let Some(f) = self.unhandled.as_mut() {
            f(&packet, located.and_then(|ix| self.modules.module(ix)));
        }
        Ok(None)
    }
}

//! Mock link for testing.
//!
//! Captures sent messages, queues incoming packets and can route directed
//! sends to in-process responders, so a master can be driven against real
//! [`ModuleEndpoint`]s without a network.

use super::{Link, LinkError, Packet, MAX_PAYLOAD};
use async_trait::async_trait;
use misync_core::{Handled, ModuleEndpoint, ModuleInterface};
use misync_types::Address;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Answers a message delivered to one address. A returned message is queued
/// as a packet from that address.
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Mock link for testing.
///
/// Directed sends are acknowledged unless the destination was marked
/// unreachable or a failure was forced.
#[derive(Default)]
pub struct MockLink {
    address: Address,
    inner: Arc<Mutex<MockLinkInner>>,
    arrived: Arc<Notify>,
}

#[derive(Default)]
struct MockLinkInner {
    sent: Vec<(Address, Vec<u8>)>,
    incoming: VecDeque<Packet>,
    responders: HashMap<Address, Responder>,
    unreachable: HashSet<Address>,
    fail_next_send: Option<String>,
    fail_next_receive: Option<String>,
}

impl MockLink {
    /// Create a new mock link with the given own address.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    fn inner(&self) -> MutexGuard<'_, MockLinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a packet to be returned by `receive()`.
    pub fn queue_packet(&self, from: Address, payload: Vec<u8>) {
        self.inner().incoming.push_back(Packet { from, payload });
        self.arrived.notify_one();
    }

    /// All messages sent so far with their destinations.
    pub fn sent(&self) -> Vec<(Address, Vec<u8>)> {
        self.inner().sent.clone()
    }

    /// Messages sent to one destination.
    pub fn sent_to(&self, to: Address) -> Vec<Vec<u8>> {
        self.inner()
            .sent
            .iter()
            .filter(|(a, _)| *a == to)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// The last message sent.
    pub fn last_sent(&self) -> Option<(Address, Vec<u8>)> {
        self.inner().sent.last().cloned()
    }

    /// Forget the sent log.
    pub fn clear_sent(&self) {
        self.inner().sent.clear();
    }

    /// Route directed sends to `address` through `responder`.
    pub fn attach(&self, address: Address, responder: Responder) {
        self.inner().responders.insert(address, responder);
    }

    /// Let a shared module endpoint answer at `address`.
    ///
    /// Broadcasts on the endpoint's bus reach it too.
    pub fn attach_endpoint(&self, address: Address, endpoint: Arc<Mutex<ModuleEndpoint>>) {
        self.attach(
            address,
            Box::new(move |message| {
                let now = tokio::time::Instant::now().into_std();
                let mut endpoint = endpoint.lock().unwrap_or_else(PoisonError::into_inner);
                match endpoint.handle_message(message, now) {
                    Handled::Reply(reply) => Some(reply),
                    _ => None,
                }
            }),
        );
    }

    /// Stop acknowledging sends to `address`.
    pub fn set_unreachable(&self, address: Address, unreachable: bool) {
        let mut inner = self.inner();
        if unreachable {
            inner.unreachable.insert(address);
        } else {
            inner.unreachable.remove(&address);
        }
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner().fail_next_send = Some(error.to_string());
    }

    /// Cause the next receive() to fail with the given error.
    pub fn fail_next_receive(&self, error: &str) {
        self.inner().fail_next_receive = Some(error.to_string());
    }

    /// Clear all state (log, queue, responders, failures).
    pub fn reset(&self) {
        *self.inner() = MockLinkInner::default();
    }

    fn pop_incoming(&self) -> Result<Option<Packet>, LinkError> {
        let mut inner = self.inner();
        if let Some(error) = inner.fail_next_receive.take() {
            return Err(LinkError::ReceiveFailed(error));
        }
        Ok(inner.incoming.pop_front())
    }
}

impl Clone for MockLink {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            inner: Arc::clone(&self.inner),
            arrived: Arc::clone(&self.arrived),
        }
    }
}

impl fmt::Debug for MockLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("MockLink")
            .field("address", &self.address)
            .field("sent", &inner.sent.len())
            .field("incoming", &inner.incoming.len())
            .field("responders", &inner.responders.len())
            .finish()
    }
}

#[async_trait]
impl Link for MockLink {
    fn address(&self) -> Address {
        self.address
    }

    async fn send(&self, to: Address, payload: &[u8], _timeout: Duration) -> Result<(), LinkError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge(payload.len()));
        }
        {
            let mut inner = self.inner();
            if let Some(error) = inner.fail_next_send.take() {
                return Err(LinkError::SendFailed(error));
            }
            inner.sent.push((to, payload.to_vec()));

            if to.is_broadcast() {
                for (address, responder) in inner.responders.iter_mut() {
                    if address.is_on_bus(to.bus) {
                        // Broadcasts are never answered.
                        let _ = responder(payload);
                    }
                }
            } else {
                if inner.unreachable.contains(&to) {
                    return Err(LinkError::NoAck(to));
                }
                let reply = match inner.responders.get_mut(&to) {
                    Some(responder) => responder(payload),
                    None => None,
                };
                if let Some(reply) = reply {
                    inner.incoming.push_back(Packet {
                        from: to,
                        payload: reply,
                    });
                }
            }
        }
        self.arrived.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Packet>, LinkError> {
        if let Some(packet) = self.pop_incoming()? {
            return Ok(Some(packet));
        }
        if wait.is_zero() {
            return Ok(None);
        }
        let _ = tokio::time::timeout(wait, self.arrived.notified()).await;
        self.pop_incoming()
    }
}

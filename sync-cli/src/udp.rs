//! UDP link - misync packets over datagrams with per-packet acks.
//!
//! Every datagram carries a small header:
//!
//! ```text
//! [kind:1][seq:2 LE][from id:1][from bus:4][to id:1][to bus:4][payload...]
//! ```
//!
//! `kind` is 0 for data and 1 for an ack. Directed data is acked with the
//! same sequence number; broadcasts (to id 0) are not. Peers are known from
//! the configuration and learned from every datagram received.

use async_trait::async_trait;
use misync_client::{Link, LinkError, Packet, UdpConfig, MAX_PAYLOAD};
use misync_types::Address;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Header length in bytes.
pub const HEADER_LEN: usize = 13;

const KIND_DATA: u8 = 0;
const KIND_ACK: u8 = 1;

/// One datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Ack rather than data
    pub ack: bool,
    /// Sequence number echoed by the ack
    pub seq: u16,
    /// Sender
    pub from: Address,
    /// Receiver, id 0 for broadcasts
    pub to: Address,
    /// Packet body, empty for acks
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(if self.ack { KIND_ACK } else { KIND_DATA });
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.push(self.from.id);
        buf.extend_from_slice(&self.from.bus);
        buf.push(self.to.id);
        buf.extend_from_slice(&self.to.bus);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram. Returns `None` for anything malformed.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let ack = match buf[0] {
            KIND_DATA => false,
            KIND_ACK => true,
            _ => return None,
        };
        let bus = |at: usize| -> [u8; 4] { [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]] };
        Some(Self {
            ack,
            seq: u16::from_le_bytes([buf[1], buf[2]]),
            from: Address::new(buf[3], bus(4)),
            to: Address::new(buf[8], bus(9)),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

#[derive(Debug, Default)]
struct UdpState {
    peers: HashMap<Address, SocketAddr>,
    incoming: VecDeque<Packet>,
    acked: Vec<(Address, u16)>,
}

/// [`Link`] over a UDP socket.
#[derive(Debug)]
pub struct UdpLink {
    address: Address,
    socket: UdpSocket,
    state: Mutex<UdpState>,
    seq: AtomicU16,
}

impl UdpLink {
    /// Bind the socket and resolve the configured peers.
    pub async fn bind(config: &UdpConfig) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind((config.bind.as_str(), config.port)).await?;
        let mut peers = HashMap::new();
        for peer in &config.peers {
            let resolved = tokio::net::lookup_host(peer.socket.as_str())
                .await?
                .next()
                .ok_or_else(|| {
                    LinkError::SendFailed(format!("cannot resolve peer {}", peer.socket))
                })?;
            peers.insert(peer.address, resolved);
        }
        debug!(
            address = %config.address,
            local = ?socket.local_addr().ok(),
            peers = peers.len(),
            "udp link bound"
        );
        Ok(Self {
            address: config.address,
            socket,
            state: Mutex::new(UdpState {
                peers,
                ..UdpState::default()
            }),
            seq: AtomicU16::new(1),
        })
    }

    /// Socket address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }

    /// Add or replace a peer.
    pub fn add_peer(&self, address: Address, socket: SocketAddr) {
        self.state().peers.insert(address, socket);
    }

    fn state(&self) -> MutexGuard<'_, UdpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Handle one datagram: learn the sender, ack data, queue packets.
    async fn accept(&self, buf: &[u8], source: SocketAddr) -> Result<(), LinkError> {
        let Some(frame) = Frame::decode(buf) else {
            debug!(%source, bytes = buf.len(), "malformed datagram dropped");
            return Ok(());
        };
        if !frame.to.is_broadcast() && frame.to.id != self.address.id {
            trace!(to = %frame.to, "datagram for someone else");
            return Ok(());
        }
        if frame.to.is_broadcast() && !self.address.is_on_bus(frame.to.bus) {
            return Ok(());
        }
        self.state().peers.insert(frame.from, source);

        if frame.ack {
            self.state().acked.push((frame.from, frame.seq));
            return Ok(());
        }
        if !frame.to.is_broadcast() {
            let ack = Frame {
                ack: true,
                seq: frame.seq,
                from: self.address,
                to: frame.from,
                payload: Vec::new(),
            };
            self.socket.send_to(&ack.encode(), source).await?;
        }
        self.state().incoming.push_back(Packet {
            from: frame.from,
            payload: frame.payload,
        });
        Ok(())
    }

    /// Read whatever is already waiting on the socket.
    async fn drain_socket(&self) -> Result<(), LinkError> {
        let mut buf = vec![0u8; HEADER_LEN + MAX_PAYLOAD];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, source)) => self.accept(&buf[..len], source).await?,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(LinkError::ReceiveFailed(e.to_string())),
            }
        }
    }

    /// Wait up to `wait` for one datagram.
    async fn receive_one(&self, wait: Duration) -> Result<bool, LinkError> {
        let mut buf = vec![0u8; HEADER_LEN + MAX_PAYLOAD];
        match tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await {
            Err(_) => Ok(false),
            Ok(Ok((len, source))) => {
                self.accept(&buf[..len], source).await?;
                Ok(true)
            }
            Ok(Err(e)) => Err(LinkError::ReceiveFailed(e.to_string())),
        }
    }

    fn take_ack(&self, from: Address, seq: u16) -> bool {
        let mut state = self.state();
        match state.acked.iter().position(|a| *a == (from, seq)) {
            Some(ix) => {
                state.acked.swap_remove(ix);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Link for UdpLink {
    fn address(&self) -> Address {
        self.address
    }

    async fn send(&self, to: Address, payload: &[u8], timeout: Duration) -> Result<(), LinkError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge(payload.len()));
        }
        let frame = Frame {
            ack: false,
            seq: self.next_seq(),
            from: self.address,
            to,
            payload: payload.to_vec(),
        };
        let bytes = frame.encode();

        if to.is_broadcast() {
            let targets: Vec<SocketAddr> = {
                let state = self.state();
                let mut sockets: Vec<SocketAddr> = state
                    .peers
                    .iter()
                    .filter(|(a, _)| a.is_on_bus(to.bus))
                    .map(|(_, s)| *s)
                    .collect();
                sockets.sort();
                sockets.dedup();
                sockets
            };
            for target in targets {
                self.socket.send_to(&bytes, target).await?;
            }
            return Ok(());
        }

        let target = self
            .state()
            .peers
            .get(&to)
            .copied()
            .ok_or(LinkError::UnknownDestination(to))?;
        self.socket.send_to(&bytes, target).await?;
        trace!(%to, seq = frame.seq, bytes = payload.len(), "datagram sent");

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.take_ack(to, frame.seq) {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() || !self.receive_one(remaining).await? {
                return if self.take_ack(to, frame.seq) {
                    Ok(())
                } else {
                    Err(LinkError::NoAck(to))
                };
            }
        }
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Packet>, LinkError> {
        if let Some(packet) = self.state().incoming.pop_front() {
            return Ok(Some(packet));
        }
        self.drain_socket().await?;
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(packet) = self.state().incoming.pop_front() {
                return Ok(Some(packet));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() || !self.receive_one(remaining).await? {
                return Ok(self.state().incoming.pop_front());
            }
        }
    }

    async fn update(&self) -> Result<(), LinkError> {
        // Acks nobody waits for any more.
        self.state().acked.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use misync_client::PeerConfig;

    fn config(id: u8) -> UdpConfig {
        UdpConfig {
            address: Address::local(id),
            bind: "127.0.0.1".to_string(),
            port: 0,
            peers: Vec::new(),
        }
    }

    async fn pair() -> (UdpLink, UdpLink) {
        let a = UdpLink::bind(&config(1)).await.unwrap();
        let b = UdpLink::bind(&config(10)).await.unwrap();
        a.add_peer(Address::local(10), b.local_addr().unwrap());
        b.add_peer(Address::local(1), a.local_addr().unwrap());
        (a, b)
    }

    // ===========================================
    // Frame Tests
    // ===========================================

    #[test]
    fn frame_layout() {
        let frame = Frame {
            ack: false,
            seq: 0x0102,
            from: Address::new(1, [0, 0, 0, 2]),
            to: Address::local(44),
            payload: vec![0xAA],
        };
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 1);
        assert_eq!(&bytes[..4], &[0, 0x02, 0x01, 1]);
        assert_eq!(bytes[8], 44);
        assert_eq!(Frame::decode(&bytes), Some(frame));
    }

    #[test]
    fn short_or_unknown_frames_are_rejected() {
        assert_eq!(Frame::decode(&[0; HEADER_LEN - 1]), None);
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[0] = 7;
        assert_eq!(Frame::decode(&bytes), None);
    }

    // ===========================================
    // Link Tests
    // ===========================================

    #[tokio::test]
    async fn directed_send_is_acked_and_received() {
        let (a, b) = pair().await;

        let receiver = async {
            loop {
                if let Some(packet) = b.receive(Duration::from_millis(50)).await.unwrap() {
                    return packet;
                }
            }
        };
        let (sent, packet) = tokio::join!(
            a.send(Address::local(10), &[1, 2, 3], Duration::from_secs(2)),
            receiver
        );
        sent.unwrap();
        assert_eq!(packet.from, Address::local(1));
        assert_eq!(packet.payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_destination() {
        let (a, _b) = pair().await;
        assert!(matches!(
            a.send(Address::local(99), &[1], Duration::from_millis(10)).await,
            Err(LinkError::UnknownDestination(_))
        ));
    }

    #[tokio::test]
    async fn silent_peer_is_not_acked() {
        let a = UdpLink::bind(&config(1)).await.unwrap();
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.add_peer(Address::local(10), silent.local_addr().unwrap());

        let result = a
            .send(Address::local(10), &[1], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(LinkError::NoAck(_))));
    }

    #[tokio::test]
    async fn broadcast_reaches_peers_without_ack() {
        let (a, b) = pair().await;
        a.send(Address::broadcast([0; 4]), &[9], Duration::from_secs(1))
            .await
            .unwrap();

        let packet = b.receive(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(packet.payload, vec![9]);
        // No ack came back.
        assert!(a.state().acked.is_empty());
    }

    #[tokio::test]
    async fn sender_is_learned() {
        let a = UdpLink::bind(&config(1)).await.unwrap();
        let b = UdpLink::bind(&UdpConfig {
            peers: vec![PeerConfig {
                address: Address::local(1),
                socket: a.local_addr().unwrap().to_string(),
            }],
            ..config(10)
        })
        .await
        .unwrap();

        b.send(Address::broadcast([0; 4]), &[5], Duration::from_secs(1))
            .await
            .unwrap();
        a.receive(Duration::from_secs(2)).await.unwrap().unwrap();
        assert!(a.state().peers.contains_key(&Address::local(10)));
    }

    #[tokio::test]
    async fn oversized_payload_rejected() {
        let (a, _b) = pair().await;
        let big = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            a.send(Address::local(10), &big, Duration::from_millis(10)).await,
            Err(LinkError::PayloadTooLarge(_))
        ));
    }
}

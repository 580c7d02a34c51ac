//! Contract identifiers and transport addresses.

use crate::{VariableType, WireError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier summarising a contract's layout.
///
/// Zero means "no contract". The derivation is a rolling byte checksum, not a
/// hash: distinct contracts may collide.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId(pub u32);

impl ContractId {
    /// No contract received or declared.
    pub const NONE: ContractId = ContractId(0);

    /// Starting value, non-zero so an empty contract is still a contract.
    const SEED: u32 = 0x3333_3333;

    /// Derive the id from an ordered list of `(type, name)` pairs.
    ///
    /// Byte 0 sums sizes, byte 1 sums name lengths, byte 2 sums type bytes,
    /// byte 3 XORs every name byte. All arithmetic wraps.
    pub fn derive<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (VariableType, &'a str)>,
    {
        let mut b = Self::SEED.to_le_bytes();
        for (ty, name) in entries {
            b[0] = b[0].wrapping_add(ty.size() as u8);
            b[1] = b[1].wrapping_add(name.len() as u8);
            b[2] = b[2].wrapping_add(ty.as_byte());
            for c in name.bytes() {
                b[3] ^= c;
            }
        }
        ContractId(u32::from_le_bytes(b))
    }

    /// Whether a contract is present.
    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    /// Little-endian wire bytes.
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Read from the first four bytes of `bytes`.
    pub fn from_le_slice(bytes: &[u8]) -> Result<Self, WireError> {
        match bytes.get(..4) {
            Some(b) => Ok(ContractId(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            None => Err(WireError::BufferTooShort {
                expected: 4,
                actual: bytes.len(),
            }),
        }
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractId({:#010x})", self.0)
    }
}

/// Transport address of a module: device id on a bus.
///
/// Text form is `"44"` (local bus) or `"44:0.0.0.1"`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    /// Device id on the bus; 0 is broadcast
    pub id: u8,
    /// Bus id; all zero for the local bus
    pub bus: [u8; 4],
}

impl Address {
    /// Device id used for broadcasts.
    pub const BROADCAST_ID: u8 = 0;

    /// Address on the local bus.
    pub fn local(id: u8) -> Self {
        Self { id, bus: [0; 4] }
    }

    /// Address on a specific bus.
    pub fn new(id: u8, bus: [u8; 4]) -> Self {
        Self { id, bus }
    }

    /// Broadcast address for a bus.
    pub fn broadcast(bus: [u8; 4]) -> Self {
        Self {
            id: Self::BROADCAST_ID,
            bus,
        }
    }

    /// Whether this is a broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.id == Self::BROADCAST_ID
    }

    /// Whether this address is reachable on `bus` without routing.
    ///
    /// An all-zero bus id means "whatever bus the sender is on".
    pub fn is_on_bus(&self, bus: [u8; 4]) -> bool {
        self.bus == bus || self.bus == [0; 4]
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WireError::InvalidAddress(s.to_string());
        let (id_part, bus_part) = match s.split_once(':') {
            Some((id, bus)) => (id, Some(bus)),
            None => (s, None),
        };
        let id: u8 = id_part.trim().parse().map_err(|_| bad())?;
        let mut bus = [0u8; 4];
        if let Some(bus_text) = bus_part {
            let mut parts = bus_text.split('.');
            for slot in bus.iter_mut() {
                *slot = parts
                    .next()
                    .and_then(|p| p.trim().parse().ok())
                    .ok_or_else(bad)?;
            }
            if parts.next().is_some() {
                return Err(bad());
            }
        }
        Ok(Self { id, bus })
    }
}

impl TryFrom<String> for Address {
    type Error = WireError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bus == [0; 4] {
            write!(f, "{}", self.id)
        } else {
            write!(
                f,
                "{}:{}.{}.{}.{}",
                self.id, self.bus[0], self.bus[1], self.bus[2], self.bus[3]
            )
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

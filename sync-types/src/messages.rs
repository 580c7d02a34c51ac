//! Binary message layouts.
//!
//! Every message starts with a [`Command`] byte. Decoders in this module take
//! the *body*, i.e. the bytes after the command byte. Multi-byte integers are
//! little-endian.
//!
//! | Message  | Body layout |
//! |----------|-------------|
//! | Contract | `[contract_id:4][count:1]{[type:1][name_len:1][name]}*` |
//! | Values   | `[contract_id:4][count_byte:1]{[index:1 if partial][value]}*` |
//! | Status   | `[status_bits:1][out_of_memory:1][uptime_s:4]` |
//! | Time     | `[utc_seconds:4]` |

use crate::variable::MAX_NAME_LENGTH;
use crate::{Command, ContractId, StatusBits, VariableType, WireError};

/// Highest variable count a value message can express.
pub const MAX_VARIABLES: usize = 0x7F;

/// Count byte bit marking an event delivery.
pub const EVENT_FLAG: u8 = 0x80;

fn ensure_len(body: &[u8], expected: usize) -> Result<(), WireError> {
    if body.len() < expected {
        Err(WireError::BufferTooShort {
            expected,
            actual: body.len(),
        })
    } else {
        Ok(())
    }
}

/// One `(type, name)` pair of a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEntry {
    /// Declared type
    pub ty: VariableType,
    /// Variable name without type suffix
    pub name: String,
}

/// A serialized contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMessage {
    /// Id computed by the declaring side
    pub contract_id: ContractId,
    /// Entries in contract order
    pub entries: Vec<ContractEntry>,
}

impl ContractMessage {
    /// Bytes needed by [`encode_into`](Self::encode_into), command byte included.
    pub fn encoded_len(&self) -> usize {
        6 + self
            .entries
            .iter()
            .map(|e| 2 + e.name.len().min(u8::MAX as usize))
            .sum::<usize>()
    }

    /// Append the full message, command byte first.
    pub fn encode_into(&self, cmd: Command, out: &mut Vec<u8>) -> Result<(), WireError> {
        if self.entries.len() > MAX_VARIABLES {
            return Err(WireError::TooManyVariables(self.entries.len()));
        }
        out.push(cmd.as_byte());
        out.extend_from_slice(&self.contract_id.to_le_bytes());
        out.push(self.entries.len() as u8);
        for entry in &self.entries {
            let name = &entry.name.as_bytes()[..entry.name.len().min(u8::MAX as usize)];
            out.push(entry.ty.as_byte());
            out.push(name.len() as u8);
            out.extend_from_slice(name);
        }
        Ok(())
    }

    /// Decode a contract body. Names longer than the stored maximum are truncated.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        ensure_len(body, 5)?;
        let contract_id = ContractId::from_le_slice(body)?;
        let count = body[4] as usize;
        let mut entries = Vec::with_capacity(count);
        let mut pos = 5;
        for _ in 0..count {
            ensure_len(body, pos + 2)?;
            let ty = VariableType::from_byte(body[pos]);
            let name_len = body[pos + 1] as usize;
            pos += 2;
            ensure_len(body, pos + name_len)?;
            let name_bytes = &body[pos..pos + name_len.min(MAX_NAME_LENGTH)];
            entries.push(ContractEntry {
                ty,
                name: String::from_utf8_lossy(name_bytes).into_owned(),
            });
            pos += name_len;
        }
        Ok(Self {
            contract_id,
            entries,
        })
    }
}

/// Fixed header of a value message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueHeader {
    /// Contract the values conform to
    pub contract_id: ContractId,
    /// Number of values that follow (0 = contract confirmed, no values yet)
    pub count: u8,
    /// Event delivery
    pub event: bool,
}

impl ValueHeader {
    /// Header length in bytes (body only).
    pub const LEN: usize = 5;

    /// Decode the first five body bytes.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        ensure_len(body, Self::LEN)?;
        let contract_id = ContractId::from_le_slice(body)?;
        let raw = body[4];
        Ok(Self {
            contract_id,
            count: raw & !EVENT_FLAG,
            event: raw & EVENT_FLAG != 0,
        })
    }

    /// The count byte with the event flag folded in.
    pub fn count_byte(&self) -> u8 {
        let mut b = self.count & !EVENT_FLAG;
        if self.event {
            b |= EVENT_FLAG;
        }
        b
    }

    /// Append command byte and header.
    pub fn encode_into(&self, cmd: Command, out: &mut Vec<u8>) {
        out.push(cmd.as_byte());
        out.extend_from_slice(&self.contract_id.to_le_bytes());
        out.push(self.count_byte());
    }
}

/// Module status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusMessage {
    /// Status flags
    pub status: StatusBits,
    /// Module ran out of memory at some point
    pub out_of_memory: bool,
    /// Seconds since module start
    pub uptime: u32,
}

impl StatusMessage {
    /// Body length in bytes.
    pub const LEN: usize = 6;

    /// Full message, command byte included.
    pub fn encode(&self) -> [u8; 1 + Self::LEN] {
        let mut out = [0u8; 1 + Self::LEN];
        out[0] = Command::SetStatus.as_byte();
        out[1] = self.status.bits();
        out[2] = self.out_of_memory as u8;
        out[3..7].copy_from_slice(&self.uptime.to_le_bytes());
        out
    }

    /// Decode a status body. The length must match exactly.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        if body.len() != Self::LEN {
            return Err(WireError::InvalidLength {
                expected: Self::LEN,
                actual: body.len(),
            });
        }
        Ok(Self {
            status: StatusBits(body[0]),
            out_of_memory: body[1] != 0,
            uptime: u32::from_le_bytes([body[2], body[3], body[4], body[5]]),
        })
    }
}

/// UTC time push from master to module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMessage {
    /// Seconds since the Unix epoch
    pub utc_seconds: u32,
}

impl TimeMessage {
    /// Body length in bytes.
    pub const LEN: usize = 4;

    /// Full message, command byte included.
    pub fn encode(&self) -> [u8; 1 + Self::LEN] {
        let mut out = [0u8; 1 + Self::LEN];
        out[0] = Command::SetTime.as_byte();
        out[1..].copy_from_slice(&self.utc_seconds.to_le_bytes());
        out
    }

    /// Decode a time body.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        ensure_len(body, Self::LEN)?;
        Ok(Self {
            utc_seconds: u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
        })
    }
}

/// Header of a persisted settings snapshot.
///
/// Layout: `[magic:4][contract_id:4][value_length:1]` followed by the
/// settings value message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Contract of the stored settings
    pub contract_id: ContractId,
    /// Length of the stored value message
    pub length: u8,
}

impl SnapshotHeader {
    /// Magic number identifying a snapshot.
    pub const MAGIC: u32 = 2_786_000_001;

    /// Header length in bytes.
    pub const LEN: usize = 9;

    /// Encode the header.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&Self::MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.contract_id.to_le_bytes());
        out[8] = self.length;
        out
    }

    /// Decode and check the magic number.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ensure_len(bytes, Self::LEN)?;
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != Self::MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        Ok(Self {
            contract_id: ContractId::from_le_slice(&bytes[4..])?,
            length: bytes[8],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ty: VariableType, name: &str) -> ContractEntry {
        ContractEntry {
            ty,
            name: name.to_string(),
        }
    }

    // ===========================================
    // Contract messages
    // ===========================================

    #[test]
    fn contract_message_layout() {
        let msg = ContractMessage {
            contract_id: ContractId(0x0403_0201),
            entries: vec![entry(VariableType::F32, "Temp"), entry(VariableType::U8, "Mode")],
        };
        let mut out = Vec::new();
        msg.encode_into(Command::SetSettingContract, &mut out).unwrap();

        assert_eq!(out.len(), msg.encoded_len());
        assert_eq!(out[0], 4);
        assert_eq!(&out[1..5], &[1, 2, 3, 4]);
        assert_eq!(out[5], 2);
        assert_eq!(out[6], VariableType::F32.as_byte());
        assert_eq!(out[7], 4);
        assert_eq!(&out[8..12], b"Temp");
        assert_eq!(out[12], VariableType::U8.as_byte());

        let decoded = ContractMessage::decode(&out[1..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn contract_decode_truncates_long_names() {
        let mut body = vec![9, 0, 0, 0, 1, VariableType::U8.as_byte(), 12];
        body.extend_from_slice(b"VeryLongName");
        let decoded = ContractMessage::decode(&body).unwrap();
        assert_eq!(decoded.entries[0].name, "VeryLongNa");
    }

    #[test]
    fn contract_decode_rejects_truncated_body() {
        let body = vec![9, 0, 0, 0, 1, VariableType::U8.as_byte(), 5, b'A'];
        assert!(matches!(
            ContractMessage::decode(&body),
            Err(WireError::BufferTooShort { .. })
        ));
        assert!(ContractMessage::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn contract_encode_rejects_oversized() {
        let msg = ContractMessage {
            contract_id: ContractId(1),
            entries: (0..128).map(|_| entry(VariableType::U8, "X")).collect(),
        };
        let mut out = Vec::new();
        assert_eq!(
            msg.encode_into(Command::SetInputContract, &mut out),
            Err(WireError::TooManyVariables(128))
        );
    }

    // ===========================================
    // Value header
    // ===========================================

    #[test]
    fn value_header_event_bit() {
        let h = ValueHeader::decode(&[1, 0, 0, 0, 0x83]).unwrap();
        assert_eq!(h.contract_id, ContractId(1));
        assert_eq!(h.count, 3);
        assert!(h.event);
        assert_eq!(h.count_byte(), 0x83);

        let mut out = Vec::new();
        h.encode_into(Command::SetOutputs, &mut out);
        assert_eq!(out, vec![13, 1, 0, 0, 0, 0x83]);
    }

    #[test]
    fn value_header_too_short() {
        assert!(ValueHeader::decode(&[1, 0, 0, 0]).is_err());
    }

    // ===========================================
    // Status and time
    // ===========================================

    #[test]
    fn status_message_layout() {
        let msg = StatusMessage {
            status: StatusBits(StatusBits::MISSING_TIME),
            out_of_memory: true,
            uptime: 3600,
        };
        let bytes = msg.encode();
        assert_eq!(bytes[0], Command::SetStatus.as_byte());
        assert_eq!(bytes[1], 32);
        assert_eq!(bytes[2], 1);
        assert_eq!(StatusMessage::decode(&bytes[1..]).unwrap(), msg);
        assert!(StatusMessage::decode(&bytes[1..6]).is_err());
    }

    #[test]
    fn time_message_layout() {
        let msg = TimeMessage {
            utc_seconds: 1_500_000_000,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 5);
        assert_eq!(bytes[0], 15);
        assert_eq!(TimeMessage::decode(&bytes[1..]).unwrap(), msg);
    }

    // ===========================================
    // Snapshot header
    // ===========================================

    #[test]
    fn snapshot_header_checks_magic() {
        let h = SnapshotHeader {
            contract_id: ContractId(77),
            length: 12,
        };
        let bytes = h.encode();
        assert_eq!(SnapshotHeader::decode(&bytes).unwrap(), h);

        let mut bad = bytes;
        bad[0] ^= 0xFF;
        assert!(matches!(
            SnapshotHeader::decode(&bad),
            Err(WireError::BadMagic(_))
        ));
    }
}

//! Variable types and typed values.

use crate::WireError;
use std::fmt;

/// Longest stored variable name, prefix included.
pub const MAX_NAME_LENGTH: usize = 10;

/// Length of a lower-case module prefix in front of a variable name.
pub const PREFIX_LENGTH: usize = 2;

/// Two-letter codes indexed by the wire type byte.
const TYPE_CODES: [&str; 9] = ["--", "b1", "u1", "u2", "u4", "i1", "i2", "i4", "f4"];

/// Type of a single synchronised variable.
///
/// The discriminant is the byte sent in contract messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum VariableType {
    /// Undeclared or unrecognised type; has no value bytes
    #[default]
    Unknown = 0,
    /// Boolean stored as one byte
    Boolean = 1,
    /// Unsigned 8 bit
    U8 = 2,
    /// Unsigned 16 bit
    U16 = 3,
    /// Unsigned 32 bit
    U32 = 4,
    /// Signed 8 bit
    I8 = 5,
    /// Signed 16 bit
    I16 = 6,
    /// Signed 32 bit
    I32 = 7,
    /// IEEE-754 single precision
    F32 = 8,
}

impl VariableType {
    /// Decode a contract type byte. Out-of-range bytes become [`VariableType::Unknown`].
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Boolean,
            2 => Self::U8,
            3 => Self::U16,
            4 => Self::U32,
            5 => Self::I8,
            6 => Self::I16,
            7 => Self::I32,
            8 => Self::F32,
            _ => Self::Unknown,
        }
    }

    /// The wire byte for this type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Size in bytes of a value of this type.
    pub fn size(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::Boolean | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
        }
    }

    /// Two-letter code used in textual contracts (`"b1"`, `"f4"`, ...).
    pub fn code(self) -> &'static str {
        TYPE_CODES[self as usize]
    }

    /// Look up a type by its two-letter code. Unrecognised codes map to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        let code = code.get(..2).unwrap_or(code);
        TYPE_CODES
            .iter()
            .position(|c| *c == code)
            .map(|i| Self::from_byte(i as u8))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A decoded variable value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Unsigned 8 bit
    U8(u8),
    /// Unsigned 16 bit
    U16(u16),
    /// Unsigned 32 bit
    U32(u32),
    /// Signed 8 bit
    I8(i8),
    /// Signed 16 bit
    I16(i16),
    /// Signed 32 bit
    I32(i32),
    /// Single precision float
    F32(f32),
}

impl Value {
    /// The variable type this value encodes as.
    pub fn variable_type(&self) -> VariableType {
        match self {
            Self::Bool(_) => VariableType::Boolean,
            Self::U8(_) => VariableType::U8,
            Self::U16(_) => VariableType::U16,
            Self::U32(_) => VariableType::U32,
            Self::I8(_) => VariableType::I8,
            Self::I16(_) => VariableType::I16,
            Self::I32(_) => VariableType::I32,
            Self::F32(_) => VariableType::F32,
        }
    }

    /// Little-endian bytes, padded to 4. Only the first `size()` bytes are meaningful.
    pub fn to_le_bytes(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        match *self {
            Self::Bool(v) => out[0] = v as u8,
            Self::U8(v) => out[0] = v,
            Self::I8(v) => out[0] = v as u8,
            Self::U16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Self::I16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::F32(v) => out.copy_from_slice(&v.to_le_bytes()),
        }
        out
    }

    /// The value's bytes, exactly as long as its type's size.
    pub fn bytes(&self) -> Vec<u8> {
        self.to_le_bytes()[..self.variable_type().size()].to_vec()
    }

    /// Decode little-endian bytes of the given type.
    ///
    /// Returns `None` for `Unknown` or when `bytes` is shorter than the type's size.
    pub fn from_le_bytes(ty: VariableType, bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ty.size() {
            return None;
        }
        Some(match ty {
            VariableType::Unknown => return None,
            VariableType::Boolean => Self::Bool(bytes[0] != 0),
            VariableType::U8 => Self::U8(bytes[0]),
            VariableType::I8 => Self::I8(bytes[0] as i8),
            VariableType::U16 => Self::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
            VariableType::I16 => Self::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
            VariableType::U32 => {
                Self::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            VariableType::I32 => {
                Self::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            VariableType::F32 => {
                Self::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        })
    }

    /// Parse a textual value as the given type.
    ///
    /// Booleans accept `0`/`1`/`true`/`false`. Integers reject out-of-range text.
    pub fn parse(ty: VariableType, text: &str) -> Result<Self, WireError> {
        let t = text.trim();
        let err = || WireError::InvalidValue {
            ty: ty.code(),
            text: text.to_string(),
        };
        Ok(match ty {
            VariableType::Unknown => return Err(err()),
            VariableType::Boolean => match t {
                "1" | "true" | "TRUE" | "True" => Self::Bool(true),
                "0" | "false" | "FALSE" | "False" => Self::Bool(false),
                _ => return Err(err()),
            },
            VariableType::U8 => Self::U8(t.parse().map_err(|_| err())?),
            VariableType::U16 => Self::U16(t.parse().map_err(|_| err())?),
            VariableType::U32 => Self::U32(t.parse().map_err(|_| err())?),
            VariableType::I8 => Self::I8(t.parse().map_err(|_| err())?),
            VariableType::I16 => Self::I16(t.parse().map_err(|_| err())?),
            VariableType::I32 => Self::I32(t.parse().map_err(|_| err())?),
            VariableType::F32 => Self::F32(t.parse().map_err(|_| err())?),
        })
    }

    /// Numeric view, used by sinks that only deal in numbers.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Bool(v) => v as u8 as f64,
            Self::U8(v) => v as f64,
            Self::U16(v) => v as f64,
            Self::U32(v) => v as f64,
            Self::I8(v) => v as f64,
            Self::I16(v) => v as f64,
            Self::I32(v) => v as f64,
            Self::F32(v) => v as f64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", *v as u8),
            Self::U8(v) => write!(f, "{}", v),
            Self::U16(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::I8(v) => write!(f, "{}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_sizes() {
        assert_eq!(VariableType::Unknown.size(), 0);
        assert_eq!(VariableType::Boolean.size(), 1);
        assert_eq!(VariableType::U8.size(), 1);
        assert_eq!(VariableType::I8.size(), 1);
        assert_eq!(VariableType::U16.size(), 2);
        assert_eq!(VariableType::I16.size(), 2);
        assert_eq!(VariableType::U32.size(), 4);
        assert_eq!(VariableType::I32.size(), 4);
        assert_eq!(VariableType::F32.size(), 4);
    }

    #[test]
    fn type_codes_match_wire_bytes() {
        for b in 0u8..=8 {
            let ty = VariableType::from_byte(b);
            assert_eq!(ty.as_byte(), b);
            assert_eq!(VariableType::from_code(ty.code()), ty);
        }
        assert_eq!(VariableType::from_code("f4"), VariableType::F32);
        assert_eq!(VariableType::from_code("u2"), VariableType::U16);
        assert_eq!(VariableType::from_code("zz"), VariableType::Unknown);
        assert_eq!(VariableType::from_byte(200), VariableType::Unknown);
    }

    #[test]
    fn value_bytes_are_little_endian() {
        assert_eq!(Value::U16(0x1234).bytes(), vec![0x34, 0x12]);
        assert_eq!(Value::I32(-1).bytes(), vec![0xFF; 4]);
        assert_eq!(Value::Bool(true).bytes(), vec![1]);
        assert_eq!(Value::F32(1.5).bytes(), 1.5f32.to_le_bytes().to_vec());
    }

    #[test]
    fn value_decodes_from_bytes() {
        let v = Value::from_le_bytes(VariableType::I16, &[0xFE, 0xFF]).unwrap();
        assert_eq!(v, Value::I16(-2));
        assert!(Value::from_le_bytes(VariableType::U32, &[1, 2]).is_none());
        assert!(Value::from_le_bytes(VariableType::Unknown, &[1]).is_none());
    }

    #[test]
    fn value_parse_from_text() {
        assert_eq!(
            Value::parse(VariableType::Boolean, "true").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::parse(VariableType::U8, " 42 ").unwrap(),
            Value::U8(42)
        );
        assert_eq!(
            Value::parse(VariableType::F32, "21.5").unwrap(),
            Value::F32(21.5)
        );
        assert!(Value::parse(VariableType::U8, "300").is_err());
        assert!(Value::parse(VariableType::Unknown, "1").is_err());
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Bool(true).to_string(), "1");
        assert_eq!(Value::I8(-5).to_string(), "-5");
        assert_eq!(Value::F32(2.5).to_string(), "2.5");
    }
}

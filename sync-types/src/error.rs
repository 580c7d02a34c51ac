//! Error types for misync wire handling.

use thiserror::Error;

/// Errors that can occur while decoding or encoding misync wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Buffer shorter than the fixed layout requires
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort {
        /// Minimum length required
        expected: usize,
        /// Length actually available
        actual: usize,
    },

    /// Buffer length does not match a fixed-size layout
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Exact length required
        expected: usize,
        /// Length actually available
        actual: usize,
    },

    /// Command byte outside the known command table
    #[error("unknown command byte: {0}")]
    UnknownCommand(u8),

    /// Message carried a different command than the decoder expects
    #[error("unexpected command: expected {expected}, got {actual}")]
    UnexpectedCommand {
        /// Command the decoder handles
        expected: u8,
        /// Command found on the wire
        actual: u8,
    },

    /// A contract declares more variables than fit in the 7-bit count
    #[error("too many variables: {0} (max 127)")]
    TooManyVariables(usize),

    /// Text could not be parsed as a value of the given type
    #[error("invalid {ty} value: {text:?}")]
    InvalidValue {
        /// Two-letter type code
        ty: &'static str,
        /// Offending text
        text: String,
    },

    /// Text could not be parsed as an address
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Snapshot header does not carry the expected magic number
    #[error("bad snapshot magic: {0:#010x}")]
    BadMagic(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::UnknownCommand(99);
        assert_eq!(err.to_string(), "unknown command byte: 99");

        let err = WireError::BufferTooShort {
            expected: 5,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "buffer too short: expected at least 5 bytes, got 2"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}

//! Command codes carried in the first byte of every misync message.

use crate::WireError;
use std::fmt;

/// Protocol command byte.
///
/// The numeric values are wire-stable and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Placeholder for an unset command
    Unknown = 0,
    /// Master asks a module for its settings contract
    SendSettingContract = 1,
    /// Master asks a module for its inputs contract
    SendInputContract = 2,
    /// Master asks a module for its outputs contract
    SendOutputContract = 3,
    /// Module delivers its settings contract
    SetSettingContract = 4,
    /// Module delivers its inputs contract
    SetInputContract = 5,
    /// Module delivers its outputs contract
    SetOutputContract = 6,
    /// Request settings values (either direction)
    SendSettings = 7,
    /// Module requests input values from the master
    SendInputs = 8,
    /// Master requests output values from a module
    SendOutputs = 9,
    /// Master requests the status message
    SendStatus = 10,
    /// Deliver settings values (either direction)
    SetSettings = 11,
    /// Master delivers input values
    SetInputs = 12,
    /// Module delivers output values
    SetOutputs = 13,
    /// Module delivers its status
    SetStatus = 14,
    /// Master delivers UTC time
    SetTime = 15,
}

impl Command {
    /// Decode a command byte.
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        Ok(match b {
            0 => Self::Unknown,
            1 => Self::SendSettingContract,
            2 => Self::SendInputContract,
            3 => Self::SendOutputContract,
            4 => Self::SetSettingContract,
            5 => Self::SetInputContract,
            6 => Self::SetOutputContract,
            7 => Self::SendSettings,
            8 => Self::SendInputs,
            9 => Self::SendOutputs,
            10 => Self::SendStatus,
            11 => Self::SetSettings,
            12 => Self::SetInputs,
            13 => Self::SetOutputs,
            14 => Self::SetStatus,
            15 => Self::SetTime,
            other => return Err(WireError::UnknownCommand(other)),
        })
    }

    /// The wire byte for this command.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether this command asks the receiver to reply.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::SendSettingContract
                | Self::SendInputContract
                | Self::SendOutputContract
                | Self::SendSettings
                | Self::SendInputs
                | Self::SendOutputs
                | Self::SendStatus
        )
    }

    /// The command a well-behaved peer answers a request with.
    pub fn reply(self) -> Option<Command> {
        match self {
            Self::SendSettingContract => Some(Self::SetSettingContract),
            Self::SendInputContract => Some(Self::SetInputContract),
            Self::SendOutputContract => Some(Self::SetOutputContract),
            Self::SendSettings => Some(Self::SetSettings),
            Self::SendInputs => Some(Self::SetInputs),
            Self::SendOutputs => Some(Self::SetOutputs),
            Self::SendStatus => Some(Self::SetStatus),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Split a message into its command and body.
///
/// Returns `None` for an empty message.
pub fn split_command(message: &[u8]) -> Option<(Result<Command, WireError>, &[u8])> {
    let (&first, body) = message.split_first()?;
    Some((Command::from_byte(first), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes_are_wire_stable() {
        assert_eq!(Command::Unknown.as_byte(), 0);
        assert_eq!(Command::SendSettingContract.as_byte(), 1);
        assert_eq!(Command::SetSettingContract.as_byte(), 4);
        assert_eq!(Command::SendSettings.as_byte(), 7);
        assert_eq!(Command::SendStatus.as_byte(), 10);
        assert_eq!(Command::SetSettings.as_byte(), 11);
        assert_eq!(Command::SetTime.as_byte(), 15);
    }

    #[test]
    fn command_from_byte_covers_table() {
        for b in 0u8..=15 {
            assert_eq!(Command::from_byte(b).unwrap().as_byte(), b);
        }
        assert_eq!(Command::from_byte(16), Err(WireError::UnknownCommand(16)));
    }

    #[test]
    fn requests_map_to_replies() {
        assert_eq!(
            Command::SendOutputContract.reply(),
            Some(Command::SetOutputContract)
        );
        assert_eq!(Command::SendStatus.reply(), Some(Command::SetStatus));
        assert!(Command::SendInputs.is_request());
        assert!(!Command::SetTime.is_request());
        assert_eq!(Command::SetTime.reply(), None);
    }

    #[test]
    fn split_command_handles_empty() {
        assert!(split_command(&[]).is_none());
        let (cmd, body) = split_command(&[10, 1, 2]).unwrap();
        assert_eq!(cmd, Ok(Command::SendStatus));
        assert_eq!(body, &[1, 2]);
    }
}

//! Encapsulation commands and header status codes.

use crate::error::{EnipError, Result};

/// Encapsulation command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// No operation (TCP only)
    Nop = 0x0000,
    /// List services supported by the target
    ListServices = 0x0004,
    /// Discover identity (UDP broadcast)
    ListIdentity = 0x0063,
    /// List non-CIP interfaces
    ListInterfaces = 0x0064,
    /// Open a session
    RegisterSession = 0x0065,
    /// Close a session
    UnRegisterSession = 0x0066,
    /// Unconnected request/reply (explicit messaging)
    SendRRData = 0x006F,
    /// Connected explicit data
    SendUnitData = 0x0070,
    /// Indicate status
    IndicateStatus = 0x0072,
    /// Cancel
    Cancel = 0x0073,
}

impl Command {
    /// Parse a command from its wire value.
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0x0000 => Ok(Self::Nop),
            0x0004 => Ok(Self::ListServices),
            0x0063 => Ok(Self::ListIdentity),
            0x0064 => Ok(Self::ListInterfaces),
            0x0065 => Ok(Self::RegisterSession),
            0x0066 => Ok(Self::UnRegisterSession),
            0x006F => Ok(Self::SendRRData),
            0x0070 => Ok(Self::SendUnitData),
            0x0072 => Ok(Self::IndicateStatus),
            0x0073 => Ok(Self::Cancel),
            other => Err(EnipError::Codec(format!(
                "Unknown encapsulation command 0x{:04X}",
                other
            ))),
        }
    }

    /// Wire value of this command.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Nop => "NOP",
            Self::ListServices => "ListServices",
            Self::ListIdentity => "ListIdentity",
            Self::ListInterfaces => "ListInterfaces",
            Self::RegisterSession => "RegisterSession",
            Self::UnRegisterSession => "UnRegisterSession",
            Self::SendRRData => "SendRRData",
            Self::SendUnitData => "SendUnitData",
            Self::IndicateStatus => "IndicateStatus",
            Self::Cancel => "Cancel",
        };
        write!(f, "{}(0x{:04X})", name, self.as_u16())
    }
}

/// Encapsulation header status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncapStatus {
    /// Success
    Success,
    /// Invalid or unsupported command
    InvalidCommand,
    /// Insufficient memory in the receiver
    InsufficientMemory,
    /// Poorly formed or incorrect data
    IncorrectData,
    /// Invalid session handle
    InvalidSessionHandle,
    /// Invalid message length
    InvalidLength,
    /// Unsupported encapsulation protocol revision
    UnsupportedProtocol,
    /// Any other value
    Other(u32),
}

impl EncapStatus {
    /// Map a raw status word.
    pub const fn from_u32(value: u32) -> Self {
        match value {
            0x0000 => Self::Success,
            0x0001 => Self::InvalidCommand,
            0x0002 => Self::InsufficientMemory,
            0x0003 => Self::IncorrectData,
            0x0064 => Self::InvalidSessionHandle,
            0x0065 => Self::InvalidLength,
            0x0069 => Self::UnsupportedProtocol,
            other => Self::Other(other),
        }
    }

    /// Check for success.
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for EncapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "Success",
            Self::InvalidCommand => "Invalid or unsupported command",
            Self::InsufficientMemory => "Insufficient memory",
            Self::IncorrectData => "Incorrect data",
            Self::InvalidSessionHandle => "Invalid session handle",
            Self::InvalidLength => "Invalid length",
            Self::UnsupportedProtocol => "Unsupported protocol revision",
            Self::Other(_) => "Unknown status",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values() {
        assert_eq!(Command::RegisterSession.as_u16(), 0x65);
        assert_eq!(Command::SendRRData.as_u16(), 0x6F);
        assert_eq!(Command::from_u16(0x63).unwrap(), Command::ListIdentity);
        assert!(Command::from_u16(0x1234).is_err());
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::SendRRData.to_string(), "SendRRData(0x006F)");
    }

    #[test]
    fn test_encap_status() {
        assert!(EncapStatus::from_u32(0).is_success());
        assert_eq!(EncapStatus::from_u32(0x64), EncapStatus::InvalidSessionHandle);
        assert_eq!(EncapStatus::from_u32(0x99), EncapStatus::Other(0x99));
        assert_eq!(EncapStatus::from_u32(0x69).to_string(), "Unsupported protocol revision");
    }
}

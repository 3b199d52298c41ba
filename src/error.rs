//! Error types for EtherNet/IP operations.

use thiserror::Error;

use crate::types::{extended_status_description, general_status_description, EncapStatus};

/// Result type alias for EtherNet/IP operations.
pub type Result<T> = std::result::Result<T, EnipError>;

/// EtherNet/IP error types.
#[derive(Debug, Error)]
pub enum EnipError {
    /// TCP connect or stream failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Explicit or connection operation without a registered session
    #[error("Session not registered")]
    NotRegistered,

    /// Connect timeout expired
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// The device answered with a non-zero CIP general status
    #[error("{}", format_cip_service(.general_status, .extended_status))]
    CipService {
        /// General status code
        general_status: u8,
        /// First extended status word, if the device sent one
        extended_status: Option<u16>,
    },

    /// Connection size does not fit the Forward_Open size field
    #[error("Connection size {size} exceeds {max}")]
    ConnectionSize {
        /// Data length plus real-time header
        size: usize,
        /// Largest size the request can carry
        max: usize,
    },

    /// Non-zero status in the encapsulation header
    #[error("Encapsulation status: 0x{0:08X} ({status})", status = EncapStatus::from_u32(*.0))]
    EncapsulationStatus(u32),

    /// Response too short or inconsistent
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),
}

fn format_cip_service(general_status: &u8, extended_status: &Option<u16>) -> String {
    let general_status = *general_status;
    let mut msg = format!(
        "CIP service error: general status 0x{:02X} ({})",
        general_status,
        general_status_description(general_status)
    );
    if let Some(ext) = *extended_status {
        msg.push_str(&format!(", extended status 0x{:04X}", ext));
        if general_status == 0x01 {
            if let Some(reason) = extended_status_description(ext) {
                msg.push_str(&format!(" ({})", reason));
            }
        }
    }
    msg
}

impl EnipError {
    /// Create a malformed response error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotRegistered | Self::ConnectionTimeout | Self::Io(_)
        )
    }

    /// General and extended status, when the device rejected a service.
    pub fn cip_status(&self) -> Option<(u8, Option<u16>)> {
        match self {
            Self::CipService {
                general_status,
                extended_status,
            } => Some((*general_status, *extended_status)),
            _ => None,
        }
    }

    /// Decoded Connection Manager reason for a rejected service.
    pub fn extended_reason(&self) -> Option<&'static str> {
        match self {
            Self::CipService {
                general_status: 0x01,
                extended_status: Some(ext),
            } => extended_status_description(*ext),
            _ => None,
        }
    }
}

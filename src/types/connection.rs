//! Class-1 connection parameters.

use crate::error::{EnipError, Result};

/// Largest pure data length of one direction.
pub const MAX_IO_LENGTH: u16 = 505;

/// Largest connection size of the 9-bit Forward_Open size field.
pub const MAX_CONNECTION_SIZE: u16 = 0x01FF;

/// Default requested packet interval (500 ms) in microseconds.
pub const DEFAULT_RPI_US: u32 = 500_000;

/// Connection type of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionType {
    /// Direction not used
    Null = 0,
    /// Multicast
    Multicast = 1,
    /// Point-to-point
    #[default]
    PointToPoint = 2,
}

/// Connection priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Priority {
    /// Low priority
    Low = 0,
    /// High priority
    High = 1,
    /// Scheduled
    #[default]
    Scheduled = 2,
    /// Urgent
    Urgent = 3,
}

/// Real-time data format of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RealTimeFormat {
    /// Sequence count + data, no run/idle header
    #[default]
    Modeless = 0,
    /// Sequence count + data
    ZeroLength = 1,
    /// No sequence count, no data
    Heartbeat = 2,
    /// Sequence count + 32-bit run/idle header + data
    Header32Bit = 3,
}

impl RealTimeFormat {
    /// Bytes preceding the pure data inside the connected data item.
    #[inline]
    pub const fn header_len(self) -> usize {
        match self {
            Self::Header32Bit => 6,
            Self::Heartbeat => 0,
            Self::Modeless | Self::ZeroLength => 2,
        }
    }

    /// Whether a 2-byte data sequence count is sent.
    #[inline]
    pub const fn has_sequence_count(self) -> bool {
        !matches!(self, Self::Heartbeat)
    }
}

/// Parameters of one connection direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Pure data length in bytes (without sequence count or run/idle header)
    pub length: u16,
    /// Variable (true) or fixed (false) size
    pub variable_length: bool,
    /// Whether multiple owners may connect
    pub owner_redundant: bool,
    /// Connection type
    pub connection_type: ConnectionType,
    /// Priority
    pub priority: Priority,
    /// Real-time format
    pub real_time_format: RealTimeFormat,
    /// Requested packet interval in microseconds
    pub requested_packet_rate_us: u32,
    /// Assembly instance (connection point) of this direction
    pub instance_id: u16,
}

impl ConnectionParams {
    /// Defaults for the originator to target direction.
    pub fn o_t_default() -> Self {
        Self {
            length: MAX_IO_LENGTH,
            variable_length: true,
            owner_redundant: true,
            connection_type: ConnectionType::PointToPoint,
            priority: Priority::Scheduled,
            real_time_format: RealTimeFormat::Header32Bit,
            requested_packet_rate_us: DEFAULT_RPI_US,
            instance_id: 0x64,
        }
    }

    /// Defaults for the target to originator direction.
    pub fn t_o_default() -> Self {
        Self {
            length: MAX_IO_LENGTH,
            variable_length: true,
            owner_redundant: true,
            connection_type: ConnectionType::Multicast,
            priority: Priority::Scheduled,
            real_time_format: RealTimeFormat::Modeless,
            requested_packet_rate_us: DEFAULT_RPI_US,
            instance_id: 0x65,
        }
    }

    /// Connection size as negotiated: data length plus real-time header.
    ///
    /// None if the sum does not fit in 16 bits.
    #[inline]
    pub fn connection_size(&self) -> Option<u16> {
        self.length
            .checked_add(self.real_time_format.header_len() as u16)
    }

    /// Connection size, checked against the size field of the Forward_Open
    /// variant (`large` selects Large_Forward_Open).
    pub fn checked_connection_size(&self, large: bool) -> Result<u16> {
        let max = if large { u16::MAX } else { MAX_CONNECTION_SIZE };
        match self.connection_size() {
            Some(size) if size <= max => Ok(size),
            _ => Err(EnipError::ConnectionSize {
                size: self.length as usize + self.real_time_format.header_len(),
                max: max as usize,
            }),
        }
    }

    /// Whether this direction is in use.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.connection_type != ConnectionType::Null
    }

    /// 16-bit network connection parameters (Forward_Open).
    ///
    /// ```text
    /// bit 15    redundant owner
    /// bit 13-14 connection type
    /// bit 10-11 priority
    /// bit 9     variable length
    /// bit 0-8   connection size
    /// ```
    pub fn network_parameters(&self) -> u16 {
        (self.connection_size().unwrap_or(u16::MAX) & MAX_CONNECTION_SIZE)
            | ((self.variable_length as u16) << 9)
            | (((self.priority as u16) & 0x03) << 10)
            | (((self.connection_type as u16) & 0x03) << 13)
            | ((self.owner_redundant as u16) << 15)
    }

    /// 32-bit network connection parameters (Large_Forward_Open).
    ///
    /// Same fields as the 16-bit form shifted up by 16, with a 16-bit size.
    pub fn large_network_parameters(&self) -> u32 {
        (self.connection_size().unwrap_or(u16::MAX) as u32)
            | ((self.variable_length as u32) << 25)
            | (((self.priority as u32) & 0x03) << 26)
            | (((self.connection_type as u32) & 0x03) << 29)
            | ((self.owner_redundant as u32) << 31)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::o_t_default()
    }
}

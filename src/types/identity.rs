//! CIP identity item carried in ListIdentity replies.

use crate::error::{EnipError, Result};
use crate::types::{CommonPacketFormat, SocketAddress, ITEM_CIP_IDENTITY, SOCKADDR_LEN};

/// A device descriptor from a ListIdentity reply.
///
/// Equality and hashing cover every field, so a `HashSet` of items
/// deduplicates devices that answer more than one broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CipIdentityItem {
    /// Encapsulation protocol version
    pub encapsulation_version: u16,
    /// Socket address the device listens on
    pub socket_address: SocketAddress,
    /// Vendor ID
    pub vendor_id: u16,
    /// Device type
    pub device_type: u16,
    /// Product code
    pub product_code: u16,
    /// Revision (major, minor)
    pub revision: (u8, u8),
    /// Identity status word
    pub status: u16,
    /// Serial number
    pub serial_number: u32,
    /// Product name
    pub product_name: String,
    /// Identity state
    pub state: u8,
}

impl CipIdentityItem {
    /// Parse the data of a single identity item (type 0x0C).
    pub fn parse_item(data: &[u8]) -> Result<Self> {
        // version(2) + sockaddr(16) + vendor..serial(14) + name length(1)
        const FIXED: usize = 2 + SOCKADDR_LEN + 14 + 1;
        if data.len() < FIXED {
            return Err(EnipError::malformed(format!(
                "Identity item needs at least {} bytes, got {}",
                FIXED,
                data.len()
            )));
        }

        let u16_at = |pos: usize| u16::from_le_bytes([data[pos], data[pos + 1]]);
        let name_len = data[FIXED - 1] as usize;
        if data.len() < FIXED + name_len {
            return Err(EnipError::malformed("Identity product name truncated"));
        }
        let product_name = String::from_utf8_lossy(&data[FIXED..FIXED + name_len]).into_owned();

        Ok(Self {
            encapsulation_version: u16_at(0),
            socket_address: SocketAddress::decode(data, 2)?,
            vendor_id: u16_at(18),
            device_type: u16_at(20),
            product_code: u16_at(22),
            revision: (data[24], data[25]),
            status: u16_at(26),
            serial_number: u32::from_le_bytes([data[28], data[29], data[30], data[31]]),
            product_name,
            state: data.get(FIXED + name_len).copied().unwrap_or(0xFF),
        })
    }

    /// Parse every identity item in the command data of a ListIdentity reply.
    pub fn parse_reply(command_data: &[u8]) -> Result<Vec<Self>> {
        let cpf = CommonPacketFormat::parse(command_data)?;
        cpf.items
            .iter()
            .filter(|item| item.type_id == ITEM_CIP_IDENTITY)
            .map(|item| Self::parse_item(&item.data))
            .collect()
    }
}

//! Common Packet Format (CPF) items.
//!
//! ```text
//! +------------+-----------+-----------+-----------+-----------+------
//! | Item count | Type ID   | Length    | Item data | Type ID   | ...
//! | (2 bytes)  | (2 bytes) | (2 bytes) | (Length)  |           |
//! +------------+-----------+-----------+-----------+-----------+------
//! ```

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{EnipError, Result};

/// Null address item (unconnected messages).
pub const ITEM_NULL_ADDRESS: u16 = 0x0000;
/// CIP identity item (ListIdentity reply).
pub const ITEM_CIP_IDENTITY: u16 = 0x000C;
/// Connected data item (implicit I/O).
pub const ITEM_CONNECTED_DATA: u16 = 0x00B1;
/// Unconnected data item (explicit messaging).
pub const ITEM_UNCONNECTED_DATA: u16 = 0x00B2;
/// Socket address info item, originator to target.
pub const ITEM_SOCKADDR_O_T: u16 = 0x8000;
/// Socket address info item, target to originator.
pub const ITEM_SOCKADDR_T_O: u16 = 0x8001;
/// Sequenced address item (implicit I/O).
pub const ITEM_SEQUENCED_ADDRESS: u16 = 0x8002;

/// Encoded length of a socket address.
pub const SOCKADDR_LEN: usize = 16;

/// Address family for IPv4 (`AF_INET`).
pub const AF_INET: u16 = 2;

/// Socket address carried in a sockaddr info item.
///
/// Unlike the rest of the protocol, every field is big-endian (network byte
/// order). The address is held as an [`Ipv4Addr`] so that the wire bytes map
/// to octets in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddress {
    /// Address family (2 = AF_INET)
    pub family: u16,
    /// UDP or TCP port
    pub port: u16,
    /// IPv4 address
    pub address: Ipv4Addr,
}

impl SocketAddress {
    /// Create an AF_INET socket address.
    pub const fn new(port: u16, address: Ipv4Addr) -> Self {
        Self {
            family: AF_INET,
            port,
            address,
        }
    }

    /// Encode the 16-byte sockaddr structure.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        dst.put_u16(self.family);
        dst.put_u16(self.port);
        dst.put_slice(&self.address.octets());
        dst.put_bytes(0, 8);
    }

    /// Decode a sockaddr structure starting at `offset`.
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        let end = offset
            .checked_add(SOCKADDR_LEN)
            .ok_or_else(|| EnipError::malformed("Socket address offset overflow"))?;
        if data.len() < end {
            return Err(EnipError::malformed("Socket address truncated"));
        }
        let raw = &data[offset..end];
        Ok(Self {
            family: u16::from_be_bytes([raw[0], raw[1]]),
            port: u16::from_be_bytes([raw[2], raw[3]]),
            address: Ipv4Addr::new(raw[4], raw[5], raw[6], raw[7]),
        })
    }
}

/// A single CPF item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfItem {
    /// Item type ID
    pub type_id: u16,
    /// Item data
    pub data: Bytes,
}

impl CpfItem {
    /// Create an item from its type and data.
    pub fn new(type_id: u16, data: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            data: data.into(),
        }
    }

    /// Null address item.
    pub fn null_address() -> Self {
        Self::new(ITEM_NULL_ADDRESS, Bytes::new())
    }

    /// Unconnected data item.
    pub fn unconnected_data(data: impl Into<Bytes>) -> Self {
        Self::new(ITEM_UNCONNECTED_DATA, data)
    }

    /// Sockaddr info item (`ITEM_SOCKADDR_O_T` or `ITEM_SOCKADDR_T_O`).
    pub fn socket_address(type_id: u16, addr: &SocketAddress) -> Self {
        let mut buf = BytesMut::with_capacity(SOCKADDR_LEN);
        addr.encode_to(&mut buf);
        Self::new(type_id, buf.freeze())
    }

    /// Check for a sockaddr info item.
    #[inline]
    pub fn is_socket_address(&self) -> bool {
        matches!(self.type_id, ITEM_SOCKADDR_O_T | ITEM_SOCKADDR_T_O)
    }

    /// Interpret this item as a sockaddr info item.
    pub fn as_socket_address(&self) -> Result<SocketAddress> {
        if !self.is_socket_address() {
            return Err(EnipError::malformed(format!(
                "Item 0x{:04X} is not a socket address item",
                self.type_id
            )));
        }
        SocketAddress::decode(&self.data, 0)
    }

    /// Encoded length (4-byte item header + data).
    #[inline]
    pub fn encoded_len(&self) -> usize {
        4 + self.data.len()
    }

    /// Encode this item into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.type_id);
        dst.put_u16_le(self.data.len() as u16);
        dst.put_slice(&self.data);
    }
}

/// An ordered list of CPF items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonPacketFormat {
    /// Items in wire order
    pub items: Vec<CpfItem>,
}

impl CommonPacketFormat {
    /// Create an empty item list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Null address + unconnected data, the shape of every UCMM request.
    pub fn unconnected(data: impl Into<Bytes>) -> Self {
        Self {
            items: vec![CpfItem::null_address(), CpfItem::unconnected_data(data)],
        }
    }

    /// Append an item.
    pub fn push(&mut self, item: CpfItem) {
        self.items.push(item);
    }

    /// Encoded length including the item count.
    pub fn encoded_len(&self) -> usize {
        2 + self.items.iter().map(CpfItem::encoded_len).sum::<usize>()
    }

    /// Encode into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u16_le(self.items.len() as u16);
        for item in &self.items {
            item.encode_to(dst);
        }
    }

    /// Encode into a new buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Parse an item list, walking each item by its declared length.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(EnipError::malformed("CPF item count missing"));
        }
        let count = u16::from_le_bytes([data[0], data[1]]) as usize;
        // Each item needs at least its 4-byte header
        let mut items = Vec::with_capacity(count.min((data.len() - 2) / 4));
        let mut pos = 2;

        for index in 0..count {
            if data.len() < pos + 4 {
                return Err(EnipError::malformed(format!(
                    "CPF item {} header truncated",
                    index
                )));
            }
            let type_id = u16::from_le_bytes([data[pos], data[pos + 1]]);
            let len = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 4;
            if data.len() < pos + len {
                return Err(EnipError::malformed(format!(
                    "CPF item {} (type 0x{:04X}) declares {} bytes, {} available",
                    index,
                    type_id,
                    len,
                    data.len() - pos
                )));
            }
            items.push(CpfItem::new(
                type_id,
                Bytes::copy_from_slice(&data[pos..pos + len]),
            ));
            pos += len;
        }

        Ok(Self { items })
    }

    /// First item of the given type.
    pub fn find(&self, type_id: u16) -> Option<&CpfItem> {
        self.items.iter().find(|item| item.type_id == type_id)
    }
}

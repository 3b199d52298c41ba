//! CIP services and Message Router request/response framing.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{EnipError, Result};
use crate::types::EPath;

/// CIP service codes used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CipService {
    /// Get_Attributes_All
    GetAttributesAll = 0x01,
    /// Set_Attributes_All
    SetAttributesAll = 0x02,
    /// Get_Attribute_List
    GetAttributeList = 0x03,
    /// Set_Attribute_List
    SetAttributeList = 0x04,
    /// Reset
    Reset = 0x05,
    /// Start
    Start = 0x06,
    /// Stop
    Stop = 0x07,
    /// Create
    Create = 0x08,
    /// Delete
    Delete = 0x09,
    /// Multiple_Service_Packet
    MultipleServicePacket = 0x0A,
    /// Apply_Attributes
    ApplyAttributes = 0x0D,
    /// Get_Attribute_Single
    GetAttributeSingle = 0x0E,
    /// Set_Attribute_Single
    SetAttributeSingle = 0x10,
    /// Find_Next_Object_Instance
    FindNextObjectInstance = 0x11,
    /// Restore
    Restore = 0x15,
    /// Save
    Save = 0x16,
    /// No operation
    Nop = 0x17,
    /// Get_Member
    GetMember = 0x18,
    /// Set_Member
    SetMember = 0x19,
    /// Insert_Member
    InsertMember = 0x1A,
    /// Remove_Member
    RemoveMember = 0x1B,
    /// GroupSync
    GroupSync = 0x1C,
    /// Connection Manager: Forward_Close
    ForwardClose = 0x4E,
    /// Connection Manager: Forward_Open
    ForwardOpen = 0x54,
    /// Connection Manager: Large_Forward_Open
    LargeForwardOpen = 0x5B,
}

impl CipService {
    /// Wire value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Reply service code (request code with the reply bit set).
    #[inline]
    pub const fn reply_code(self) -> u8 {
        self.as_u8() | 0x80
    }
}

/// An explicit request addressed to the Message Router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterRequest {
    /// Service code
    pub service: u8,
    /// Encoded request path
    pub path: Bytes,
    /// Service-specific request data
    pub data: Bytes,
}

impl MessageRouterRequest {
    /// Create a request for a class/instance/attribute path.
    pub fn new(service: CipService, path: EPath, data: impl Into<Bytes>) -> Self {
        Self::with_raw_path(service.as_u8(), path.encode().freeze(), data)
    }

    /// Create a request from an already encoded path.
    ///
    /// The path must have even length.
    pub fn with_raw_path(service: u8, path: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            service,
            path: path.into(),
            data: data.into(),
        }
    }

    /// Encoded length.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        2 + self.path.len() + self.data.len()
    }

    /// Encode as: service, path word count, path, data.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.service);
        buf.put_u8((self.path.len() / 2) as u8);
        buf.put_slice(&self.path);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// A Message Router reply.
///
/// ```text
/// +---------+----------+---------+----------+----------------+------
/// | Service | Reserved | General | Ext size | Ext status     | Data
/// | | 0x80  |          | status  | (words)  | (2*size bytes) |
/// +---------+----------+---------+----------+----------------+------
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterResponse {
    /// Reply service code
    pub service: u8,
    /// General status
    pub general_status: u8,
    /// Additional (extended) status words
    pub extended_status: Vec<u16>,
    /// Response data
    pub data: Bytes,
}

impl MessageRouterResponse {
    /// Parse a reply from the unconnected data item.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(EnipError::malformed(format!(
                "Message router reply needs 4 bytes, got {}",
                data.len()
            )));
        }
        let service = data[0];
        let general_status = data[2];
        let ext_words = data[3] as usize;
        let data_start = 4 + ext_words * 2;

        if data.len() < data_start {
            return Err(EnipError::malformed(format!(
                "Reply declares {} extended status words, only {} bytes present",
                ext_words,
                data.len()
            )));
        }

        let extended_status = data[4..data_start]
            .chunks_exact(2)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .collect();

        Ok(Self {
            service,
            general_status,
            extended_status,
            data: Bytes::copy_from_slice(&data[data_start..]),
        })
    }

    /// Check for a successful reply.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.general_status == 0
    }

    /// Convert a failed reply into [`EnipError::CipService`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(EnipError::CipService {
                general_status: self.general_status,
                extended_status: self.extended_status.first().copied(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encoding() {
        let req = MessageRouterRequest::new(
            CipService::SetAttributeSingle,
            EPath::new(0x04, 0x66, 0x03),
            vec![0x01],
        );
        assert_eq!(
            &req.encode()[..],
            &[0x10, 0x03, 0x20, 0x04, 0x24, 0x66, 0x30, 0x03, 0x01]
        );
        assert_eq!(req.encoded_len(), 9);
    }

    #[test]
    fn test_parse_success_reply() {
        let reply = MessageRouterResponse::parse(&[0x8E, 0x00, 0x00, 0x00, 0x0A, 0x00]).unwrap();
        assert_eq!(reply.service, CipService::GetAttributeSingle.reply_code());
        assert!(reply.is_success());
        assert!(reply.extended_status.is_empty());
        assert_eq!(&reply.data[..], &[0x0A, 0x00]);
    }

    #[test]
    fn test_parse_extended_status() {
        let reply =
            MessageRouterResponse::parse(&[0xD4, 0x00, 0x01, 0x01, 0x00, 0x01, 0xFF]).unwrap();
        assert_eq!(reply.extended_status, vec![0x0100]);
        assert_eq!(&reply.data[..], &[0xFF]);

        match reply.into_result() {
            Err(EnipError::CipService {
                general_status,
                extended_status,
            }) => {
                assert_eq!(general_status, 0x01);
                assert_eq!(extended_status, Some(0x0100));
            }
            other => panic!("Expected CipService error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_short_reply() {
        assert!(MessageRouterResponse::parse(&[0x8E, 0x00]).is_err());
        // Two extended words declared, one present
        assert!(MessageRouterResponse::parse(&[0xD4, 0x00, 0x01, 0x02, 0x00, 0x01]).is_err());
    }
}

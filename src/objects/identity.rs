//! Identity object (class 0x01).

use crate::client::EipClient;
use crate::error::{EnipError, Result};
use crate::objects::{to_uint, to_ushort};

const CLASS: u16 = 0x01;
const INSTANCE: u16 = 1;

/// Identity state (attribute 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// Nonexistent
    Nonexistent,
    /// Device self testing
    SelfTesting,
    /// Standby
    Standby,
    /// Operational
    Operational,
    /// Major recoverable fault
    MajorRecoverableFault,
    /// Major unrecoverable fault
    MajorUnrecoverableFault,
    /// Default value of Get_Attributes_All
    Default,
    /// Reserved value
    Reserved(u8),
}

impl From<u8> for IdentityState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Nonexistent,
            1 => Self::SelfTesting,
            2 => Self::Standby,
            3 => Self::Operational,
            4 => Self::MajorRecoverableFault,
            5 => Self::MajorUnrecoverableFault,
            255 => Self::Default,
            other => Self::Reserved(other),
        }
    }
}

/// Class attributes from Get_Attributes_All on instance 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassAttributes {
    /// Class revision
    pub revision: u16,
    /// Highest instance number
    pub max_instance: u16,
    /// Highest class attribute ID
    pub max_class_attribute: u16,
    /// Highest instance attribute ID
    pub max_instance_attribute: u16,
}

impl ClassAttributes {
    /// Parse a Get_Attributes_All reply.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(EnipError::malformed("Identity class attributes need 8 bytes"));
        }
        Ok(Self {
            revision: to_ushort(&data[0..])?,
            max_instance: to_ushort(&data[2..])?,
            max_class_attribute: to_ushort(&data[4..])?,
            max_instance_attribute: to_ushort(&data[6..])?,
        })
    }
}

/// Instance attributes from Get_Attributes_All on instance 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAttributes {
    /// Vendor ID
    pub vendor_id: u16,
    /// Device type
    pub device_type: u16,
    /// Product code
    pub product_code: u16,
    /// Revision (major, minor)
    pub revision: (u8, u8),
    /// Status word
    pub status: u16,
    /// Serial number
    pub serial_number: u32,
    /// Product name
    pub product_name: String,
}

impl InstanceAttributes {
    /// Parse a Get_Attributes_All reply.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 15 {
            return Err(EnipError::malformed(format!(
                "Identity instance attributes need 15 bytes, got {}",
                data.len()
            )));
        }
        let name_len = data[14] as usize;
        let name = data
            .get(15..15 + name_len)
            .ok_or_else(|| EnipError::malformed("Identity product name truncated"))?;
        Ok(Self {
            vendor_id: to_ushort(&data[0..])?,
            device_type: to_ushort(&data[2..])?,
            product_code: to_ushort(&data[4..])?,
            revision: (data[6], data[7]),
            status: to_ushort(&data[8..])?,
            serial_number: to_uint(&data[10..])?,
            product_name: String::from_utf8_lossy(name).into_owned(),
        })
    }
}

/// Decode a SHORT_STRING, tolerating devices that omit the length byte.
fn short_string(data: &[u8]) -> String {
    let body = match data.split_first() {
        Some((&len, rest)) if len as usize == rest.len() => rest,
        _ => data,
    };
    String::from_utf8_lossy(body).into_owned()
}

/// Identity object accessor.
pub struct IdentityObject<'a> {
    client: &'a mut EipClient,
}

impl<'a> IdentityObject<'a> {
    /// Wrap a client.
    pub fn new(client: &'a mut EipClient) -> Self {
        Self { client }
    }

    async fn attribute(&mut self, attribute: u16) -> Result<bytes::Bytes> {
        self.client.get_attribute_single(CLASS, INSTANCE, attribute).await
    }

    /// Vendor ID (attribute 1).
    pub async fn vendor_id(&mut self) -> Result<u16> {
        to_ushort(&self.attribute(1).await?)
    }

    /// Device type (attribute 2).
    pub async fn device_type(&mut self) -> Result<u16> {
        to_ushort(&self.attribute(2).await?)
    }

    /// Product code (attribute 3).
    pub async fn product_code(&mut self) -> Result<u16> {
        to_ushort(&self.attribute(3).await?)
    }

    /// Revision (attribute 4).
    pub async fn revision(&mut self) -> Result<(u8, u8)> {
        let data = self.attribute(4).await?;
        match data.get(..2) {
            Some(&[major, minor]) => Ok((major, minor)),
            _ => Err(EnipError::malformed("Revision needs 2 bytes")),
        }
    }

    /// Status word (attribute 5).
    pub async fn status(&mut self) -> Result<u16> {
        to_ushort(&self.attribute(5).await?)
    }

    /// Serial number (attribute 6).
    pub async fn serial_number(&mut self) -> Result<u32> {
        to_uint(&self.attribute(6).await?)
    }

    /// Product name (attribute 7).
    pub async fn product_name(&mut self) -> Result<String> {
        Ok(short_string(&self.attribute(7).await?))
    }

    /// State (attribute 8).
    pub async fn state(&mut self) -> Result<IdentityState> {
        let data = self.attribute(8).await?;
        data.first()
            .map(|&b| IdentityState::from(b))
            .ok_or_else(|| EnipError::malformed("State needs 1 byte"))
    }

    /// Configuration consistency value (attribute 9).
    pub async fn configuration_consistency_value(&mut self) -> Result<u16> {
        to_ushort(&self.attribute(9).await?)
    }

    /// Heartbeat interval in seconds (attribute 10).
    pub async fn heartbeat_interval(&mut self) -> Result<u8> {
        let data = self.attribute(10).await?;
        data.first()
            .copied()
            .ok_or_else(|| EnipError::malformed("Heartbeat interval needs 1 byte"))
    }

    /// Supported language codes, three characters each (attribute 12).
    pub async fn supported_languages(&mut self) -> Result<Vec<String>> {
        let data = self.attribute(12).await?;
        Ok(data
            .chunks_exact(3)
            .map(|code| String::from_utf8_lossy(code).into_owned())
            .collect())
    }

    /// All instance attributes.
    pub async fn instance_attributes(&mut self) -> Result<InstanceAttributes> {
        let data = self.client.get_attribute_all(CLASS, INSTANCE).await?;
        InstanceAttributes::parse(&data)
    }

    /// All class attributes.
    pub async fn class_attributes(&mut self) -> Result<ClassAttributes> {
        let data = self.client.get_attribute_all(CLASS, 0).await?;
        ClassAttributes::parse(&data)
    }
}

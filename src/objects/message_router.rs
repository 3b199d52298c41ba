//! Message Router object (class 0x02).

use crate::client::EipClient;
use crate::error::{EnipError, Result};
use crate::objects::{to_ushort, to_ushort_vec};

const CLASS: u16 = 0x02;
const INSTANCE: u16 = 1;

/// Classes implemented by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectList {
    /// Class IDs
    pub classes: Vec<u16>,
}

impl ObjectList {
    /// Parse a count-prefixed UINT array.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let count = to_ushort(data)? as usize;
        let body = &data[2..];
        if body.len() < count * 2 {
            return Err(EnipError::malformed(format!(
                "Object list declares {} classes, {} bytes present",
                count,
                body.len()
            )));
        }
        Ok(Self {
            classes: to_ushort_vec(&body[..count * 2]),
        })
    }
}

/// Message Router object accessor.
pub struct MessageRouterObject<'a> {
    client: &'a mut EipClient,
}

impl<'a> MessageRouterObject<'a> {
    /// Wrap a client.
    pub fn new(client: &'a mut EipClient) -> Self {
        Self { client }
    }

    /// Object list (attribute 1).
    pub async fn object_list(&mut self) -> Result<ObjectList> {
        let data = self.client.get_attribute_single(CLASS, INSTANCE, 1).await?;
        ObjectList::parse(&data)
    }

    /// Maximum number of supported connections (attribute 2).
    pub async fn number_available(&mut self) -> Result<u16> {
        let data = self.client.get_attribute_single(CLASS, INSTANCE, 2).await?;
        to_ushort(&data)
    }

    /// Number of connections in use (attribute 3).
    pub async fn number_active(&mut self) -> Result<u16> {
        let data = self.client.get_attribute_single(CLASS, INSTANCE, 3).await?;
        to_ushort(&data)
    }

    /// Connection IDs of the active connections (attribute 4).
    pub async fn active_connections(&mut self) -> Result<Vec<u16>> {
        let data = self.client.get_attribute_single(CLASS, INSTANCE, 4).await?;
        Ok(to_ushort_vec(&data))
    }
}

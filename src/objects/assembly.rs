//! Assembly object (class 0x04).

use bytes::Bytes;

use crate::client::{EipClient, ASSEMBLY_CLASS, ASSEMBLY_DATA_ATTRIBUTE};
use crate::error::Result;

/// Assembly object accessor.
pub struct AssemblyObject<'a> {
    client: &'a mut EipClient,
}

impl<'a> AssemblyObject<'a> {
    /// Wrap a client.
    pub fn new(client: &'a mut EipClient) -> Self {
        Self { client }
    }

    /// Read the data of an assembly instance.
    pub async fn instance_data(&mut self, instance: u16) -> Result<Bytes> {
        self.client
            .get_attribute_single(ASSEMBLY_CLASS, instance, ASSEMBLY_DATA_ATTRIBUTE)
            .await
    }

    /// Write the data of an assembly instance.
    pub async fn set_instance_data(&mut self, instance: u16, data: impl Into<Bytes>) -> Result<()> {
        self.client
            .set_attribute_single(ASSEMBLY_CLASS, instance, ASSEMBLY_DATA_ATTRIBUTE, data)
            .await?;
        Ok(())
    }
}

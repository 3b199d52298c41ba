//! TCP/IP Interface object (class 0xF5).

use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use crate::client::EipClient;
use crate::error::{EnipError, Result};
use crate::objects::{to_bool, to_ushort};

const CLASS: u16 = 0xF5;
const INSTANCE: u16 = 1;

/// Length of the interface configuration attribute.
pub const INTERFACE_CONFIGURATION_LEN: usize = 68;

/// Longest domain name that fits the interface configuration.
pub const MAX_DOMAIN_NAME_LEN: usize = INTERFACE_CONFIGURATION_LEN - 20;

/// Interface status (attribute 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceStatus {
    /// No configuration yet
    pub not_configured: bool,
    /// Configuration obtained from BOOTP, DHCP or storage
    pub valid_configuration: bool,
    /// Configuration set manually
    pub valid_manual_configuration: bool,
    /// Multicast configuration change pending
    pub mcast_pending: bool,
}

impl InterfaceStatus {
    /// Parse the status DWORD.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let first = *data
            .first()
            .ok_or_else(|| EnipError::malformed("Interface status empty"))?;
        let method = first & 0x0F;
        Ok(Self {
            not_configured: method == 0,
            valid_configuration: method == 1,
            valid_manual_configuration: method == 2,
            mcast_pending: first & 0x10 != 0,
        })
    }
}

/// Configuration capability (attribute 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceCapability {
    /// BOOTP client
    pub bootp_client: bool,
    /// DNS client
    pub dns_client: bool,
    /// DHCP client
    pub dhcp_client: bool,
    /// DHCP-DNS update
    pub dhcp_dns_update: bool,
    /// Interface configuration settable
    pub configuration_settable: bool,
}

impl InterfaceCapability {
    /// Parse the capability DWORD.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            bootp_client: to_bool(data, 0)?,
            dns_client: to_bool(data, 1)?,
            dhcp_client: to_bool(data, 2)?,
            dhcp_dns_update: to_bool(data, 3)?,
            configuration_settable: to_bool(data, 4)?,
        })
    }
}

/// Configuration control (attribute 3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceControl {
    /// Obtain configuration via BOOTP
    pub enable_bootp: bool,
    /// Obtain configuration via DHCP (takes precedence over BOOTP)
    pub enable_dhcp: bool,
    /// Resolve host names via DNS
    pub enable_dns: bool,
}

impl InterfaceControl {
    /// Encode the control DWORD.
    pub fn encode(&self) -> [u8; 4] {
        let mut method = if self.enable_dhcp {
            0x02
        } else if self.enable_bootp {
            0x01
        } else {
            0x00
        };
        if self.enable_dns {
            method |= 0x10;
        }
        [method, 0, 0, 0]
    }
}

/// Path to the physical link object (attribute 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalLink {
    /// Path size in words
    pub path_size: u16,
    /// Encoded path
    pub path: Vec<u8>,
}

impl PhysicalLink {
    /// Parse the path size and padded EPATH.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            path_size: to_ushort(data)?,
            path: data[2..].to_vec(),
        })
    }
}

/// Interface configuration (attribute 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfiguration {
    /// IP address
    pub ip_address: Ipv4Addr,
    /// Network mask
    pub network_mask: Ipv4Addr,
    /// Default gateway
    pub gateway_address: Ipv4Addr,
    /// Primary name server
    pub name_server: Ipv4Addr,
    /// Secondary name server
    pub name_server_2: Ipv4Addr,
    /// Default domain name
    pub domain_name: String,
}

impl InterfaceConfiguration {
    /// Encode the fixed 68-byte layout: five addresses as little-endian
    /// UDINTs, then the ASCII domain name zero-padded.
    pub fn encode(&self) -> Result<BytesMut> {
        let name = self.domain_name.as_bytes();
        if name.len() > MAX_DOMAIN_NAME_LEN {
            return Err(EnipError::invalid_state(format!(
                "Domain name longer than {} bytes",
                MAX_DOMAIN_NAME_LEN
            )));
        }
        let mut buf = BytesMut::with_capacity(INTERFACE_CONFIGURATION_LEN);
        for addr in [
            self.ip_address,
            self.network_mask,
            self.gateway_address,
            self.name_server,
            self.name_server_2,
        ] {
            buf.put_u32_le(u32::from(addr));
        }
        buf.put_slice(name);
        buf.put_bytes(0, INTERFACE_CONFIGURATION_LEN - buf.len());
        Ok(buf)
    }
}

/// TCP/IP Interface object accessor.
pub struct TcpIpInterfaceObject<'a> {
    client: &'a mut EipClient,
}

impl<'a> TcpIpInterfaceObject<'a> {
    /// Wrap a client.
    pub fn new(client: &'a mut EipClient) -> Self {
        Self { client }
    }

    /// Interface status.
    pub async fn status(&mut self) -> Result<InterfaceStatus> {
        let data = self.client.get_attribute_single(CLASS, INSTANCE, 1).await?;
        InterfaceStatus::parse(&data)
    }

    /// Configuration capability.
    pub async fn configuration_capability(&mut self) -> Result<InterfaceCapability> {
        let data = self.client.get_attribute_single(CLASS, INSTANCE, 2).await?;
        InterfaceCapability::parse(&data)
    }

    /// Write the configuration control.
    pub async fn set_configuration_control(&mut self, control: InterfaceControl) -> Result<()> {
        self.client
            .set_attribute_single(CLASS, INSTANCE, 3, control.encode().to_vec())
            .await?;
        Ok(())
    }

    /// Physical link object path.
    pub async fn physical_link(&mut self) -> Result<PhysicalLink> {
        let data = self.client.get_attribute_single(CLASS, INSTANCE, 4).await?;
        PhysicalLink::parse(&data)
    }

    /// Write the interface configuration.
    pub async fn set_interface_configuration(
        &mut self,
        config: &InterfaceConfiguration,
    ) -> Result<()> {
        let data = config.encode()?;
        self.client
            .set_attribute_single(CLASS, INSTANCE, 5, data.freeze())
            .await?;
        Ok(())
    }
}

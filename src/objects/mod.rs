//! Typed accessors for common CIP objects.
//!
//! Each wrapper borrows the client and maps its methods onto
//! Get_Attribute_Single / Get_Attributes_All / Set_Attribute_Single with a
//! fixed class and attribute table.

mod assembly;
mod identity;
mod message_router;
mod tcpip;

pub use assembly::AssemblyObject;
pub use identity::{ClassAttributes, IdentityObject, IdentityState, InstanceAttributes};
pub use message_router::{MessageRouterObject, ObjectList};
pub use tcpip::{
    InterfaceCapability, InterfaceConfiguration, InterfaceControl, InterfaceStatus, PhysicalLink,
    TcpIpInterfaceObject,
};

use crate::error::{EnipError, Result};

fn require(data: &[u8], len: usize, what: &str) -> Result<()> {
    if data.len() < len {
        return Err(EnipError::malformed(format!(
            "{} needs {} bytes, got {}",
            what,
            len,
            data.len()
        )));
    }
    Ok(())
}

/// Little-endian UINT from the first two bytes.
pub fn to_ushort(data: &[u8]) -> Result<u16> {
    require(data, 2, "UINT")?;
    Ok(u16::from_le_bytes([data[0], data[1]]))
}

/// Little-endian UDINT from the first four bytes.
pub fn to_uint(data: &[u8]) -> Result<u32> {
    require(data, 4, "UDINT")?;
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Bit `bit` of a little-endian bit string (bit 0 = LSB of the first byte).
pub fn to_bool(data: &[u8], bit: usize) -> Result<bool> {
    require(data, bit / 8 + 1, "BOOL")?;
    Ok((data[bit / 8] >> (bit % 8)) & 0x01 != 0)
}

/// Little-endian UINT array.
fn to_ushort_vec(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|w| u16::from_le_bytes([w[0], w[1]]))
        .collect()
}

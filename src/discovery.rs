//! Device discovery with a broadcast ListIdentity.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};

use crate::codec::EncapsulationPacket;
use crate::error::{EnipError, Result};
use crate::session::DEFAULT_TCP_PORT;
use crate::types::{CipIdentityItem, Command};

/// Time replies are collected after each broadcast.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(1);

/// Broadcast ListIdentity to each address and collect the answering devices.
///
/// Replies are gathered for `settle` after every broadcast; devices that
/// answer more than once are reported once. Malformed replies are skipped.
pub async fn discover(broadcast_addrs: &[Ipv4Addr], settle: Duration) -> Result<HashSet<CipIdentityItem>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let request = EncapsulationPacket::new(Command::ListIdentity, 0, Bytes::new()).encode()?;
    let mut devices = HashSet::new();
    let mut buf = vec![0u8; 1500];

    for &addr in broadcast_addrs {
        let target = SocketAddr::from((addr, DEFAULT_TCP_PORT));
        if let Err(e) = socket.send_to(&request, target).await {
            tracing::warn!(%target, error = %e, "ListIdentity broadcast failed");
            continue;
        }

        collect_replies(&socket, Instant::now() + settle, &mut buf, &mut devices).await;
    }

    tracing::debug!(count = devices.len(), "discovery finished");
    Ok(devices)
}

/// Gather ListIdentity replies on `socket` until `deadline`.
async fn collect_replies(
    socket: &UdpSocket,
    deadline: Instant,
    buf: &mut [u8],
    devices: &mut HashSet<CipIdentityItem>,
) {
    loop {
        let (len, from) = tokio::select! {
            _ = sleep_until(deadline) => break,
            result = socket.recv_from(buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    tracing::debug!(error = %e, "ListIdentity receive failed");
                    continue;
                }
            },
        };
        match parse_list_identity(&buf[..len]) {
            Ok(items) => devices.extend(items),
            Err(e) => tracing::debug!(%from, error = %e, "ignoring ListIdentity reply"),
        }
    }
}

/// Parse a complete ListIdentity reply datagram.
pub fn parse_list_identity(datagram: &[u8]) -> Result<Vec<CipIdentityItem>> {
    let packet = EncapsulationPacket::decode(datagram)?;
    if packet.header.command != Command::ListIdentity.as_u16() {
        return Err(EnipError::malformed(format!(
            "Expected ListIdentity reply, got command 0x{:04X}",
            packet.header.command
        )));
    }
    if packet.header.status != 0 {
        return Err(EnipError::EncapsulationStatus(packet.header.status));
    }
    CipIdentityItem::parse_reply(&packet.data)
}

//! Forward_Open / Forward_Close request building and reply parsing.
//!
//! Build a request with [`ForwardOpenRequest`], send it through the session
//! with the items from [`ForwardOpenRequest::socket_items`], then feed the
//! reply to [`ForwardOpenReply::parse`]. [`ConnectionInfo::negotiate`]
//! combines both into the values the I/O pump needs.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::error::{EnipError, Result};
use crate::types::{
    put_segment, segment_len, CipService, CommonPacketFormat, ConnectionParams, ConnectionType,
    CpfItem, EPath, MessageRouterRequest, SegmentKind, SocketAddress, ITEM_SOCKADDR_O_T,
    ITEM_SOCKADDR_T_O,
};

/// Connection Manager object class.
pub const CONNECTION_MANAGER_CLASS: u16 = 0x06;
/// Priority / tick time byte.
pub const PRIORITY_TICK_TIME: u8 = 0x03;
/// Timeout ticks of the unconnected request.
pub const TIMEOUT_TICKS: u8 = 0xFA;
/// Originator vendor ID placeholder.
pub const ORIGINATOR_VENDOR_ID: u16 = 0x00FF;
/// Originator serial number placeholder.
pub const ORIGINATOR_SERIAL: u32 = 0xFFFF_FFFF;
/// Connection timeout multiplier (3 = x32).
pub const TIMEOUT_MULTIPLIER: u8 = 3;
/// Transport class and trigger: server, cyclic, class 1.
pub const TRANSPORT_TRIGGER: u8 = 0x01;
/// Base of the CIP default multicast address range (239.192.1.0).
pub const MULTICAST_BASE: u32 = 0xEFC0_0100;

/// Derive the default CIP multicast group of a device.
///
/// The host part under the legacy class A/B/C netmask, minus one, selects one
/// of 1024 groups spaced 32 apart from [`MULTICAST_BASE`]. Addresses of class
/// D and above have no netmask.
pub fn multicast_address(device: Ipv4Addr) -> Ipv4Addr {
    let addr = u32::from(device);
    let netmask: u32 = match addr >> 24 {
        0..=127 => 0xFF00_0000,
        128..=191 => 0xFFFF_0000,
        192..=223 => 0xFFFF_FF00,
        _ => 0,
    };
    let host = addr & !netmask;
    let index = host.wrapping_sub(1) & 0x3FF;
    Ipv4Addr::from(MULTICAST_BASE + index * 32)
}

/// Connection path of a class-1 connection.
///
/// ```text
/// 0x20 assembly class | 0x24 configuration instance | [0x2C O→T point] | [0x2C T→O point]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPath {
    /// Class of the connected object (Assembly = 0x04)
    pub class_id: u16,
    /// Configuration instance
    pub configuration_instance: u16,
    /// O→T connection point, absent for a Null direction
    pub o_t_point: Option<u16>,
    /// T→O connection point, absent for a Null direction
    pub t_o_point: Option<u16>,
}

impl ConnectionPath {
    /// Build the path for both directions, skipping Null ones.
    pub fn new(
        class_id: u16,
        configuration_instance: u16,
        o_t: &ConnectionParams,
        t_o: &ConnectionParams,
    ) -> Self {
        Self {
            class_id,
            configuration_instance,
            o_t_point: o_t.is_active().then_some(o_t.instance_id),
            t_o_point: t_o.is_active().then_some(t_o.instance_id),
        }
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        segment_len(self.class_id)
            + segment_len(self.configuration_instance)
            + self.o_t_point.map_or(0, segment_len)
            + self.t_o_point.map_or(0, segment_len)
    }

    /// Encoded length in 16-bit words.
    pub fn word_len(&self) -> u8 {
        (self.encoded_len() / 2) as u8
    }

    /// Encode into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        put_segment(dst, SegmentKind::Class, self.class_id);
        put_segment(dst, SegmentKind::Instance, self.configuration_instance);
        if let Some(point) = self.o_t_point {
            put_segment(dst, SegmentKind::ConnectionPoint, point);
        }
        if let Some(point) = self.t_o_point {
            put_segment(dst, SegmentKind::ConnectionPoint, point);
        }
    }
}

/// Random non-zero connection ID.
pub fn random_connection_id() -> u32 {
    rand::thread_rng().gen_range(1..=u32::MAX)
}

/// Random connection serial number.
pub fn random_serial_number() -> u16 {
    rand::thread_rng().gen()
}

/// Forward_Open or Large_Forward_Open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOpenRequest {
    /// Use Large_Forward_Open (32-bit connection parameters)
    pub large: bool,
    /// Proposed O→T connection ID
    pub o_t_connection_id: u32,
    /// Proposed T→O connection ID
    pub t_o_connection_id: u32,
    /// Connection serial number
    pub serial_number: u16,
    /// O→T parameters
    pub o_t: ConnectionParams,
    /// T→O parameters
    pub t_o: ConnectionParams,
    /// Connection path
    pub path: ConnectionPath,
}

impl ForwardOpenRequest {
    /// Create a request with freshly randomized IDs and serial number.
    ///
    /// Fails if a direction's connection size does not fit the size field.
    pub fn new(
        large: bool,
        o_t: ConnectionParams,
        t_o: ConnectionParams,
        path: ConnectionPath,
    ) -> Result<Self> {
        o_t.checked_connection_size(large)?;
        t_o.checked_connection_size(large)?;
        Ok(Self {
            large,
            o_t_connection_id: random_connection_id(),
            t_o_connection_id: random_connection_id(),
            serial_number: random_serial_number(),
            o_t,
            t_o,
            path,
        })
    }

    /// Service code (0x54 or 0x5B).
    pub fn service(&self) -> CipService {
        if self.large {
            CipService::LargeForwardOpen
        } else {
            CipService::ForwardOpen
        }
    }

    /// Encode the service data following the Connection Manager path.
    pub fn encode_data(&self) -> Bytes {
        let params_len = if self.large { 4 } else { 2 };
        let mut buf = BytesMut::with_capacity(36 + 2 * params_len + self.path.encoded_len());

        buf.put_u8(PRIORITY_TICK_TIME);
        buf.put_u8(TIMEOUT_TICKS);
        buf.put_u32_le(self.o_t_connection_id);
        buf.put_u32_le(self.t_o_connection_id);
        buf.put_u16_le(self.serial_number);
        buf.put_u16_le(ORIGINATOR_VENDOR_ID);
        buf.put_u32_le(ORIGINATOR_SERIAL);
        buf.put_u8(TIMEOUT_MULTIPLIER);
        buf.put_bytes(0, 3);

        buf.put_u32_le(self.o_t.requested_packet_rate_us);
        self.put_params(&mut buf, &self.o_t);
        buf.put_u32_le(self.t_o.requested_packet_rate_us);
        self.put_params(&mut buf, &self.t_o);

        buf.put_u8(TRANSPORT_TRIGGER);
        buf.put_u8(self.path.word_len());
        self.path.encode_to(&mut buf);
        buf.freeze()
    }

    fn put_params(&self, buf: &mut BytesMut, params: &ConnectionParams) {
        if self.large {
            buf.put_u32_le(params.large_network_parameters());
        } else {
            buf.put_u16_le(params.network_parameters());
        }
    }

    /// Message Router request addressed to the Connection Manager.
    pub fn to_request(&self) -> MessageRouterRequest {
        MessageRouterRequest::new(
            self.service(),
            EPath::new(CONNECTION_MANAGER_CLASS, 1, 0),
            self.encode_data(),
        )
    }

    /// Items appended after the unconnected data item.
    ///
    /// A multicast O→T direction announces the originator port and the
    /// derived group of `device`.
    pub fn socket_items(&self, originator_udp_port: u16, device: Ipv4Addr) -> Vec<CpfItem> {
        if self.o_t.connection_type != ConnectionType::Multicast {
            return Vec::new();
        }
        let addr = SocketAddress::new(originator_udp_port, multicast_address(device));
        vec![CpfItem::socket_address(ITEM_SOCKADDR_O_T, &addr)]
    }
}

/// Successful Forward_Open reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOpenReply {
    /// O→T connection ID chosen by the device
    pub o_t_connection_id: u32,
    /// T→O connection ID chosen by the device
    pub t_o_connection_id: u32,
    /// Echoed connection serial number
    pub serial_number: Option<u16>,
    /// Actual O→T packet interval in microseconds
    pub o_t_api_us: Option<u32>,
    /// Actual T→O packet interval in microseconds
    pub t_o_api_us: Option<u32>,
    /// T→O sockaddr info item, if the device sent one
    pub t_o_socket: Option<SocketAddress>,
}

impl ForwardOpenReply {
    /// Parse the reply data and the trailing CPF items.
    pub fn parse(data: &[u8], items: &CommonPacketFormat) -> Result<Self> {
        if data.len() < 8 {
            return Err(EnipError::malformed(format!(
                "Forward_Open reply needs 8 bytes for connection IDs, got {}",
                data.len()
            )));
        }
        let u32_at = |pos: usize| {
            data.get(pos..pos + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };

        let t_o_socket = items
            .find(ITEM_SOCKADDR_T_O)
            .map(CpfItem::as_socket_address)
            .transpose()?;

        Ok(Self {
            o_t_connection_id: u32_at(0).unwrap_or_default(),
            t_o_connection_id: u32_at(4).unwrap_or_default(),
            serial_number: data.get(8..10).map(|b| u16::from_le_bytes([b[0], b[1]])),
            o_t_api_us: u32_at(16),
            t_o_api_us: u32_at(20),
            t_o_socket,
        })
    }
}

/// Negotiated parameters of an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// O→T connection ID
    pub o_t_connection_id: u32,
    /// T→O connection ID
    pub t_o_connection_id: u32,
    /// Connection serial number
    pub serial_number: u16,
    /// UDP port the device consumes O→T data on
    pub target_udp_port: u16,
    /// Multicast group to join for T→O data
    pub multicast_group: Option<Ipv4Addr>,
    /// Actual O→T packet interval in microseconds
    pub o_t_api_us: Option<u32>,
    /// Actual T→O packet interval in microseconds
    pub t_o_api_us: Option<u32>,
}

impl ConnectionInfo {
    /// Combine the request with the device reply.
    ///
    /// Device connection IDs take precedence. A T→O sockaddr item supplies
    /// the target port and, for a multicast T→O direction, the group.
    pub fn negotiate(
        request: &ForwardOpenRequest,
        reply: &ForwardOpenReply,
        device: Ipv4Addr,
        default_target_port: u16,
    ) -> Self {
        let derived = multicast_address(device);
        let multicast_group = if request.t_o.connection_type == ConnectionType::Multicast {
            Some(reply.t_o_socket.map_or(derived, |s| s.address))
        } else if request.o_t.connection_type == ConnectionType::Multicast {
            Some(derived)
        } else {
            None
        };

        Self {
            o_t_connection_id: reply.o_t_connection_id,
            t_o_connection_id: reply.t_o_connection_id,
            serial_number: request.serial_number,
            target_udp_port: reply.t_o_socket.map_or(default_target_port, |s| s.port),
            multicast_group,
            o_t_api_us: reply.o_t_api_us,
            t_o_api_us: reply.t_o_api_us,
        }
    }
}

/// Forward_Close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardCloseRequest {
    /// Serial number of the connection to close
    pub serial_number: u16,
    /// Same path as the Forward_Open
    pub path: ConnectionPath,
}

impl ForwardCloseRequest {
    /// Encode the service data following the Connection Manager path.
    pub fn encode_data(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.path.encoded_len());
        buf.put_u8(PRIORITY_TICK_TIME);
        buf.put_u8(TIMEOUT_TICKS);
        buf.put_u16_le(self.serial_number);
        buf.put_u16_le(ORIGINATOR_VENDOR_ID);
        buf.put_u32_le(ORIGINATOR_SERIAL);
        buf.put_u8(self.path.word_len());
        buf.put_u8(0); // reserved
        self.path.encode_to(&mut buf);
        buf.freeze()
    }

    /// Message Router request addressed to the Connection Manager.
    pub fn to_request(&self) -> MessageRouterRequest {
        MessageRouterRequest::new(
            CipService::ForwardClose,
            EPath::new(CONNECTION_MANAGER_CLASS, 1, 0),
            self.encode_data(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::parse_rr_data;
    use crate::types::RealTimeFormat;

    fn default_path() -> ConnectionPath {
        ConnectionPath::new(
            0x04,
            0x01,
            &ConnectionParams::o_t_default(),
            &ConnectionParams::t_o_default(),
        )
    }

    fn fixed_request(large: bool) -> ForwardOpenRequest {
        let mut request = ForwardOpenRequest::new(
            large,
            ConnectionParams::o_t_default(),
            ConnectionParams::t_o_default(),
            default_path(),
        )
        .unwrap();
        request.o_t_connection_id = 0x1122_3344;
        request.t_o_connection_id = 0x5566_7788;
        request.serial_number = 0xABCD;
        request
    }

    #[test]
    fn test_multicast_address() {
        assert_eq!(
            multicast_address(Ipv4Addr::new(192, 168, 0, 10)),
            Ipv4Addr::new(239, 192, 2, 32)
        );
        assert_eq!(u32::from(multicast_address(Ipv4Addr::new(192, 168, 0, 10))), 0xEFC0_0220);
        assert_eq!(
            multicast_address(Ipv4Addr::new(10, 0, 0, 1)),
            Ipv4Addr::new(239, 192, 1, 0)
        );
        assert_eq!(
            multicast_address(Ipv4Addr::new(172, 16, 1, 5)),
            Ipv4Addr::new(239, 192, 33, 128)
        );
    }

    #[test]
    fn test_multicast_host_zero_wraps() {
        // host 0 - 1 wraps to 0x3FF, the last group
        assert_eq!(
            u32::from(multicast_address(Ipv4Addr::new(192, 168, 0, 0))),
            MULTICAST_BASE + 0x3FF * 32
        );
    }

    #[test]
    fn test_connection_path() {
        let path = default_path();
        let mut buf = BytesMut::new();
        path.encode_to(&mut buf);
        assert_eq!(&buf[..], &[0x20, 0x04, 0x24, 0x01, 0x2C, 0x64, 0x2C, 0x65]);
        assert_eq!(path.word_len(), 4);

        let mut t_o = ConnectionParams::t_o_default();
        t_o.connection_type = ConnectionType::Null;
        let path = ConnectionPath::new(0x04, 0x01, &ConnectionParams::o_t_default(), &t_o);
        assert_eq!(path.t_o_point, None);
        assert_eq!(path.word_len(), 3);
    }

    #[test]
    fn test_forward_open_layout() {
        let request = fixed_request(false);
        let data = request.encode_data();

        assert_eq!(&data[0..2], &[0x03, 0xFA]);
        assert_eq!(&data[2..6], &0x1122_3344u32.to_le_bytes());
        assert_eq!(&data[6..10], &0x5566_7788u32.to_le_bytes());
        assert_eq!(&data[10..12], &[0xCD, 0xAB]);
        assert_eq!(&data[12..14], &[0xFF, 0x00]);
        assert_eq!(&data[14..18], &[0xFF; 4]);
        assert_eq!(&data[18..22], &[0x03, 0, 0, 0]);
        assert_eq!(&data[22..26], &500_000u32.to_le_bytes());
        assert_eq!(
            &data[26..28],
            &ConnectionParams::o_t_default().network_parameters().to_le_bytes()
        );
        assert_eq!(&data[28..32], &500_000u32.to_le_bytes());
        assert_eq!(
            &data[32..34],
            &ConnectionParams::t_o_default().network_parameters().to_le_bytes()
        );
        assert_eq!(data[34], TRANSPORT_TRIGGER);
        assert_eq!(data[35], 4);
        assert_eq!(&data[36..], &[0x20, 0x04, 0x24, 0x01, 0x2C, 0x64, 0x2C, 0x65]);

        let encoded = request.to_request().encode();
        assert_eq!(&encoded[..6], &[0x54, 0x02, 0x20, 0x06, 0x24, 0x01]);
    }

    #[test]
    fn test_large_forward_open_layout() {
        let request = fixed_request(true);
        let data = request.encode_data();
        assert_eq!(data.len(), 36 + 4 + 8);
        assert_eq!(
            &data[26..30],
            &ConnectionParams::o_t_default()
                .large_network_parameters()
                .to_le_bytes()
        );
        assert_eq!(request.to_request().encode()[0], 0x5B);
    }

    #[test]
    fn test_random_ids_are_non_zero() {
        for _ in 0..64 {
            let request = ForwardOpenRequest::new(
                false,
                ConnectionParams::o_t_default(),
                ConnectionParams::t_o_default(),
                default_path(),
            )
            .unwrap();
            assert_ne!(request.o_t_connection_id, 0);
            assert_ne!(request.t_o_connection_id, 0);
        }
    }

    #[test]
    fn test_socket_items_for_multicast_o_t() {
        let device = Ipv4Addr::new(192, 168, 0, 10);
        let mut request = fixed_request(false);
        assert!(request.socket_items(2222, device).is_empty());

        request.o_t.connection_type = ConnectionType::Multicast;
        let items = request.socket_items(2222, device);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].type_id, ITEM_SOCKADDR_O_T);
        let addr = items[0].as_socket_address().unwrap();
        assert_eq!(addr.port, 2222);
        assert_eq!(addr.address, Ipv4Addr::new(239, 192, 2, 32));
    }

    /// SendRRData command data of a successful Forward_Open reply.
    fn canned_reply(with_socket_item: bool) -> Vec<u8> {
        let mut reply = BytesMut::new();
        reply.put_slice(&[0xD4, 0x00, 0x00, 0x00]);
        reply.put_u32_le(0xAAAA_0001); // O→T
        reply.put_u32_le(0xBBBB_0002); // T→O
        reply.put_u16_le(0xABCD);
        reply.put_u16_le(ORIGINATOR_VENDOR_ID);
        reply.put_u32_le(ORIGINATOR_SERIAL);
        reply.put_u32_le(10_000); // O→T API
        reply.put_u32_le(20_000); // T→O API
        reply.put_u8(0);
        reply.put_u8(0);

        let mut cpf = CommonPacketFormat::unconnected(reply.freeze());
        if with_socket_item {
            let addr = SocketAddress::new(2223, Ipv4Addr::new(239, 192, 9, 0));
            cpf.push(CpfItem::socket_address(ITEM_SOCKADDR_T_O, &addr));
        }
        let mut data = vec![0u8; 6];
        data.extend_from_slice(&cpf.encode());
        data
    }

    #[test]
    fn test_parse_reply_with_socket_item() {
        let response = parse_rr_data(&canned_reply(true)).unwrap();
        let reply = ForwardOpenReply::parse(&response.reply.data, &response.items).unwrap();
        assert_eq!(reply.o_t_connection_id, 0xAAAA_0001);
        assert_eq!(reply.t_o_connection_id, 0xBBBB_0002);
        assert_eq!(reply.serial_number, Some(0xABCD));
        assert_eq!(reply.o_t_api_us, Some(10_000));
        assert_eq!(reply.t_o_api_us, Some(20_000));

        let request = fixed_request(false);
        let info = ConnectionInfo::negotiate(&request, &reply, Ipv4Addr::new(192, 168, 0, 10), 2222);
        assert_eq!(info.o_t_connection_id, 0xAAAA_0001);
        assert_eq!(info.target_udp_port, 2223);
        assert_eq!(info.multicast_group, Some(Ipv4Addr::new(239, 192, 9, 0)));
    }

    #[test]
    fn test_negotiate_without_socket_item() {
        let response = parse_rr_data(&canned_reply(false)).unwrap();
        let reply = ForwardOpenReply::parse(&response.reply.data, &response.items).unwrap();
        assert_eq!(reply.t_o_socket, None);

        let device = Ipv4Addr::new(192, 168, 0, 10);
        let mut request = fixed_request(false);
        let info = ConnectionInfo::negotiate(&request, &reply, device, 2222);
        assert_eq!(info.target_udp_port, 2222);
        assert_eq!(info.multicast_group, Some(Ipv4Addr::new(239, 192, 2, 32)));

        request.t_o.connection_type = ConnectionType::PointToPoint;
        let info = ConnectionInfo::negotiate(&request, &reply, device, 2222);
        assert_eq!(info.multicast_group, None);
    }

    #[test]
    fn test_failed_reply_carries_extended_status() {
        // General status 0x01, one extended word 0x0100
        let mut cpf_data = vec![0xD4, 0x00, 0x01, 0x01, 0x00, 0x01];
        cpf_data.extend_from_slice(&[0u8; 10]);
        let mut data = vec![0u8; 6];
        data.extend_from_slice(&CommonPacketFormat::unconnected(cpf_data).encode());

        let response = parse_rr_data(&data).unwrap();
        let err = response.reply.into_result().unwrap_err();
        assert_eq!(err.cip_status(), Some((0x01, Some(0x0100))));
        assert_eq!(
            err.extended_reason(),
            Some("Connection in use or duplicate Forward Open")
        );
    }

    #[test]
    fn test_parse_short_reply() {
        let items = CommonPacketFormat::new();
        assert!(ForwardOpenReply::parse(&[0u8; 7], &items).is_err());
        let reply = ForwardOpenReply::parse(&[1, 0, 0, 0, 2, 0, 0, 0], &items).unwrap();
        assert_eq!(reply.t_o_connection_id, 2);
        assert_eq!(reply.o_t_api_us, None);
    }

    #[test]
    fn test_forward_close_layout() {
        let close = ForwardCloseRequest {
            serial_number: 0xABCD,
            path: default_path(),
        };
        let data = close.encode_data();
        assert_eq!(
            &data[..],
            &[
                0x03, 0xFA, 0xCD, 0xAB, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x04, 0x00, 0x20, 0x04,
                0x24, 0x01, 0x2C, 0x64, 0x2C, 0x65
            ]
        );
        assert_eq!(close.to_request().service, 0x4E);
    }

    #[test]
    fn test_heartbeat_connection_size() {
        let mut params = ConnectionParams::o_t_default();
        params.real_time_format = RealTimeFormat::Heartbeat;
        params.length = 0;
        assert_eq!(params.network_parameters() & 0x1FF, 0);
    }

    #[test]
    fn test_oversized_standard_forward_open() {
        let mut o_t = ConnectionParams::o_t_default();
        o_t.length = 600;
        let err = ForwardOpenRequest::new(false, o_t, ConnectionParams::t_o_default(), default_path())
            .unwrap_err();
        assert!(matches!(err, EnipError::ConnectionSize { size: 606, max: 511 }));

        let request =
            ForwardOpenRequest::new(true, o_t, ConnectionParams::t_o_default(), default_path()).unwrap();
        assert_eq!(request.o_t.large_network_parameters() & 0xFFFF, 606);
    }
}

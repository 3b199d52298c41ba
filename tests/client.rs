//! Client tests against an in-process mock device.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use voltage_enip::objects::to_ushort;
use voltage_enip::pump::build_o_t_datagram;
use voltage_enip::{
    ClientConfig, Command, CommonPacketFormat, ConnectionState, ConnectionType, CpfItem,
    EipClient, EipEvent, EncapsulationCodec, EncapsulationPacket, EnipError, RealTimeFormat,
    SessionState, SocketAddress, ITEM_SOCKADDR_T_O, ITEM_UNCONNECTED_DATA,
};

const SESSION_HANDLE: u32 = 0x0000_0001;
const WAIT: Duration = Duration::from_secs(2);

struct MockDevice {
    port: u16,
    accepts: Arc<AtomicUsize>,
    requests: mpsc::UnboundedReceiver<Bytes>,
}

/// Start a device that registers sessions and answers SendRRData through
/// `handler`, which maps the request's unconnected data item to a reply CPF.
async fn spawn_device<F>(handler: F) -> MockDevice
where
    F: Fn(&[u8]) -> CommonPacketFormat + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let (request_tx, requests) = mpsc::unbounded_channel();
    let handler = Arc::new(handler);

    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let request_tx = request_tx.clone();
            let handler = handler.clone();

            tokio::spawn(async move {
                let mut framed = Framed::new(stream, EncapsulationCodec::new());
                while let Some(Ok(packet)) = framed.next().await {
                    let reply = match packet.command() {
                        Ok(Command::RegisterSession) => EncapsulationPacket::new(
                            Command::RegisterSession,
                            SESSION_HANDLE,
                            packet.data.clone(),
                        ),
                        Ok(Command::SendRRData) => {
                            let cpf = CommonPacketFormat::parse(&packet.data[6..]).unwrap();
                            let request = cpf.find(ITEM_UNCONNECTED_DATA).unwrap().data.clone();
                            let _ = request_tx.send(request.clone());

                            let mut data = BytesMut::new();
                            data.put_bytes(0, 6);
                            (*handler)(&request).encode_to(&mut data);
                            EncapsulationPacket::new(Command::SendRRData, SESSION_HANDLE, data.freeze())
                        }
                        _ => break,
                    };
                    if framed.send(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    MockDevice {
        port,
        accepts,
        requests,
    }
}

/// Reply CPF with the given general status and data.
fn reply(request: &[u8], status: u8, data: &[u8]) -> CommonPacketFormat {
    let mut body = vec![request[0] | 0x80, 0x00, status, 0x00];
    body.extend_from_slice(data);
    CommonPacketFormat::unconnected(body)
}

fn client_for(device: &MockDevice) -> EipClient {
    EipClient::new(ClientConfig::new("127.0.0.1").tcp_port(device.port))
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let device = spawn_device(|req| reply(req, 0, &[])).await;
    let mut client = client_for(&device);
    let mut events = client.subscribe().unwrap();

    assert_eq!(client.register_session().await.unwrap(), SESSION_HANDLE);
    assert_eq!(client.register_session().await.unwrap(), SESSION_HANDLE);
    assert_eq!(client.session_state(), SessionState::Registered);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(device.accepts.load(Ordering::SeqCst), 1);

    assert!(matches!(
        events.try_recv(),
        Ok(EipEvent::SessionRegistered { handle: SESSION_HANDLE })
    ));
    assert!(events.try_recv().is_err());

    client.unregister_session().await;
    assert_eq!(client.session_handle(), 0);
    assert!(matches!(events.try_recv(), Ok(EipEvent::SessionUnregistered)));
}

#[tokio::test]
async fn test_get_attribute_single_end_to_end() {
    let mut device = spawn_device(|req| reply(req, 0, &[0x0A, 0x00])).await;
    let mut client = client_for(&device);
    client.register_session().await.unwrap();

    let value = client.get_attribute_single(0x66, 1, 0x325).await.unwrap();
    assert_eq!(to_ushort(&value).unwrap(), 10);

    let request = device.requests.recv().await.unwrap();
    assert_eq!(request[0], 0x0E);
    assert_eq!(request[1], 4);
    assert_eq!(&request[2..], &[0x20, 0x66, 0x24, 0x01, 0x31, 0x00, 0x25, 0x03]);
}

#[tokio::test]
async fn test_set_attribute_and_get_all() {
    let mut device = spawn_device(|req| reply(req, 0, &[])).await;
    let mut client = client_for(&device);
    client.register_session().await.unwrap();

    client
        .set_attribute_single(0x04, 0x64, 3, vec![0x11, 0x22])
        .await
        .unwrap();
    let request = device.requests.recv().await.unwrap();
    assert_eq!(&request[..], &[0x10, 0x03, 0x20, 0x04, 0x24, 0x64, 0x30, 0x03, 0x11, 0x22]);

    client.get_attribute_all(0x01, 0).await.unwrap();
    let request = device.requests.recv().await.unwrap();
    assert_eq!(&request[..], &[0x01, 0x02, 0x20, 0x01, 0x24, 0x00]);
}

#[tokio::test]
async fn test_cip_error_is_surfaced() {
    let device = spawn_device(|req| reply(req, 0x14, &[])).await;
    let mut client = client_for(&device);
    client.register_session().await.unwrap();

    let err = client.get_attribute_single(0x01, 1, 0x99).await.unwrap_err();
    assert_eq!(err.cip_status(), Some((0x14, None)));
    assert!(err.to_string().contains("Attribute not supported"));
    // The session survives a rejected service
    assert!(client.is_registered());
}

#[tokio::test]
async fn test_not_registered() {
    let device = spawn_device(|req| reply(req, 0, &[])).await;
    let mut client = client_for(&device);

    let err = client.get_attribute_single(0x01, 1, 1).await.unwrap_err();
    assert!(matches!(err, EnipError::NotRegistered));
    assert_eq!(device.accepts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_detect_length_is_cached() {
    let mut device = spawn_device(|req| reply(req, 0, &[0u8; 12])).await;
    let mut client = client_for(&device);
    client.register_session().await.unwrap();

    assert_eq!(client.detect_t_o_length().await.unwrap(), 12);
    assert_eq!(client.detect_t_o_length().await.unwrap(), 12);

    let request = device.requests.recv().await.unwrap();
    assert_eq!(&request[..], &[0x0E, 0x03, 0x20, 0x04, 0x24, 0x65, 0x30, 0x03]);
    assert!(device.requests.try_recv().is_err());
}

#[tokio::test]
async fn test_forward_open_rejected() {
    let device = spawn_device(|req| {
        let mut body = vec![req[0] | 0x80, 0x00, 0x01, 0x01, 0x00, 0x01];
        body.extend_from_slice(&[0u8; 10]);
        CommonPacketFormat::unconnected(body)
    })
    .await;
    let mut client = client_for(&device);
    client.register_session().await.unwrap();

    let err = client.forward_open(false).await.unwrap_err();
    assert_eq!(err.cip_status(), Some((0x01, Some(0x0100))));
    assert_eq!(
        err.extended_reason(),
        Some("Connection in use or duplicate Forward Open")
    );
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(client.connection_info().is_none());
}

/// Successful Forward_Open reply assigning the given IDs and T→O port.
fn forward_open_reply(request: &[u8], o_t_id: u32, t_o_id: u32, udp_port: u16) -> CommonPacketFormat {
    let mut data = BytesMut::new();
    data.put_u32_le(o_t_id);
    data.put_u32_le(t_o_id);
    data.put_bytes(0, 16);
    let mut cpf = reply(request, 0, &data);
    let addr = SocketAddress::new(udp_port, Ipv4Addr::UNSPECIFIED);
    cpf.push(CpfItem::socket_address(ITEM_SOCKADDR_T_O, &addr));
    cpf
}

/// Small point-to-point connection on loopback.
fn io_config(device: &MockDevice, originator_port: u16) -> ClientConfig {
    let mut config = ClientConfig::new("127.0.0.1")
        .tcp_port(device.port)
        .originator_udp_port(originator_port);
    config.o_t.length = 2;
    config.o_t.requested_packet_rate_us = 10_000;
    config.t_o.length = 3;
    config.t_o.connection_type = ConnectionType::PointToPoint;
    config
}

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_forward_open_exchange_and_close() {
    const O_T_ID: u32 = 0xAAAA_0001;
    const T_O_ID: u32 = 0xBBBB_0002;

    let device_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let device_udp_port = device_udp.local_addr().unwrap().port();

    let mut device = spawn_device(move |req| match req[0] {
        0x54 => forward_open_reply(req, O_T_ID, T_O_ID, device_udp_port),
        _ => reply(req, 0, &[]),
    })
    .await;

    let originator_port = free_udp_port();
    let mut client = EipClient::new(io_config(&device, originator_port));
    let mut events = client.subscribe().unwrap();
    client.register_session().await.unwrap();
    client.set_o_t_data(&[0x12, 0x34]);

    client.forward_open(false).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Open);
    let info = *client.connection_info().unwrap();
    assert_eq!(info.o_t_connection_id, O_T_ID);
    assert_eq!(info.t_o_connection_id, T_O_ID);
    assert_eq!(info.target_udp_port, device_udp_port);
    assert_eq!(info.multicast_group, None);

    let request = device.requests.recv().await.unwrap();
    assert_eq!(request[0], 0x54);

    // O→T datagrams carry the device-assigned ID and the buffer contents
    let mut buf = [0u8; 64];
    let (len, _) = timeout(WAIT, device_udp.recv_from(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[6..10], &O_T_ID.to_le_bytes());
    assert_eq!(&buf[len - 2..len], &[0x12, 0x34]);

    let datagram = build_o_t_datagram(T_O_ID, 1, RealTimeFormat::Modeless, &[5, 6, 7]);
    device_udp
        .send_to(&datagram, ("127.0.0.1", originator_port))
        .await
        .unwrap();

    timeout(WAIT, async {
        while client.t_o_data() != vec![5, 6, 7] {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(client.last_received_implicit_message().is_some());

    client.forward_close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(client.connection_info().is_none());
    let request = device.requests.recv().await.unwrap();
    assert_eq!(request[0], 0x4E);

    let mut seen_opened = false;
    let mut seen_closed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EipEvent::ConnectionOpened {
                o_t_connection_id, ..
            } => {
                assert_eq!(o_t_connection_id, O_T_ID);
                seen_opened = true;
            }
            EipEvent::ConnectionClosed => seen_closed = true,
            _ => {}
        }
    }
    assert!(seen_opened && seen_closed);

    client.unregister_session().await;
}

#[tokio::test]
async fn test_rejected_forward_close_still_cleans_up() {
    let device_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let device_udp_port = device_udp.local_addr().unwrap().port();
    let mut device = spawn_device(move |req| match req[0] {
        0x54 => forward_open_reply(req, 0x0101_0101, 0x0202_0202, device_udp_port),
        0x4E => reply(req, 0x08, &[]),
        _ => reply(req, 0, &[]),
    })
    .await;

    let originator_port = free_udp_port();
    let mut client = EipClient::new(io_config(&device, originator_port));
    client.register_session().await.unwrap();
    client.forward_open(false).await.unwrap();

    let err = client.forward_close().await.unwrap_err();
    assert_eq!(err.cip_status(), Some((0x08, None)));
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(client.connection_info().is_none());

    // The receive socket is released
    assert!(std::net::UdpSocket::bind(("0.0.0.0", originator_port)).is_ok());

    assert_eq!(device.requests.recv().await.unwrap()[0], 0x54);
    assert_eq!(device.requests.recv().await.unwrap()[0], 0x4E);

    // A new connection can be opened afterwards
    client.forward_open(false).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Open);
    let _ = client.forward_close().await;
}

#[tokio::test]
async fn test_unregister_closes_open_connection() {
    let device_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let device_udp_port = device_udp.local_addr().unwrap().port();
    let mut device = spawn_device(move |req| match req[0] {
        0x54 => forward_open_reply(req, 0x0101_0101, 0x0202_0202, device_udp_port),
        _ => reply(req, 0, &[]),
    })
    .await;

    let originator_port = free_udp_port();
    let mut client = EipClient::new(io_config(&device, originator_port));
    let mut events = client.subscribe().unwrap();
    client.register_session().await.unwrap();
    client.forward_open(false).await.unwrap();

    client.unregister_session().await;
    assert_eq!(client.state(), ConnectionState::Idle);
    assert_eq!(client.session_state(), SessionState::Disconnected);
    assert_eq!(client.session_handle(), 0);
    assert!(std::net::UdpSocket::bind(("0.0.0.0", originator_port)).is_ok());

    assert_eq!(device.requests.recv().await.unwrap()[0], 0x54);
    assert_eq!(device.requests.recv().await.unwrap()[0], 0x4E);

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            EipEvent::ConnectionClosed => order.push("closed"),
            EipEvent::SessionUnregistered => order.push("unregistered"),
            _ => {}
        }
    }
    assert_eq!(order, vec!["closed", "unregistered"]);
}

#[tokio::test]
async fn test_oversized_connection_is_rejected_locally() {
    let mut device = spawn_device(|req| reply(req, 0, &[])).await;
    let mut config = ClientConfig::new("127.0.0.1").tcp_port(device.port);
    config.o_t.length = 600;
    let mut client = EipClient::new(config);
    client.register_session().await.unwrap();

    let err = client.forward_open(false).await.unwrap_err();
    assert!(matches!(err, EnipError::ConnectionSize { size: 606, max: 511 }));
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(device.requests.try_recv().is_err());
}

#[tokio::test]
async fn test_buffers_usable_during_explicit_request() {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Holds the first SendRRData reply until released
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, EncapsulationCodec::new());
        let mut release = Some(release_rx);
        while let Some(Ok(packet)) = framed.next().await {
            let (command, data) = match packet.command() {
                Ok(Command::RegisterSession) => (Command::RegisterSession, packet.data.clone()),
                Ok(Command::SendRRData) => {
                    if let Some(release) = release.take() {
                        let _ = release.await;
                    }
                    let cpf = CommonPacketFormat::parse(&packet.data[6..]).unwrap();
                    let request = cpf.find(ITEM_UNCONNECTED_DATA).unwrap().data.clone();
                    let mut data = BytesMut::new();
                    data.put_bytes(0, 6);
                    reply(&request, 0, &[0x0A, 0x00]).encode_to(&mut data);
                    (Command::SendRRData, data.freeze())
                }
                _ => break,
            };
            if framed
                .send(EncapsulationPacket::new(command, SESSION_HANDLE, data))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut client = EipClient::new(ClientConfig::new("127.0.0.1").tcp_port(port));
    client.register_session().await.unwrap();

    let o_t = client.o_t_buffer();
    let t_o = client.t_o_buffer();
    let last_received = client.last_received();
    let writer = tokio::spawn(async move {
        assert_eq!(o_t.write(&[0xAA, 0xBB]), 2);
        assert!(last_received.get().is_none());
        let t_o_len = t_o.snapshot().len();
        let _ = release_tx.send(());
        t_o_len
    });

    // Only answered once the other task has used the buffers
    let value = timeout(WAIT, client.get_attribute_single(0x01, 1, 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(to_ushort(&value).unwrap(), 10);
    assert_eq!(writer.await.unwrap(), 505);
    assert_eq!(&client.o_t_data()[..2], &[0xAA, 0xBB]);
}


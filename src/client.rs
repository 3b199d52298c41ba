//! EtherNet/IP client implementation.
//!
//! This module provides an asynchronous client for explicit messaging over
//! TCP and class-1 implicit I/O over UDP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{EnipError, Result};
use crate::forward_open::{
    ConnectionInfo, ConnectionPath, ForwardCloseRequest, ForwardOpenReply, ForwardOpenRequest,
};
use crate::pump::{bind_receive_socket, send_period, IoBuffer, IoPump, LastReceived, PumpConfig, PumpShared};
use crate::session::{SessionChannel, SessionState, DEFAULT_TCP_PORT};
use crate::types::{CipService, ConnectionParams, EPath, MessageRouterRequest};

/// Default UDP port for implicit I/O (0x08AE).
pub const DEFAULT_UDP_PORT: u16 = 2222;

/// Assembly object class.
pub const ASSEMBLY_CLASS: u16 = 0x04;

/// Assembly attribute holding the instance data.
pub const ASSEMBLY_DATA_ATTRIBUTE: u16 = 3;

/// Default event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device host name or IP address
    pub address: String,
    /// TCP port for explicit messaging
    pub tcp_port: u16,
    /// UDP port the device consumes O→T data on (may be replaced by Forward_Open)
    pub target_udp_port: u16,
    /// Local UDP port T→O data arrives on
    pub originator_udp_port: u16,
    /// TCP connect timeout (none by default)
    pub connect_timeout: Option<Duration>,
    /// Originator to target parameters
    pub o_t: ConnectionParams,
    /// Target to originator parameters
    pub t_o: ConnectionParams,
    /// Class of the connected object
    pub assembly_class: u16,
    /// Configuration assembly instance
    pub configuration_instance: u16,
    /// Event channel capacity
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Create a new configuration for the given device.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tcp_port: DEFAULT_TCP_PORT,
            target_udp_port: DEFAULT_UDP_PORT,
            originator_udp_port: DEFAULT_UDP_PORT,
            connect_timeout: None,
            o_t: ConnectionParams::o_t_default(),
            t_o: ConnectionParams::t_o_default(),
            assembly_class: ASSEMBLY_CLASS,
            configuration_instance: 0x01,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Set TCP port.
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Set target UDP port.
    pub fn target_udp_port(mut self, port: u16) -> Self {
        self.target_udp_port = port;
        self
    }

    /// Set originator UDP port.
    pub fn originator_udp_port(mut self, port: u16) -> Self {
        self.originator_udp_port = port;
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set O→T parameters.
    pub fn o_t(mut self, params: ConnectionParams) -> Self {
        self.o_t = params;
        self
    }

    /// Set T→O parameters.
    pub fn t_o(mut self, params: ConnectionParams) -> Self {
        self.t_o = params;
        self
    }

    /// Set configuration assembly instance.
    pub fn configuration_instance(mut self, instance: u16) -> Self {
        self.configuration_instance = instance;
        self
    }

    /// Set event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Class-1 connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Idle,
    /// Forward_Open in flight
    Opening,
    /// Connection open, I/O pump running
    Open,
    /// Forward_Close in flight
    Closing,
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum EipEvent {
    /// Session registered
    SessionRegistered {
        /// Session handle
        handle: u32,
    },
    /// Session unregistered
    SessionUnregistered,
    /// Class-1 connection opened
    ConnectionOpened {
        /// O→T connection ID
        o_t_connection_id: u32,
        /// T→O connection ID
        t_o_connection_id: u32,
    },
    /// Class-1 connection closed
    ConnectionClosed,
    /// T→O datagram stored
    ImplicitMessageReceived {
        /// T→O connection ID
        connection_id: u32,
    },
    /// The receive task stopped on a socket error
    ReceiveError(String),
}

struct OpenConnection {
    info: ConnectionInfo,
    path: ConnectionPath,
    pump: IoPump,
}

/// EtherNet/IP client.
pub struct EipClient {
    config: ClientConfig,
    session: SessionChannel,
    state: ConnectionState,
    connection: Option<OpenConnection>,
    o_t_data: IoBuffer,
    t_o_data: IoBuffer,
    last_received: LastReceived,
    o_t_detected_length: Option<u16>,
    t_o_detected_length: Option<u16>,
    event_tx: mpsc::Sender<EipEvent>,
    event_rx: Option<mpsc::Receiver<EipEvent>>,
}

impl EipClient {
    /// Create a new EtherNet/IP client.
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            o_t_data: IoBuffer::new(config.o_t.length as usize),
            t_o_data: IoBuffer::new(config.t_o.length as usize),
            config,
            session: SessionChannel::new(),
            state: ConnectionState::Idle,
            connection: None,
            last_received: LastReceived::new(),
            o_t_detected_length: None,
            t_o_detected_length: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Mutable configuration. Changes apply to the next register or
    /// Forward_Open.
    pub fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the current session state.
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Session handle (0 if not registered).
    pub fn session_handle(&self) -> u32 {
        self.session.session_handle()
    }

    /// Check for a registered session.
    pub fn is_registered(&self) -> bool {
        self.session.is_registered()
    }

    /// Negotiated parameters of the open connection.
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection.as_ref().map(|c| &c.info)
    }

    /// Subscribe to events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<EipEvent>> {
        self.event_rx.take()
    }

    /// Register a session with the configured device.
    ///
    /// Returns the existing handle if a session is already registered.
    pub async fn register_session(&mut self) -> Result<u32> {
        if self.session.is_registered() {
            return Ok(self.session.session_handle());
        }
        let handle = self
            .session
            .register(&self.config.address, self.config.tcp_port, self.config.connect_timeout)
            .await?;
        self.emit_event(EipEvent::SessionRegistered { handle });
        Ok(handle)
    }

    /// Unregister the session. An open connection is closed first.
    pub async fn unregister_session(&mut self) {
        if self.state == ConnectionState::Open {
            if let Err(e) = self.forward_close().await {
                tracing::warn!(error = %e, "Forward_Close during unregister failed");
            }
        }
        if self.session.state() == SessionState::Disconnected {
            return;
        }
        self.session.unregister().await;
        self.emit_event(EipEvent::SessionUnregistered);
    }

    /// Send a service request and return the reply data.
    pub async fn send_service(
        &mut self,
        service: CipService,
        path: EPath,
        data: impl Into<Bytes>,
    ) -> Result<Bytes> {
        let request = MessageRouterRequest::new(service, path, data);
        let response = self.session.send_unconnected(&request, Vec::new()).await?;
        Ok(response.reply.data)
    }

    /// Get_Attribute_Single.
    pub async fn get_attribute_single(
        &mut self,
        class_id: u16,
        instance_id: u16,
        attribute_id: u16,
    ) -> Result<Bytes> {
        self.send_service(
            CipService::GetAttributeSingle,
            EPath::new(class_id, instance_id, attribute_id),
            Bytes::new(),
        )
        .await
    }

    /// Get_Attributes_All of a class (instance 0) or instance.
    pub async fn get_attribute_all(&mut self, class_id: u16, instance_id: u16) -> Result<Bytes> {
        self.send_service(
            CipService::GetAttributesAll,
            EPath::new(class_id, instance_id, 0),
            Bytes::new(),
        )
        .await
    }

    /// Set_Attribute_Single.
    pub async fn set_attribute_single(
        &mut self,
        class_id: u16,
        instance_id: u16,
        attribute_id: u16,
        value: impl Into<Bytes>,
    ) -> Result<Bytes> {
        self.send_service(
            CipService::SetAttributeSingle,
            EPath::new(class_id, instance_id, attribute_id),
            value,
        )
        .await
    }

    /// Data length of the O→T assembly, read from the device once.
    pub async fn detect_o_t_length(&mut self) -> Result<u16> {
        if let Some(len) = self.o_t_detected_length {
            return Ok(len);
        }
        let len = self.assembly_length(self.config.o_t.instance_id).await?;
        self.o_t_detected_length = Some(len);
        Ok(len)
    }

    /// Data length of the T→O assembly, read from the device once.
    pub async fn detect_t_o_length(&mut self) -> Result<u16> {
        if let Some(len) = self.t_o_detected_length {
            return Ok(len);
        }
        let len = self.assembly_length(self.config.t_o.instance_id).await?;
        self.t_o_detected_length = Some(len);
        Ok(len)
    }

    async fn assembly_length(&mut self, instance_id: u16) -> Result<u16> {
        let data = self
            .get_attribute_single(self.config.assembly_class, instance_id, ASSEMBLY_DATA_ATTRIBUTE)
            .await?;
        Ok(data.len() as u16)
    }

    /// Open a class-1 connection with Forward_Open and start the I/O pump.
    pub async fn forward_open(&mut self, large: bool) -> Result<()> {
        if !self.session.is_registered() {
            return Err(EnipError::NotRegistered);
        }
        if self.state != ConnectionState::Idle {
            return Err(EnipError::invalid_state(format!(
                "Forward_Open while connection is {:?}",
                self.state
            )));
        }

        self.state = ConnectionState::Opening;
        match self.open_connection(large).await {
            Ok(connection) => {
                tracing::debug!(
                    o_t = connection.info.o_t_connection_id,
                    t_o = connection.info.t_o_connection_id,
                    target_port = connection.info.target_udp_port,
                    "connection opened"
                );
                self.emit_event(EipEvent::ConnectionOpened {
                    o_t_connection_id: connection.info.o_t_connection_id,
                    t_o_connection_id: connection.info.t_o_connection_id,
                });
                self.connection = Some(connection);
                self.state = ConnectionState::Open;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Idle;
                Err(e)
            }
        }
    }

    /// Forward_Open with 32-bit connection parameters.
    pub async fn large_forward_open(&mut self) -> Result<()> {
        self.forward_open(true).await
    }

    async fn open_connection(&mut self, large: bool) -> Result<OpenConnection> {
        let device = self.device_ipv4()?;
        let o_t = self.config.o_t;
        let t_o = self.config.t_o;
        let path = ConnectionPath::new(
            self.config.assembly_class,
            self.config.configuration_instance,
            &o_t,
            &t_o,
        );
        let request = ForwardOpenRequest::new(large, o_t, t_o, path)?;
        let items = request.socket_items(self.config.originator_udp_port, device);

        let response = self.session.send_unconnected(&request.to_request(), items).await?;
        let reply = ForwardOpenReply::parse(&response.reply.data, &response.items)?;
        let info = ConnectionInfo::negotiate(&request, &reply, device, self.config.target_udp_port);

        match self.start_pump(&info, device).await {
            Ok(pump) => Ok(OpenConnection { info, path, pump }),
            Err(e) => {
                // The device holds an open connection now
                let close = ForwardCloseRequest {
                    serial_number: info.serial_number,
                    path,
                };
                if let Err(close_err) = self.session.send_unconnected(&close.to_request(), Vec::new()).await {
                    tracing::warn!(error = %close_err, "Forward_Close after failed setup failed");
                }
                Err(e)
            }
        }
    }

    async fn start_pump(&mut self, info: &ConnectionInfo, device: Ipv4Addr) -> Result<IoPump> {
        let socket = bind_receive_socket(self.config.originator_udp_port, info.multicast_group).await?;

        self.o_t_data.resize(self.config.o_t.length as usize);
        self.t_o_data.resize(self.config.t_o.length as usize);

        let config = PumpConfig {
            o_t_connection_id: info.o_t_connection_id,
            t_o_connection_id: info.t_o_connection_id,
            o_t_format: self.config.o_t.real_time_format,
            t_o_format: self.config.t_o.real_time_format,
            period: send_period(self.config.o_t.requested_packet_rate_us),
            target: SocketAddr::new(IpAddr::V4(device), info.target_udp_port),
        };
        let shared = PumpShared {
            o_t: self.o_t_data.clone(),
            t_o: self.t_o_data.clone(),
            last_received: self.last_received.clone(),
            events: self.event_tx.clone(),
        };
        IoPump::start(config, socket, shared).await
    }

    /// Close the class-1 connection with Forward_Close.
    ///
    /// The I/O tasks are stopped and the sockets closed whatever the device
    /// answers; a rejected Forward_Close is still returned as an error.
    pub async fn forward_close(&mut self) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(EnipError::invalid_state(format!(
                "Forward_Close while connection is {:?}",
                self.state
            )));
        }
        let Some(connection) = self.connection.take() else {
            self.state = ConnectionState::Idle;
            return Err(EnipError::invalid_state("No open connection"));
        };

        self.state = ConnectionState::Closing;
        connection.pump.cancel();

        let close = ForwardCloseRequest {
            serial_number: connection.info.serial_number,
            path: connection.path,
        };
        let result = self
            .session
            .send_unconnected(&close.to_request(), Vec::new())
            .await
            .map(|_| ());

        connection.pump.join().await;
        self.state = ConnectionState::Idle;
        self.emit_event(EipEvent::ConnectionClosed);
        tracing::debug!(serial = close.serial_number, "connection closed");
        result
    }

    fn device_ipv4(&self) -> Result<Ipv4Addr> {
        let ip = match self.session.peer_ip() {
            Some(ip) => ip,
            None => self
                .config
                .address
                .parse::<IpAddr>()
                .map_err(|_| EnipError::invalid_state("Device address unknown"))?,
        };
        match ip {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .ok_or_else(|| EnipError::invalid_state("Class-1 connections need an IPv4 device")),
        }
    }

    /// Copy of the O→T data.
    pub fn o_t_data(&self) -> Vec<u8> {
        self.o_t_data.snapshot()
    }

    /// Write O→T data, sent with the next datagram. Returns bytes copied.
    pub fn set_o_t_data(&self, data: &[u8]) -> usize {
        self.o_t_data.write(data)
    }

    /// Copy of the latest T→O data.
    pub fn t_o_data(&self) -> Vec<u8> {
        self.t_o_data.snapshot()
    }

    /// Time of the last accepted T→O datagram.
    pub fn last_received_implicit_message(&self) -> Option<Instant> {
        self.last_received.get()
    }

    /// Shared handle to the O→T buffer.
    ///
    /// The handle stays valid across Forward_Open and Forward_Close and can
    /// be used from other tasks while an explicit request is in flight.
    pub fn o_t_buffer(&self) -> IoBuffer {
        self.o_t_data.clone()
    }

    /// Shared handle to the T→O buffer.
    pub fn t_o_buffer(&self) -> IoBuffer {
        self.t_o_data.clone()
    }

    /// Shared handle to the last-received timestamp.
    pub fn last_received(&self) -> LastReceived {
        self.last_received.clone()
    }

    fn emit_event(&self, event: EipEvent) {
        let _ = self.event_tx.try_send(event);
    }
}

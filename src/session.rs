//! Explicit messaging session over TCP.
//!
//! A [`SessionChannel`] owns the TCP stream and the device-assigned session
//! handle. Requests are strictly sequential: a response is matched to the
//! request sent just before it, never by sender context.

use std::net::IpAddr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::codec::{EncapsulationCodec, EncapsulationPacket};
use crate::error::{EnipError, Result};
use crate::types::{
    Command, CommonPacketFormat, CpfItem, MessageRouterRequest, MessageRouterResponse,
    ITEM_UNCONNECTED_DATA,
};

/// Default EtherNet/IP TCP port (0xAF12).
pub const DEFAULT_TCP_PORT: u16 = 44818;

/// Encapsulation protocol version sent in RegisterSession.
pub const PROTOCOL_VERSION: u16 = 1;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No TCP connection
    Disconnected,
    /// RegisterSession in flight
    Registering,
    /// Session handle assigned, explicit messaging allowed
    Registered,
    /// UnRegisterSession in flight
    Unregistering,
}

/// Reply to a SendRRData request.
#[derive(Debug, Clone)]
pub struct UnconnectedResponse {
    /// Message Router reply from the unconnected data item
    pub reply: MessageRouterResponse,
    /// Every CPF item of the reply, in wire order
    pub items: CommonPacketFormat,
}

/// TCP session with one device.
pub struct SessionChannel {
    framed: Option<Framed<TcpStream, EncapsulationCodec>>,
    session_handle: u32,
    state: SessionState,
    host: String,
    port: u16,
}

impl SessionChannel {
    /// Create an unregistered channel.
    pub fn new() -> Self {
        Self {
            framed: None,
            session_handle: 0,
            state: SessionState::Disconnected,
            host: String::new(),
            port: DEFAULT_TCP_PORT,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session handle (0 if not registered).
    pub fn session_handle(&self) -> u32 {
        self.session_handle
    }

    /// Check for a registered session.
    pub fn is_registered(&self) -> bool {
        self.state == SessionState::Registered
    }

    /// Host of the registered session.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port of the registered session.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolved address of the connected device.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        let framed = self.framed.as_ref()?;
        framed.get_ref().peer_addr().ok().map(|addr| addr.ip())
    }

    /// Open a TCP connection and register a session.
    ///
    /// Returns the cached handle without touching the network if a session
    /// is already registered.
    pub async fn register(
        &mut self,
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
    ) -> Result<u32> {
        if self.is_registered() {
            tracing::debug!(handle = self.session_handle, "session already registered");
            return Ok(self.session_handle);
        }

        self.state = SessionState::Registering;
        let result = self.open_and_register(host, port, connect_timeout).await;
        match result {
            Ok(handle) => {
                self.session_handle = handle;
                self.state = SessionState::Registered;
                self.host = host.to_string();
                self.port = port;
                tracing::debug!(handle, host, port, "session registered");
                Ok(handle)
            }
            Err(e) => {
                // Drops (and closes) the stream before the error propagates
                self.framed = None;
                self.session_handle = 0;
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open_and_register(
        &mut self,
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
    ) -> Result<u32> {
        let connect = TcpStream::connect((host, port));
        let stream = match connect_timeout {
            Some(limit) => timeout(limit, connect)
                .await
                .map_err(|_| EnipError::ConnectionTimeout)?,
            None => connect.await,
        }
        .map_err(|e| EnipError::Connection(format!("connect to {}:{} failed: {}", host, port, e)))?;

        stream.set_nodelay(true).ok();
        let framed = self.framed.insert(Framed::new(stream, EncapsulationCodec::new()));

        let mut data = BytesMut::with_capacity(4);
        data.put_u16_le(PROTOCOL_VERSION);
        data.put_u16_le(0); // options
        framed
            .send(EncapsulationPacket::new(Command::RegisterSession, 0, data.freeze()))
            .await
            .map_err(|e| EnipError::Connection(format!("RegisterSession send failed: {}", e)))?;

        let reply = Self::next_packet(framed).await?;
        if reply.header.status != 0 {
            return Err(EnipError::EncapsulationStatus(reply.header.status));
        }
        Ok(reply.header.session_handle)
    }

    /// Unregister the session and close the stream.
    ///
    /// The UnRegisterSession send is best-effort; the stream is closed and the
    /// handle reset even if it fails. A no-op when not registered.
    pub async fn unregister(&mut self) {
        let Some(mut framed) = self.framed.take() else {
            self.session_handle = 0;
            self.state = SessionState::Disconnected;
            return;
        };

        self.state = SessionState::Unregistering;
        let packet = EncapsulationPacket::new(Command::UnRegisterSession, self.session_handle, Bytes::new());
        if let Err(e) = framed.send(packet).await {
            tracing::warn!(error = %e, handle = self.session_handle, "UnRegisterSession send failed");
        }
        if let Err(e) = SinkExt::<EncapsulationPacket>::close(&mut framed).await {
            tracing::debug!(error = %e, "closing session stream failed");
        }
        drop(framed);

        tracing::debug!(handle = self.session_handle, "session unregistered");
        self.session_handle = 0;
        self.state = SessionState::Disconnected;
    }

    /// Send a SendRRData request and return the Message Router reply.
    ///
    /// `extra_items` are appended after the unconnected data item (e.g. a
    /// sockaddr info item for Forward_Open). A non-zero general status is
    /// returned as [`EnipError::CipService`].
    pub async fn send_unconnected(
        &mut self,
        request: &MessageRouterRequest,
        extra_items: Vec<CpfItem>,
    ) -> Result<UnconnectedResponse> {
        if !self.is_registered() {
            return Err(EnipError::NotRegistered);
        }
        let session_handle = self.session_handle;

        let mut cpf = CommonPacketFormat::unconnected(request.encode());
        for item in extra_items {
            cpf.push(item);
        }
        let mut data = BytesMut::with_capacity(6 + cpf.encoded_len());
        data.put_u32_le(0); // interface handle (CIP)
        data.put_u16_le(0); // timeout
        cpf.encode_to(&mut data);

        let packet = EncapsulationPacket::new(Command::SendRRData, session_handle, data.freeze());
        let reply = match self.exchange(packet).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_connection_error() {
                    self.mark_lost();
                }
                return Err(e);
            }
        };

        if reply.header.status != 0 {
            return Err(EnipError::EncapsulationStatus(reply.header.status));
        }
        let response = parse_rr_data(&reply.data)?;
        tracing::trace!(
            service = response.reply.service,
            status = response.reply.general_status,
            len = response.reply.data.len(),
            "explicit reply"
        );
        response.reply.clone().into_result()?;
        Ok(response)
    }

    async fn exchange(&mut self, packet: EncapsulationPacket) -> Result<EncapsulationPacket> {
        let framed = self.framed.as_mut().ok_or(EnipError::NotRegistered)?;
        framed
            .send(packet)
            .await
            .map_err(|e| EnipError::Connection(format!("request send failed: {}", e)))?;
        Self::next_packet(framed).await
    }

    async fn next_packet(
        framed: &mut Framed<TcpStream, EncapsulationCodec>,
    ) -> Result<EncapsulationPacket> {
        match framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(EnipError::Io(e))) => Err(EnipError::Connection(format!("read failed: {}", e))),
            Some(Err(e)) => Err(e),
            None => Err(EnipError::Connection("connection closed by peer".into())),
        }
    }

    fn mark_lost(&mut self) {
        tracing::warn!(handle = self.session_handle, "session lost");
        self.framed = None;
        self.session_handle = 0;
        self.state = SessionState::Disconnected;
    }
}

impl Default for SessionChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse SendRRData command data: interface handle, timeout, CPF.
pub fn parse_rr_data(data: &[u8]) -> Result<UnconnectedResponse> {
    if data.len() < 6 {
        return Err(EnipError::malformed(format!(
            "SendRRData reply needs 6 bytes before CPF, got {}",
            data.len()
        )));
    }
    let items = CommonPacketFormat::parse(&data[6..])?;
    let item = items
        .find(ITEM_UNCONNECTED_DATA)
        .ok_or_else(|| EnipError::malformed("Reply lacks an unconnected data item"))?;
    let reply = MessageRouterResponse::parse(&item.data)?;
    Ok(UnconnectedResponse { reply, items })
}

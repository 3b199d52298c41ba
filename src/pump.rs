//! Cyclic class-1 I/O over UDP.
//!
//! While a connection is open an [`IoPump`] runs two tasks: one sends the
//! O→T buffer every packet interval, the other stores matching T→O
//! datagrams into the T→O buffer. Both stop on a shared
//! [`CancellationToken`].
//!
//! ```text
//! O→T datagram
//! +-------+--------+-----+-------+----------+--------+-----+------------------------+
//! | Count | 0x8002 | 8   | CID   | Sequence | 0x00B1 | Len | [seq:2][run/idle:4]data |
//! | 2     | 2      | 2   | 4     | 4        | 2      | 2   | Len                    |
//! +-------+--------+-----+-------+----------+--------+-----+------------------------+
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::EipEvent;
use crate::error::{EnipError, Result};
use crate::types::{RealTimeFormat, ITEM_CONNECTED_DATA, ITEM_SEQUENCED_ADDRESS};

/// Shortest datagram that can hold both item headers.
pub const MIN_DATAGRAM_LEN: usize = 20;

/// Largest datagram read from the receive socket.
const RECV_BUFFER_LEN: usize = 1500;

/// Run/idle header value for "run".
const RUN: u32 = 1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fixed-length I/O buffer shared between the application and the pump.
///
/// Every access copies under the lock, so a reader never sees a mix of two
/// writes.
#[derive(Debug, Clone, Default)]
pub struct IoBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl IoBuffer {
    /// Create a zero-filled buffer.
    pub fn new(len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    /// Buffer length.
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Check for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        lock(&self.inner).clone()
    }

    /// Overwrite the buffer from the start.
    ///
    /// Bytes beyond the buffer length are ignored; a shorter `data` leaves
    /// the tail unchanged. Returns the number of bytes copied.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut buf = lock(&self.inner);
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        n
    }

    /// Change the length, zero-filling new bytes.
    pub fn resize(&self, len: usize) {
        lock(&self.inner).resize(len, 0);
    }
}

/// Time of the last accepted T→O datagram.
#[derive(Debug, Clone, Default)]
pub struct LastReceived {
    inner: Arc<Mutex<Option<Instant>>>,
}

impl LastReceived {
    /// Create an empty timestamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last receive time, if any datagram was accepted.
    pub fn get(&self) -> Option<Instant> {
        *lock(&self.inner)
    }

    fn touch(&self) {
        *lock(&self.inner) = Some(Instant::now());
    }

    fn clear(&self) {
        *lock(&self.inner) = None;
    }
}

/// Build one O→T datagram.
pub fn build_o_t_datagram(
    connection_id: u32,
    sequence: u32,
    format: RealTimeFormat,
    data: &[u8],
) -> BytesMut {
    let payload: &[u8] = match format {
        RealTimeFormat::Heartbeat => &[],
        _ => data,
    };
    let item_len = format.header_len() + payload.len();

    let mut buf = BytesMut::with_capacity(18 + item_len);
    buf.put_u16_le(2);
    buf.put_u16_le(ITEM_SEQUENCED_ADDRESS);
    buf.put_u16_le(8);
    buf.put_u32_le(connection_id);
    buf.put_u32_le(sequence);
    buf.put_u16_le(ITEM_CONNECTED_DATA);
    buf.put_u16_le(item_len as u16);
    if format.has_sequence_count() {
        buf.put_u16_le(sequence as u16);
    }
    if format == RealTimeFormat::Header32Bit {
        buf.put_u32_le(RUN);
    }
    buf.put_slice(payload);
    buf
}

/// Extract the T→O data of a datagram addressed to `connection_id`.
///
/// Returns `None` for short datagrams and foreign connection IDs.
pub fn parse_t_o_datagram(
    datagram: &[u8],
    connection_id: u32,
    format: RealTimeFormat,
) -> Option<&[u8]> {
    if datagram.len() < MIN_DATAGRAM_LEN {
        return None;
    }
    let id = u32::from_le_bytes([datagram[6], datagram[7], datagram[8], datagram[9]]);
    if id != connection_id {
        return None;
    }
    let item_len = u16::from_le_bytes([datagram[16], datagram[17]]) as usize;
    let end = (18 + item_len).min(datagram.len());
    let start = (18 + format.header_len()).min(end);
    Some(&datagram[start..end])
}

/// Bind the T→O receive socket and join the multicast group, if any.
pub async fn bind_receive_socket(port: u16, multicast: Option<Ipv4Addr>) -> Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .map_err(|e| EnipError::Connection(format!("bind UDP port {} failed: {}", port, e)))?;
    if let Some(group) = multicast {
        socket
            .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
            .map_err(|e| EnipError::Connection(format!("join {} failed: {}", group, e)))?;
        tracing::debug!(%group, port, "joined multicast group");
    }
    Ok(socket)
}

/// Send interval for a requested packet interval, at least one millisecond.
pub fn send_period(requested_packet_rate_us: u32) -> Duration {
    Duration::from_millis(u64::from((requested_packet_rate_us / 1000).max(1)))
}

/// Static parameters of a running pump.
#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    /// O→T connection ID
    pub o_t_connection_id: u32,
    /// T→O connection ID
    pub t_o_connection_id: u32,
    /// O→T real-time format
    pub o_t_format: RealTimeFormat,
    /// T→O real-time format
    pub t_o_format: RealTimeFormat,
    /// Time between O→T datagrams
    pub period: Duration,
    /// Device address the O→T datagrams go to
    pub target: SocketAddr,
}

/// Buffers and event sink shared with the application.
#[derive(Debug, Clone)]
pub struct PumpShared {
    /// O→T data, written by the application
    pub o_t: IoBuffer,
    /// T→O data, written by the receive task
    pub t_o: IoBuffer,
    /// Time of the last accepted datagram
    pub last_received: LastReceived,
    /// Event sink
    pub events: mpsc::Sender<EipEvent>,
}

/// Running send and receive tasks of one connection.
///
/// Dropping the pump cancels both tasks without waiting for them.
pub struct IoPump {
    token: CancellationToken,
    send_task: Option<JoinHandle<()>>,
    recv_task: Option<JoinHandle<()>>,
}

impl IoPump {
    /// Start both tasks. `recv_socket` moves into the receive task.
    pub async fn start(config: PumpConfig, recv_socket: UdpSocket, shared: PumpShared) -> Result<Self> {
        let bind_addr: SocketAddr = match config.target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let send_socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| EnipError::Connection(format!("bind UDP send socket failed: {}", e)))?;

        shared.last_received.clear();
        let token = CancellationToken::new();
        let send_task = tokio::spawn(send_loop(config, send_socket, shared.o_t.clone(), token.clone()));
        let recv_task = tokio::spawn(recv_loop(config, recv_socket, shared, token.clone()));

        tracing::debug!(
            o_t = config.o_t_connection_id,
            t_o = config.t_o_connection_id,
            target = %config.target,
            period_ms = config.period.as_millis() as u64,
            "I/O pump started"
        );
        Ok(Self {
            token,
            send_task: Some(send_task),
            recv_task: Some(recv_task),
        })
    }

    /// Signal both tasks to stop. Takes effect before the next send or
    /// receive.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check whether stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for both tasks, which closes both sockets.
    pub async fn join(mut self) {
        self.token.cancel();
        let tasks = [("send", self.send_task.take()), ("receive", self.recv_task.take())];
        for (name, task) in tasks {
            let Some(task) = task else { continue };
            if let Err(e) = task.await {
                tracing::warn!(task = name, error = %e, "I/O task ended abnormally");
            }
        }
        tracing::debug!("I/O pump stopped");
    }
}

impl Drop for IoPump {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn send_loop(
    config: PumpConfig,
    socket: UdpSocket,
    o_t: IoBuffer,
    token: CancellationToken,
) {
    let mut ticker = interval(config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        sequence = sequence.wrapping_add(1);
        let data = o_t.snapshot();
        let datagram =
            build_o_t_datagram(config.o_t_connection_id, sequence, config.o_t_format, &data);

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = socket.send_to(&datagram, config.target) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, target = %config.target, "O→T send failed");
                } else {
                    tracing::trace!(sequence, len = datagram.len(), "O→T sent");
                }
            }
        }
    }
}

async fn recv_loop(
    config: PumpConfig,
    socket: UdpSocket,
    shared: PumpShared,
    token: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    loop {
        let len = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, _from)) => len,
                Err(_) if token.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!(error = %e, "T→O receive failed");
                    let _ = shared.events.try_send(EipEvent::ReceiveError(e.to_string()));
                    break;
                }
            },
        };

        let Some(data) =
            parse_t_o_datagram(&buf[..len], config.t_o_connection_id, config.t_o_format)
        else {
            tracing::trace!(len, "T→O datagram discarded");
            continue;
        };

        shared.t_o.write(data);
        shared.last_received.touch();
        let _ = shared.events.try_send(EipEvent::ImplicitMessageReceived {
            connection_id: config.t_o_connection_id,
        });
    }
}

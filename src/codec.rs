//! EtherNet/IP encapsulation codec for tokio.
//!
//! This module provides a codec implementation for encoding and decoding
//! encapsulation packets using the tokio-util codec framework.
//!
//! ```text
//! +---------+--------+----------------+----------+------------------+---------+------
//! | Command | Length | Session handle | Status   | Sender context   | Options | Data
//! | 2 bytes | 2      | 4              | 4        | 8                | 4       | Length
//! +---------+--------+----------------+----------+------------------+---------+------
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{EnipError, Result};
use crate::types::Command;

/// Size of the fixed encapsulation header.
pub const HEADER_LEN: usize = 24;

/// Largest command-specific data accepted from a peer.
pub const MAX_DATA_LEN: usize = 65_511;

/// Encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapsulationHeader {
    /// Raw command code
    pub command: u16,
    /// Length of the command-specific data
    pub length: u16,
    /// Session handle
    pub session_handle: u32,
    /// Status (0 = success)
    pub status: u32,
    /// Sender context, echoed by the target
    pub sender_context: [u8; 8],
    /// Options (always 0)
    pub options: u32,
}

impl EncapsulationHeader {
    /// Decode the 24-byte header.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(EnipError::malformed(format!(
                "Encapsulation header needs {} bytes, got {}",
                HEADER_LEN,
                data.len()
            )));
        }
        let mut sender_context = [0u8; 8];
        sender_context.copy_from_slice(&data[12..20]);
        Ok(Self {
            command: u16::from_le_bytes([data[0], data[1]]),
            length: u16::from_le_bytes([data[2], data[3]]),
            session_handle: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            status: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            sender_context,
            options: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
        })
    }

    /// Encode the header into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.command);
        dst.put_u16_le(self.length);
        dst.put_u32_le(self.session_handle);
        dst.put_u32_le(self.status);
        dst.put_slice(&self.sender_context);
        dst.put_u32_le(self.options);
    }
}

/// An encapsulation packet: header plus command-specific data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulationPacket {
    /// Header
    pub header: EncapsulationHeader,
    /// Command-specific data
    pub data: Bytes,
}

impl EncapsulationPacket {
    /// Create a request packet. Status, sender context and options are zero.
    pub fn new(command: Command, session_handle: u32, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            header: EncapsulationHeader {
                command: command.as_u16(),
                length: data.len() as u16,
                session_handle,
                status: 0,
                sender_context: [0; 8],
                options: 0,
            },
            data,
        }
    }

    /// Parsed command code.
    pub fn command(&self) -> Result<Command> {
        Command::from_u16(self.header.command)
    }

    /// Encoded length.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Encode into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) -> Result<()> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(EnipError::Codec(format!(
                "Encapsulation data too large: {} bytes",
                self.data.len()
            )));
        }
        dst.reserve(self.encoded_len());
        let mut header = self.header;
        header.length = self.data.len() as u16;
        header.encode_to(dst);
        dst.put_slice(&self.data);
        Ok(())
    }

    /// Encode into a new buffer.
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf)?;
        Ok(buf)
    }

    /// Decode a complete packet. Trailing bytes beyond `length` are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = EncapsulationHeader::decode(data)?;
        let end = HEADER_LEN + header.length as usize;
        if data.len() < end {
            return Err(EnipError::malformed(format!(
                "Encapsulation declares {} data bytes, {} available",
                header.length,
                data.len() - HEADER_LEN
            )));
        }
        Ok(Self {
            header,
            data: Bytes::copy_from_slice(&data[HEADER_LEN..end]),
        })
    }
}

impl std::fmt::Display for EncapsulationPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.command() {
            Ok(cmd) => write!(f, "{}", cmd)?,
            Err(_) => write!(f, "Command(0x{:04X})", self.header.command)?,
        }
        write!(
            f,
            " session=0x{:08X} status=0x{:08X} len={}",
            self.header.session_handle, self.header.status, self.header.length
        )
    }
}

/// EtherNet/IP encapsulation codec.
///
/// Frames the TCP byte stream into whole [`EncapsulationPacket`]s, so a
/// response is only handed out once header and body have both arrived.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use voltage_enip::codec::EncapsulationCodec;
///
/// let stream = TcpStream::connect("192.168.0.10:44818").await?;
/// let mut framed = Framed::new(stream, EncapsulationCodec::new());
///
/// framed.send(EncapsulationPacket::new(Command::Nop, 0, Bytes::new())).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct EncapsulationCodec {
    state: DecodeState,
}

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    WaitingForHeader,
    WaitingForData {
        header: EncapsulationHeader,
    },
}

impl EncapsulationCodec {
    /// Create a new encapsulation codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for EncapsulationCodec {
    type Item = EncapsulationPacket;
    type Error = EnipError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::WaitingForHeader => {
                    if src.len() < HEADER_LEN {
                        src.reserve(HEADER_LEN - src.len());
                        return Ok(None);
                    }
                    let header = EncapsulationHeader::decode(&src[..HEADER_LEN])?;
                    src.advance(HEADER_LEN);
                    self.state = DecodeState::WaitingForData { header };
                }

                DecodeState::WaitingForData { header } => {
                    let length = header.length as usize;
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }
                    let data = src.split_to(length).freeze();
                    self.state = DecodeState::WaitingForHeader;
                    return Ok(Some(EncapsulationPacket { header, data }));
                }
            }
        }
    }
}

impl Encoder<EncapsulationPacket> for EncapsulationCodec {
    type Error = EnipError;

    fn encode(
        &mut self,
        item: EncapsulationPacket,
        dst: &mut BytesMut,
    ) -> std::result::Result<(), Self::Error> {
        item.encode_to(dst)
    }
}

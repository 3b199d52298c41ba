//! CIP logical path (EPath) segments.
//!
//! Each logical segment is either an 8-bit form (type byte + value) or a
//! padded 16-bit form (type byte + pad byte + value, little-endian):
//!
//! ```text
//! 8-bit:   [0x20] [class]
//! 16-bit:  [0x21] [0x00] [class lo] [class hi]
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{EnipError, Result};

/// Logical segment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Class ID
    Class,
    /// Instance ID
    Instance,
    /// Attribute ID
    Attribute,
    /// Connection point (used in connection paths)
    ConnectionPoint,
}

impl SegmentKind {
    /// Segment type byte for the 8-bit form.
    #[inline]
    pub const fn short_type(self) -> u8 {
        match self {
            Self::Class => 0x20,
            Self::Instance => 0x24,
            Self::ConnectionPoint => 0x2C,
            Self::Attribute => 0x30,
        }
    }

    /// Segment type byte for the padded 16-bit form.
    #[inline]
    pub const fn long_type(self) -> u8 {
        self.short_type() | 0x01
    }

    fn from_type_byte(byte: u8) -> Option<(Self, bool)> {
        let kind = match byte & 0xFE {
            0x20 => Self::Class,
            0x24 => Self::Instance,
            0x2C => Self::ConnectionPoint,
            0x30 => Self::Attribute,
            _ => return None,
        };
        Some((kind, byte & 0x01 != 0))
    }
}

/// Append one logical segment, picking the short form for values below 0xFF.
pub fn put_segment(dst: &mut BytesMut, kind: SegmentKind, value: u16) {
    if value < 0xFF {
        dst.put_u8(kind.short_type());
        dst.put_u8(value as u8);
    } else {
        dst.put_u8(kind.long_type());
        dst.put_u8(0x00);
        dst.put_u16_le(value);
    }
}

/// Encoded length of one segment.
#[inline]
pub const fn segment_len(value: u16) -> usize {
    if value < 0xFF {
        2
    } else {
        4
    }
}

/// A class/instance/attribute request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EPath {
    /// Class ID
    pub class_id: u16,
    /// Instance ID (0 addresses the class itself)
    pub instance_id: u16,
    /// Attribute ID (0 omits the attribute segment)
    pub attribute_id: u16,
}

impl EPath {
    /// Create a new path.
    pub const fn new(class_id: u16, instance_id: u16, attribute_id: u16) -> Self {
        Self {
            class_id,
            instance_id,
            attribute_id,
        }
    }

    /// Encoded length in bytes (always even).
    pub const fn encoded_len(&self) -> usize {
        let mut len = segment_len(self.class_id) + segment_len(self.instance_id);
        if self.attribute_id != 0 {
            len += segment_len(self.attribute_id);
        }
        len
    }

    /// Path size in 16-bit words, as sent after the service code.
    pub const fn word_len(&self) -> u8 {
        (self.encoded_len() / 2) as u8
    }

    /// Encode the path into `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        put_segment(dst, SegmentKind::Class, self.class_id);
        put_segment(dst, SegmentKind::Instance, self.instance_id);
        if self.attribute_id != 0 {
            put_segment(dst, SegmentKind::Attribute, self.attribute_id);
        }
    }

    /// Encode the path into a new buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Decode a class/instance[/attribute] path.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut path = Self::new(0, 0, 0);
        let mut seen_class = false;
        let mut seen_instance = false;
        let mut pos = 0;

        while pos < data.len() {
            let (kind, long) = SegmentKind::from_type_byte(data[pos]).ok_or_else(|| {
                EnipError::Codec(format!("Unsupported path segment 0x{:02X}", data[pos]))
            })?;
            let value = if long {
                if data.len() < pos + 4 {
                    return Err(EnipError::Codec("Truncated 16-bit path segment".into()));
                }
                let v = u16::from_le_bytes([data[pos + 2], data[pos + 3]]);
                pos += 4;
                v
            } else {
                if data.len() < pos + 2 {
                    return Err(EnipError::Codec("Truncated 8-bit path segment".into()));
                }
                let v = data[pos + 1] as u16;
                pos += 2;
                v
            };

            match kind {
                SegmentKind::Class => {
                    path.class_id = value;
                    seen_class = true;
                }
                SegmentKind::Instance => {
                    path.instance_id = value;
                    seen_instance = true;
                }
                SegmentKind::Attribute => path.attribute_id = value,
                SegmentKind::ConnectionPoint => {
                    return Err(EnipError::Codec(
                        "Connection point segment in request path".into(),
                    ))
                }
            }
        }

        if !seen_class || !seen_instance {
            return Err(EnipError::Codec("Path lacks class or instance".into()));
        }
        Ok(path)
    }
}

//! Bolt packet framing (protocol v1 and v2).
//!
//! v1 request layout (22 byte header):
//!
//! ```text
//! +-------+------+---------+------+-----------+-------+-----------+
//! | proto | type | cmdcode | ver2 | packet_id | codec | timeout   |
//! | 0x01  | 1 B  | u16     | 0x01 | u32       | 1 B   | i32       |
//! +-------+------+---------+------+-----------+-------+-----------+
//! | class_len u16 | header_len u16 | content_len u32               |
//! +---------------+----------------+-------------------------------+
//! | class name | header block | content                           |
//! +------------+--------------+-----------------------------------+
//! ```
//!
//! v1 responses carry a `u16` status in place of the timeout (20 bytes).
//!
//! v2 inserts a bolt version byte after `proto` (0x02) and a CRC flag byte
//! after `codec`, giving 24 byte request and 22 byte response headers. When
//! the CRC flag is set, a big endian CRC32 (IEEE) over every preceding byte
//! of the packet trails the content.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_CODE_V1: u8 = 0x01;
pub const PROTOCOL_CODE_V2: u8 = 0x02;

/// Second version byte; always 0x01 on the wire.
pub const VERSION2: u8 = 0x01;

pub const V1_REQUEST_HEADER_LEN: usize = 22;
pub const V1_RESPONSE_HEADER_LEN: usize = 20;
pub const V2_REQUEST_HEADER_LEN: usize = 24;
pub const V2_RESPONSE_HEADER_LEN: usize = 22;

/// Trailing CRC32 size.
pub const CRC_LEN: usize = 4;

/// Default upper bound on a whole packet (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Offset of the CRC flag byte in a v2 header.
const V2_CRC_FLAG_OFFSET: usize = 11;

/// Wire protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BoltProtocol {
    #[default]
    #[serde(rename = "bolt")]
    V1,
    #[serde(rename = "bolt2")]
    V2,
}

impl BoltProtocol {
    pub fn code(&self) -> u8 {
        match self {
            BoltProtocol::V1 => PROTOCOL_CODE_V1,
            BoltProtocol::V2 => PROTOCOL_CODE_V2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            PROTOCOL_CODE_V1 => Ok(BoltProtocol::V1),
            PROTOCOL_CODE_V2 => Ok(BoltProtocol::V2),
            other => Err(ProtocolError::UnknownProtocol(other)),
        }
    }

    /// Fixed header length for the given rpc type.
    pub fn header_len(&self, rpc_type: RpcType) -> usize {
        match (self, rpc_type.is_response()) {
            (BoltProtocol::V1, false) => V1_REQUEST_HEADER_LEN,
            (BoltProtocol::V1, true) => V1_RESPONSE_HEADER_LEN,
            (BoltProtocol::V2, false) => V2_REQUEST_HEADER_LEN,
            (BoltProtocol::V2, true) => V2_RESPONSE_HEADER_LEN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoltProtocol::V1 => "bolt",
            BoltProtocol::V2 => "bolt2",
        }
    }
}

impl fmt::Display for BoltProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoltProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bolt" | "v1" | "1" => Ok(BoltProtocol::V1),
            "bolt2" | "v2" | "2" => Ok(BoltProtocol::V2),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcType {
    Response = 0,
    Request = 1,
    RequestOneway = 2,
}

impl RpcType {
    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(RpcType::Response),
            1 => Ok(RpcType::Request),
            2 => Ok(RpcType::RequestOneway),
            other => Err(ProtocolError::UnknownRpcType(other)),
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, RpcType::Response)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Heartbeat = 0,
    RpcRequest = 1,
    RpcResponse = 2,
}

impl CommandCode {
    pub fn from_code(code: u16) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(CommandCode::Heartbeat),
            1 => Ok(CommandCode::RpcRequest),
            2 => Ok(CommandCode::RpcResponse),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// Content serialization carried in the codec byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    #[default]
    Hessian2,
    Protobuf,
}

impl CodecType {
    pub fn code(&self) -> u8 {
        match self {
            CodecType::Hessian2 => 1,
            CodecType::Protobuf => 11,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            1 => Ok(CodecType::Hessian2),
            11 => Ok(CodecType::Protobuf),
            other => Err(ProtocolError::UnknownCodec(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecType::Hessian2 => "hessian2",
            CodecType::Protobuf => "protobuf",
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hessian2" | "hessian" => Ok(CodecType::Hessian2),
            "protobuf" => Ok(CodecType::Protobuf),
            other => Err(format!("unknown codec: {other}")),
        }
    }
}

/// Fixed header fields of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub protocol: BoltProtocol,
    /// Only written by v2.
    pub bolt_version: u8,
    pub rpc_type: RpcType,
    pub cmd_code: CommandCode,
    pub packet_id: u32,
    pub codec: CodecType,
    /// Only honored by v2.
    pub crc_enabled: bool,
    /// Request timeout in milliseconds. Ignored for responses.
    pub timeout_ms: i32,
    /// Response status code. Ignored for requests.
    pub status: u16,
}

impl FrameHeader {
    pub fn header_len(&self) -> usize {
        self.protocol.header_len(self.rpc_type)
    }

    fn has_crc(&self) -> bool {
        self.protocol == BoltProtocol::V2 && self.crc_enabled
    }
}

/// A split but not yet content-decoded packet.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub header: FrameHeader,
    pub class_name: Bytes,
    pub header_block: Bytes,
    pub content: Bytes,
    /// Total packet size on the wire.
    pub size: usize,
}

/// Encodes one packet. `content` appends the content block to the buffer it
/// is handed; its length is patched into the header afterwards.
pub fn encode_frame<F>(
    header: &FrameHeader,
    class_name: &[u8],
    header_block: &[u8],
    content: F,
) -> Result<BytesMut, ProtocolError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), ProtocolError>,
{
    let class_len = checked_u16(class_name.len(), "class name")?;
    let header_len = checked_u16(header_block.len(), "header block")?;

    let fixed = header.header_len();
    let mut buf = BytesMut::with_capacity(fixed + class_name.len() + header_block.len() + 64);

    buf.put_u8(header.protocol.code());
    if header.protocol == BoltProtocol::V2 {
        buf.put_u8(header.bolt_version);
    }
    buf.put_u8(header.rpc_type as u8);
    buf.put_u16(header.cmd_code as u16);
    buf.put_u8(VERSION2);
    buf.put_u32(header.packet_id);
    buf.put_u8(header.codec.code());
    if header.protocol == BoltProtocol::V2 {
        buf.put_u8(if header.crc_enabled { 0x01 } else { 0x00 });
    }
    if header.rpc_type.is_response() {
        buf.put_u16(header.status);
    } else {
        buf.put_i32(header.timeout_ms);
    }

    // Length fields, patched once the content size is known.
    let lengths_at = buf.len();
    buf.put_bytes(0, 8);
    debug_assert_eq!(buf.len(), fixed);

    buf.put_slice(class_name);
    buf.put_slice(header_block);
    let content_at = buf.len();
    content(&mut buf)?;
    let content_len = buf.len() - content_at;
    let content_len = i32::try_from(content_len).map_err(|_| ProtocolError::FrameTooLarge {
        field: "content",
        size: content_len,
        max: i32::MAX as usize,
    })?;

    let mut lengths = &mut buf[lengths_at..lengths_at + 8];
    lengths.put_u16(class_len);
    lengths.put_u16(header_len);
    lengths.put_i32(content_len);

    if header.has_crc() {
        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);
    }
    Ok(buf)
}

fn checked_u16(len: usize, field: &'static str) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        field,
        size: len,
        max: u16::MAX as usize,
    })
}

/// Computes the total length of the packet at the start of `buf` from its
/// fixed header fields. Returns `Ok(None)` until the fixed header is
/// complete. Packets declaring more than [`MAX_FRAME_SIZE`] bytes fail with
/// [`ProtocolError::FrameTooLarge`].
pub fn packet_length(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    packet_length_limited(buf, MAX_FRAME_SIZE)
}

/// [`packet_length`] with an explicit size limit.
pub fn packet_length_limited(buf: &[u8], max: usize) -> Result<Option<usize>, ProtocolError> {
    let Some(&proto) = buf.first() else {
        return Ok(None);
    };
    let protocol = BoltProtocol::from_code(proto)?;
    let type_at = match protocol {
        BoltProtocol::V1 => 1,
        BoltProtocol::V2 => 2,
    };
    let Some(&type_code) = buf.get(type_at) else {
        return Ok(None);
    };
    let rpc_type = RpcType::from_code(type_code)?;
    let fixed = protocol.header_len(rpc_type);
    if buf.len() < fixed {
        return Ok(None);
    }

    // Length fields always occupy the last eight header bytes.
    let mut lengths = &buf[fixed - 8..fixed];
    let class_len = lengths.get_u16() as usize;
    let header_len = lengths.get_u16() as usize;
    let content_len = lengths.get_u32() as usize;

    let mut total = fixed + class_len + header_len + content_len;
    if protocol == BoltProtocol::V2 && buf[V2_CRC_FLAG_OFFSET] == 0x01 {
        total += CRC_LEN;
    }
    if total > max {
        return Err(ProtocolError::FrameTooLarge {
            field: "packet",
            size: total,
            max,
        });
    }
    Ok(Some(total))
}

/// Decodes the fixed header of exactly one packet and splits its blocks.
pub fn decode_frame(packet: Bytes) -> Result<RawFrame, ProtocolError> {
    let size = packet.len();
    let mut buf = &packet[..];

    let protocol = BoltProtocol::from_code(take_u8(&mut buf)?)?;
    let bolt_version = match protocol {
        BoltProtocol::V1 => 1,
        BoltProtocol::V2 => take_u8(&mut buf)?,
    };
    let rpc_type = RpcType::from_code(take_u8(&mut buf)?)?;
    ensure(buf, protocol.header_len(rpc_type) - (size - buf.len()))?;

    let cmd_code = CommandCode::from_code(buf.get_u16())?;
    let _version2 = buf.get_u8();
    let packet_id = buf.get_u32();
    let codec = CodecType::from_code(buf.get_u8())?;
    let crc_enabled = match protocol {
        BoltProtocol::V1 => false,
        BoltProtocol::V2 => buf.get_u8() == 0x01,
    };
    let (timeout_ms, status) = if rpc_type.is_response() {
        (0, buf.get_u16())
    } else {
        (buf.get_i32(), 0)
    };
    let class_len = buf.get_u16() as usize;
    let header_len = buf.get_u16() as usize;
    let content_len = buf.get_u32() as usize;

    let fixed = size - buf.len();
    let body_len = class_len + header_len + content_len;
    let expected = fixed + body_len + if crc_enabled { CRC_LEN } else { 0 };
    if size < expected {
        return Err(ProtocolError::Truncated {
            needed: expected - size,
        });
    }

    if crc_enabled {
        let crc_at = fixed + body_len;
        let expected_crc = (&packet[crc_at..crc_at + CRC_LEN]).get_u32();
        let actual = crc32fast::hash(&packet[..crc_at]);
        if expected_crc != actual {
            return Err(ProtocolError::CrcMismatch {
                expected: expected_crc,
                actual,
            });
        }
    }

    let class_at = fixed;
    let header_at = class_at + class_len;
    let content_at = header_at + header_len;

    Ok(RawFrame {
        header: FrameHeader {
            protocol,
            bolt_version,
            rpc_type,
            cmd_code,
            packet_id,
            codec,
            crc_enabled,
            timeout_ms,
            status,
        },
        class_name: packet.slice(class_at..header_at),
        header_block: packet.slice(header_at..content_at),
        content: packet.slice(content_at..content_at + content_len),
        size,
    })
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, ProtocolError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated {
            needed: needed - buf.len(),
        });
    }
    Ok(())
}

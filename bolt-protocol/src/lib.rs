//! # bolt-protocol
//!
//! Wire protocol implementation for the Bolt RPC protocol (v1 and v2).
//!
//! This crate provides:
//! - Packet framing with optional CRC32 validation (v2)
//! - Header key/value block codec
//! - SofaRequest / SofaResponse content over Hessian 2.0, and a protobuf
//!   boundary driven by caller supplied codecs
//! - An incremental [`StreamDecoder`] and a backpressure aware [`StreamEncoder`]
//! - Response status codes and protocol errors

pub mod codec;
pub mod content;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod headers;
pub mod id;
pub mod message;

pub use codec::{EncodeOptions, PacketCodec};
pub use decoder::StreamDecoder;
pub use encoder::{Completion, PacketSink, SinkStatus, StreamEncoder, WriteBuffer, WriteReceipt};
pub use error::{DecodeError, ProtocolError, ResponseStatus};
pub use frame::{BoltProtocol, CodecType, CommandCode, FrameHeader, RpcType, MAX_FRAME_SIZE};
pub use headers::{HeaderCodec, HeaderMap};
pub use id::PacketIdGenerator;
pub use message::{
    AppResponse, HeartbeatAckPacket, HeartbeatPacket, Packet, PacketKind, PacketMeta,
    PacketOptions, RemoteError, RequestContext, RequestPacket, ResponseBody, ResponsePacket,
    RpcRequest, RpcResponse,
};

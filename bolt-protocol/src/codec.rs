//! Packet level encoding and decoding.
//!
//! [`PacketCodec`] joins the frame layout with the content codecs: it turns
//! requests, responses and heartbeats into complete packets and decodes a
//! single split packet back into a [`Packet`].

use crate::content::{hessian, protobuf, ProtobufContext};
use crate::error::{ProtocolError, ResponseStatus};
use crate::frame::{
    decode_frame, encode_frame, BoltProtocol, CodecType, CommandCode, FrameHeader, RawFrame,
    RpcType,
};
use crate::headers::{HeaderCodec, HeaderMap};
use crate::message::{
    HeartbeatAckPacket, HeartbeatPacket, Packet, PacketMeta, PacketOptions, RemoteError,
    RequestContext, RequestPacket, ResponseBody, ResponsePacket, RpcRequest, RpcResponse,
};
use bolt_hessian::registry::{SOFA_REQUEST, SOFA_RESPONSE};
use bolt_hessian::HessianCodec;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Header key carrying the target service of a request.
pub const SERVICE_HEADER: &str = "service";

/// Framing options used for outbound packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub protocol: BoltProtocol,
    pub bolt_version: u8,
    pub codec: CodecType,
    pub crc_enabled: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            protocol: BoltProtocol::V1,
            bolt_version: 1,
            codec: CodecType::Hessian2,
            crc_enabled: false,
        }
    }
}

impl From<&PacketOptions> for EncodeOptions {
    fn from(options: &PacketOptions) -> Self {
        Self {
            protocol: options.protocol,
            bolt_version: options.bolt_version,
            codec: options.codec,
            crc_enabled: options.crc_enabled,
        }
    }
}

impl EncodeOptions {
    fn header(&self, rpc_type: RpcType, cmd_code: CommandCode, packet_id: u32) -> FrameHeader {
        FrameHeader {
            protocol: self.protocol,
            bolt_version: self.bolt_version,
            rpc_type,
            cmd_code,
            packet_id,
            codec: self.codec,
            crc_enabled: self.crc_enabled,
            timeout_ms: 0,
            status: 0,
        }
    }
}

/// Encodes and decodes whole packets.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    hessian: HessianCodec,
    protobuf: Option<Arc<ProtobufContext>>,
}

impl PacketCodec {
    pub fn new(hessian: HessianCodec) -> Self {
        Self {
            hessian,
            protobuf: None,
        }
    }

    /// Enables the protobuf codec.
    pub fn with_protobuf(mut self, context: Arc<ProtobufContext>) -> Self {
        self.protobuf = Some(context);
        self
    }

    pub fn hessian(&self) -> &HessianCodec {
        &self.hessian
    }

    fn protobuf(&self) -> Result<&ProtobufContext, ProtocolError> {
        self.protobuf
            .as_deref()
            .ok_or(ProtocolError::ProtobufUnavailable)
    }

    pub fn encode_request(
        &self,
        packet_id: u32,
        req: &RpcRequest,
        options: &EncodeOptions,
    ) -> Result<BytesMut, ProtocolError> {
        let codec = req.codec.unwrap_or(options.codec);
        let rpc_type = if req.oneway {
            RpcType::RequestOneway
        } else {
            RpcType::Request
        };
        let mut header = EncodeOptions { codec, ..*options }.header(
            rpc_type,
            CommandCode::RpcRequest,
            packet_id,
        );
        header.timeout_ms = millis_i32(req.timeout);

        let mut headers = HeaderMap::new();
        headers.insert(SERVICE_HEADER, Some(req.server_signature.clone()));
        if codec == CodecType::Protobuf {
            protobuf::request_headers(req, &mut headers);
        }
        let header_block = HeaderCodec::encode(&headers)?;

        encode_frame(&header, SOFA_REQUEST.as_bytes(), &header_block, |buf| match codec {
            CodecType::Hessian2 => hessian::encode_request(&self.hessian, req, buf),
            CodecType::Protobuf => self.protobuf()?.encode_request(req, buf),
        })
    }

    /// Encodes the response to the request described by `ctx`, reusing the
    /// framing options the request arrived with.
    pub fn encode_response(
        &self,
        ctx: &RequestContext,
        res: &RpcResponse,
    ) -> Result<BytesMut, ProtocolError> {
        let options = EncodeOptions::from(&ctx.options);
        let codec = options.codec;
        let status = res.effective_status(codec);
        let mut header = options.header(RpcType::Response, CommandCode::RpcResponse, ctx.packet_id);
        header.status = status.code();

        let header_block = match codec {
            CodecType::Protobuf => HeaderCodec::encode(&protobuf::response_headers(res))?,
            CodecType::Hessian2 => Bytes::new(),
        };

        encode_frame(&header, SOFA_RESPONSE.as_bytes(), &header_block, |buf| {
            if status.is_success() {
                return match codec {
                    CodecType::Hessian2 => hessian::encode_response(&self.hessian, res, buf),
                    CodecType::Protobuf => {
                        self.protobuf()?
                            .encode_response(&ctx.service, &ctx.method, res, buf)
                    }
                };
            }
            let message = res.failure_message(status);
            match codec {
                CodecType::Hessian2 => hessian::encode_exception(&self.hessian, &message, buf),
                CodecType::Protobuf => {
                    protobuf::encode_exception(&message, buf);
                    Ok(())
                }
            }
        })
    }

    pub fn encode_heartbeat(
        &self,
        packet_id: u32,
        timeout: Duration,
        options: &EncodeOptions,
    ) -> Result<BytesMut, ProtocolError> {
        let mut header = options.header(RpcType::Request, CommandCode::Heartbeat, packet_id);
        header.timeout_ms = millis_i32(timeout);
        encode_frame(&header, &[], &[], |_| Ok(()))
    }

    pub fn encode_heartbeat_ack(
        &self,
        packet_id: u32,
        options: &EncodeOptions,
    ) -> Result<BytesMut, ProtocolError> {
        let header = options.header(RpcType::Response, CommandCode::Heartbeat, packet_id);
        encode_frame(&header, &[], &[], |_| Ok(()))
    }

    /// Decodes exactly one packet. `received_at` marks when decoding began.
    pub fn decode(&self, packet: Bytes, received_at: Instant) -> Result<Packet, ProtocolError> {
        let frame = decode_frame(packet)?;
        let h = &frame.header;
        let is_response = h.rpc_type.is_response();
        let options = PacketOptions {
            protocol: h.protocol,
            bolt_version: h.bolt_version,
            codec: h.codec,
            crc_enabled: h.crc_enabled,
            timeout: (!is_response && h.timeout_ms > 0)
                .then(|| Duration::from_millis(h.timeout_ms as u64)),
        };
        let meta = |size| PacketMeta {
            size,
            received_at,
            decode_time: received_at.elapsed(),
        };

        match (h.cmd_code, is_response) {
            (CommandCode::Heartbeat, false) => Ok(Packet::Heartbeat(HeartbeatPacket {
                packet_id: h.packet_id,
                options,
                meta: meta(frame.size),
            })),
            (CommandCode::Heartbeat, true) => Ok(Packet::HeartbeatAck(HeartbeatAckPacket {
                packet_id: h.packet_id,
                options,
                meta: meta(frame.size),
            })),
            (CommandCode::RpcRequest, false) => {
                let class_name = class_name(&frame)?;
                let mut request = match h.codec {
                    CodecType::Hessian2 => hessian::decode_request(&self.hessian, &frame.content)?,
                    CodecType::Protobuf => {
                        let headers = HeaderCodec::decode(&frame.header_block)?.unwrap_or_default();
                        self.protobuf()?.decode_request(headers, &frame.content)?
                    }
                };
                // A non-positive wire timeout decodes to zero: no deadline.
                request.timeout = options.timeout.unwrap_or_default();
                request.oneway = h.rpc_type == RpcType::RequestOneway;
                request.codec = Some(h.codec);
                Ok(Packet::Request(RequestPacket {
                    packet_id: h.packet_id,
                    class_name,
                    request,
                    options,
                    meta: meta(frame.size),
                }))
            }
            (CommandCode::RpcResponse, true) => {
                let class_name = class_name(&frame)?;
                let status = ResponseStatus::from_code(h.status);
                let body = if status.is_success() {
                    match h.codec {
                        CodecType::Hessian2 => {
                            hessian::decode_response(&self.hessian, &class_name, &frame.content)?
                        }
                        CodecType::Protobuf => {
                            self.protobuf()?.decode_response(h.packet_id, &frame.content)?
                        }
                    }
                } else {
                    self.decode_failure(status, h.codec, &frame.content)?
                };
                Ok(Packet::Response(ResponsePacket {
                    packet_id: h.packet_id,
                    class_name,
                    status,
                    body,
                    options,
                    meta: meta(frame.size),
                }))
            }
            (cmd, _) => Err(ProtocolError::MalformedContent(format!(
                "command {cmd:?} cannot be carried by rpc type {:?}",
                h.rpc_type
            ))),
        }
    }

    fn decode_failure(
        &self,
        status: ResponseStatus,
        codec: CodecType,
        content: &[u8],
    ) -> Result<ResponseBody, ProtocolError> {
        let message = if content.is_empty() {
            hessian::EMPTY_ERROR_MESSAGE.to_string()
        } else {
            match codec {
                CodecType::Hessian2 => hessian::decode_exception(&self.hessian, content)?
                    .unwrap_or_else(|| status.default_message()),
                CodecType::Protobuf => protobuf::decode_exception(content).message,
            }
        };
        Ok(ResponseBody {
            error: Some(RemoteError { status, message }),
            ..Default::default()
        })
    }
}

fn class_name(frame: &RawFrame) -> Result<String, ProtocolError> {
    std::str::from_utf8(&frame.class_name)
        .map(|s| s.trim().to_string())
        .map_err(|_| ProtocolError::InvalidUtf8("class name"))
}

fn millis_i32(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

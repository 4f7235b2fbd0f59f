//! Request, response and heartbeat message types.

use crate::error::ResponseStatus;
use crate::frame::{BoltProtocol, CodecType};
use bolt_hessian::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Timeout used for requests built with [`RpcRequest::new`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Timeout written into heartbeats when the caller gives none.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(3000);

/// An RPC invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Target service unique name, e.g. `com.demo.Calculator:1.0`.
    pub server_signature: String,
    pub method_name: String,
    pub args: Vec<Value>,
    /// Java class names of `args`. Derived from the values when empty.
    pub method_arg_sigs: Vec<String>,
    pub target_app_name: Option<String>,
    pub request_props: BTreeMap<String, Value>,
    /// Zero means no deadline.
    pub timeout: Duration,
    pub oneway: bool,
    /// Overrides the encoder's codec for this request.
    pub codec: Option<CodecType>,
}

impl RpcRequest {
    pub fn new(
        server_signature: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            server_signature: server_signature.into(),
            method_name: method_name.into(),
            args,
            method_arg_sigs: Vec::new(),
            target_app_name: None,
            request_props: BTreeMap::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            oneway: false,
            codec: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_target_app(mut self, app: impl Into<String>) -> Self {
        self.target_app_name = Some(app.into());
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request_props.insert(key.into(), value.into());
        self
    }

    pub fn with_codec(mut self, codec: CodecType) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn oneway(mut self) -> Self {
        self.oneway = true;
        self
    }

    /// Argument signatures as written on the wire.
    pub fn arg_sigs(&self) -> Vec<String> {
        if !self.method_arg_sigs.is_empty() {
            return self.method_arg_sigs.clone();
        }
        self.args.iter().map(Value::java_class_name).collect()
    }

    /// `service#method`, used in logs and timeout errors.
    pub fn service_id(&self) -> String {
        format!("{}#{}", self.server_signature, self.method_name)
    }
}

/// What the service handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AppResponse {
    Value(Value),
    /// The handler raised an exception with this message.
    Exception(String),
}

impl Default for AppResponse {
    fn default() -> Self {
        AppResponse::Value(Value::Null)
    }
}

impl From<Value> for AppResponse {
    fn from(value: Value) -> Self {
        AppResponse::Value(value)
    }
}

/// An outbound RPC response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcResponse {
    /// Explicit status. Derived from the error state when unset.
    pub status: Option<ResponseStatus>,
    /// Defaults to whether `error_msg` is set.
    pub is_error: Option<bool>,
    pub error_msg: Option<String>,
    pub app_response: AppResponse,
    pub response_props: BTreeMap<String, String>,
}

impl RpcResponse {
    pub fn ok(value: impl Into<Value>) -> Self {
        Self {
            app_response: AppResponse::Value(value.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_msg: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            app_response: AppResponse::Exception(message.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ResponseStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(self.error_msg.is_some())
    }

    /// Status written on the wire.
    pub fn effective_status(&self, codec: CodecType) -> ResponseStatus {
        if let Some(status) = self.status {
            return status;
        }
        if self.is_error() {
            return ResponseStatus::ServerException;
        }
        if codec == CodecType::Protobuf && matches!(self.app_response, AppResponse::Exception(_)) {
            return ResponseStatus::ServerException;
        }
        ResponseStatus::Success
    }

    /// Message carried by a non-success response.
    pub fn failure_message(&self, status: ResponseStatus) -> String {
        match (&self.app_response, &self.error_msg) {
            (AppResponse::Exception(msg), _) => msg.clone(),
            (_, Some(msg)) => msg.clone(),
            _ => status.default_message(),
        }
    }
}

/// An error reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub status: ResponseStatus,
    pub message: String,
}

/// Decoded response payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseBody {
    pub error: Option<RemoteError>,
    pub app_response: Value,
    pub response_props: BTreeMap<String, String>,
}

impl ResponseBody {
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.app_response),
        }
    }
}

/// Framing options a packet arrived with. Replies reuse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketOptions {
    pub protocol: BoltProtocol,
    pub bolt_version: u8,
    pub codec: CodecType,
    pub crc_enabled: bool,
    /// Request timeout, for requests and heartbeats.
    pub timeout: Option<Duration>,
}

/// Decode bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    /// Bytes on the wire.
    pub size: usize,
    /// When decoding of this packet started.
    pub received_at: Instant,
    pub decode_time: Duration,
}

#[derive(Debug, Clone)]
pub struct RequestPacket {
    pub packet_id: u32,
    pub class_name: String,
    pub request: RpcRequest,
    pub options: PacketOptions,
    pub meta: PacketMeta,
}

impl RequestPacket {
    /// What a response writer needs to know about this request.
    pub fn context(&self) -> RequestContext {
        RequestContext {
            packet_id: self.packet_id,
            received_at: self.meta.received_at,
            timeout: self.options.timeout,
            service: self.request.server_signature.clone(),
            method: self.request.method_name.clone(),
            options: self.options,
        }
    }
}

/// Identity and timing of a request being answered.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub packet_id: u32,
    pub received_at: Instant,
    pub timeout: Option<Duration>,
    pub service: String,
    pub method: String,
    pub options: PacketOptions,
}

#[derive(Debug, Clone)]
pub struct ResponsePacket {
    pub packet_id: u32,
    pub class_name: String,
    pub status: ResponseStatus,
    pub body: ResponseBody,
    pub options: PacketOptions,
    pub meta: PacketMeta,
}

#[derive(Debug, Clone)]
pub struct HeartbeatPacket {
    pub packet_id: u32,
    pub options: PacketOptions,
    pub meta: PacketMeta,
}

#[derive(Debug, Clone)]
pub struct HeartbeatAckPacket {
    pub packet_id: u32,
    pub options: PacketOptions,
    pub meta: PacketMeta,
}

/// A decoded packet.
#[derive(Debug, Clone)]
pub enum Packet {
    Request(RequestPacket),
    Response(ResponsePacket),
    Heartbeat(HeartbeatPacket),
    HeartbeatAck(HeartbeatAckPacket),
}

/// Discriminant of [`Packet`], also used in write receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Request,
    Response,
    Heartbeat,
    HeartbeatAck,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Request(_) => PacketKind::Request,
            Packet::Response(_) => PacketKind::Response,
            Packet::Heartbeat(_) => PacketKind::Heartbeat,
            Packet::HeartbeatAck(_) => PacketKind::HeartbeatAck,
        }
    }

    pub fn packet_id(&self) -> u32 {
        match self {
            Packet::Request(p) => p.packet_id,
            Packet::Response(p) => p.packet_id,
            Packet::Heartbeat(p) => p.packet_id,
            Packet::HeartbeatAck(p) => p.packet_id,
        }
    }

    pub fn options(&self) -> &PacketOptions {
        match self {
            Packet::Request(p) => &p.options,
            Packet::Response(p) => &p.options,
            Packet::Heartbeat(p) => &p.options,
            Packet::HeartbeatAck(p) => &p.options,
        }
    }

    pub fn meta(&self) -> &PacketMeta {
        match self {
            Packet::Request(p) => &p.meta,
            Packet::Response(p) => &p.meta,
            Packet::Heartbeat(p) => &p.meta,
            Packet::HeartbeatAck(p) => &p.meta,
        }
    }
}

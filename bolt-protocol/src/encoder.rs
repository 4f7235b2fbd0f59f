//! Outbound packet encoder with backpressure.
//!
//! [`StreamEncoder`] serializes commands into a [`PacketSink`]. While the sink
//! reports [`SinkStatus::Saturated`] the encoder is *limited*: new commands are
//! queued in FIFO order and nothing is written until [`StreamEncoder::on_drain`]
//! is called. Draining skips queued requests whose deadline has already
//! passed, and stops as soon as the sink saturates again.

use crate::codec::{EncodeOptions, PacketCodec};
use crate::error::ProtocolError;
use crate::message::{PacketKind, RequestContext, RpcRequest, RpcResponse, DEFAULT_HEARTBEAT_TIMEOUT};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Whether a sink can take more data right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Ready,
    Saturated,
}

/// Destination of encoded packets.
pub trait PacketSink {
    /// Accepts one packet. Returns `Saturated` once the sink wants the
    /// writer to pause until it drains.
    fn write(&mut self, packet: Bytes) -> SinkStatus;
}

/// In-memory sink that saturates at a high-water mark.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: BytesMut,
    high_water_mark: usize,
}

impl WriteBuffer {
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(high_water_mark.min(64 * 1024)),
            high_water_mark,
        }
    }

    /// Takes everything written so far.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}

impl PacketSink for WriteBuffer {
    fn write(&mut self, packet: Bytes) -> SinkStatus {
        self.buf.extend_from_slice(&packet);
        if self.buf.len() < self.high_water_mark {
            SinkStatus::Ready
        } else {
            SinkStatus::Saturated
        }
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub packet_id: u32,
    pub kind: PacketKind,
    /// Encoded size in bytes.
    pub size: usize,
    pub encode_time: Duration,
}

/// Callback invoked once a packet has been handed to the sink or failed to
/// encode. Requests dropped for an expired deadline never invoke it.
pub type Completion = Box<dyn FnOnce(Result<WriteReceipt, ProtocolError>) + Send>;

enum Outbound {
    Request {
        packet_id: u32,
        request: RpcRequest,
    },
    Response {
        ctx: RequestContext,
        response: RpcResponse,
    },
    Heartbeat {
        packet_id: u32,
        timeout: Duration,
    },
    HeartbeatAck {
        packet_id: u32,
        options: EncodeOptions,
    },
}

impl Outbound {
    fn packet_id(&self) -> u32 {
        match self {
            Outbound::Request { packet_id, .. }
            | Outbound::Heartbeat { packet_id, .. }
            | Outbound::HeartbeatAck { packet_id, .. } => *packet_id,
            Outbound::Response { ctx, .. } => ctx.packet_id,
        }
    }

    fn kind(&self) -> PacketKind {
        match self {
            Outbound::Request { .. } => PacketKind::Request,
            Outbound::Response { .. } => PacketKind::Response,
            Outbound::Heartbeat { .. } => PacketKind::Heartbeat,
            Outbound::HeartbeatAck { .. } => PacketKind::HeartbeatAck,
        }
    }
}

struct Queued {
    outbound: Outbound,
    enqueued_at: Instant,
    completion: Option<Completion>,
}

/// Serializes commands into a sink, queueing while the sink is saturated.
pub struct StreamEncoder<S> {
    codec: Arc<PacketCodec>,
    options: EncodeOptions,
    sink: S,
    limited: bool,
    queue: VecDeque<Queued>,
}

impl<S: PacketSink> StreamEncoder<S> {
    pub fn new(codec: Arc<PacketCodec>, sink: S) -> Self {
        Self::with_options(codec, sink, EncodeOptions::default())
    }

    pub fn with_options(codec: Arc<PacketCodec>, sink: S, options: EncodeOptions) -> Self {
        Self {
            codec,
            options,
            sink,
            limited: false,
            queue: VecDeque::new(),
        }
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Framing options for requests and heartbeats written from now on.
    pub fn options_mut(&mut self) -> &mut EncodeOptions {
        &mut self.options
    }

    pub fn is_limited(&self) -> bool {
        self.limited
    }

    /// Number of commands waiting for a drain.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn write_request(&mut self, packet_id: u32, request: RpcRequest, completion: Option<Completion>) {
        self.submit(Outbound::Request { packet_id, request }, completion);
    }

    /// Writes the response to a decoded request. Fails with
    /// [`ProtocolError::ResponseTimeout`] when the request has already
    /// outlived its timeout by the time the response is encoded.
    pub fn write_response(
        &mut self,
        ctx: RequestContext,
        response: RpcResponse,
        completion: Option<Completion>,
    ) {
        self.submit(Outbound::Response { ctx, response }, completion);
    }

    /// Writes a heartbeat; `timeout` defaults to three seconds.
    pub fn write_heartbeat(
        &mut self,
        packet_id: u32,
        timeout: Option<Duration>,
        completion: Option<Completion>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT);
        self.submit(Outbound::Heartbeat { packet_id, timeout }, completion);
    }

    /// Acknowledges a heartbeat using the options it arrived with.
    pub fn write_heartbeat_ack(
        &mut self,
        packet_id: u32,
        options: EncodeOptions,
        completion: Option<Completion>,
    ) {
        self.submit(Outbound::HeartbeatAck { packet_id, options }, completion);
    }

    /// Resumes writing after the sink drained.
    pub fn on_drain(&mut self) {
        self.limited = false;
        while !self.limited {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            if let Outbound::Request { packet_id, request } = &item.outbound {
                let waited = item.enqueued_at.elapsed();
                if !request.timeout.is_zero() && waited >= request.timeout {
                    tracing::debug!(
                        packet_id,
                        service = %request.service_id(),
                        waited_ms = waited.as_millis() as u64,
                        "dropping expired request"
                    );
                    continue;
                }
            }
            self.write_packet(item);
        }
    }

    fn submit(&mut self, outbound: Outbound, completion: Option<Completion>) {
        self.write_packet(Queued {
            outbound,
            enqueued_at: Instant::now(),
            completion,
        });
    }

    fn write_packet(&mut self, item: Queued) {
        if self.limited {
            tracing::trace!(
                packet_id = item.outbound.packet_id(),
                queued = self.queue.len() + 1,
                "sink saturated, queueing packet"
            );
            self.queue.push_back(item);
            return;
        }

        let Queued {
            outbound,
            completion,
            ..
        } = item;
        let packet_id = outbound.packet_id();
        let kind = outbound.kind();
        let start = Instant::now();

        let encoded = match self.encode(outbound) {
            Ok(buf) => buf,
            Err(err) => {
                tracing::debug!(packet_id, ?kind, error = %err, "failed to encode packet");
                if let Some(done) = completion {
                    done(Err(err));
                }
                return;
            }
        };

        let receipt = WriteReceipt {
            packet_id,
            kind,
            size: encoded.len(),
            encode_time: start.elapsed(),
        };
        if self.sink.write(encoded.freeze()) == SinkStatus::Saturated {
            tracing::trace!(packet_id, "sink saturated");
            self.limited = true;
        }
        if let Some(done) = completion {
            done(Ok(receipt));
        }
    }

    fn encode(&self, outbound: Outbound) -> Result<BytesMut, ProtocolError> {
        match outbound {
            Outbound::Request { packet_id, request } => {
                self.codec.encode_request(packet_id, &request, &self.options)
            }
            Outbound::Response { ctx, response } => {
                let elapsed = ctx.received_at.elapsed();
                if let Some(limit) = ctx.timeout {
                    if elapsed > limit {
                        return Err(ProtocolError::ResponseTimeout {
                            service: format!("{}#{}", ctx.service, ctx.method),
                            elapsed_ms: elapsed.as_millis() as u64,
                            limit_ms: limit.as_millis() as u64,
                        });
                    }
                }
                self.codec.encode_response(&ctx, &response)
            }
            Outbound::Heartbeat { packet_id, timeout } => {
                self.codec.encode_heartbeat(packet_id, timeout, &self.options)
            }
            Outbound::HeartbeatAck { packet_id, options } => {
                self.codec.encode_heartbeat_ack(packet_id, &options)
            }
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for StreamEncoder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEncoder")
            .field("options", &self.options)
            .field("sink", &self.sink)
            .field("limited", &self.limited)
            .field("queued", &self.queue.len())
            .finish()
    }
}

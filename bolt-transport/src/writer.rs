//! Packet writer over any `AsyncWrite`.

use crate::config::{Config, DEFAULT_HIGH_WATER_MARK};
use crate::error::TransportError;
use bolt_protocol::content::SentRequests;
use bolt_protocol::{
    Completion, EncodeOptions, HeartbeatPacket, PacketCodec, PacketIdGenerator, RequestContext,
    RpcRequest, RpcResponse, StreamEncoder, WriteBuffer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encodes packets into a bounded write buffer and flushes it to the stream.
///
/// Writes past the high-water mark are queued by the encoder until
/// [`flush`](Self::flush) drains the buffer.
pub struct FramedWriter<W> {
    inner: W,
    encoder: StreamEncoder<WriteBuffer>,
    ids: PacketIdGenerator,
    sent: Option<Arc<SentRequests>>,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(inner: W, codec: Arc<PacketCodec>) -> Self {
        Self::with_options(inner, codec, EncodeOptions::default(), DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_options(
        inner: W,
        codec: Arc<PacketCodec>,
        options: EncodeOptions,
        high_water_mark: usize,
    ) -> Self {
        Self {
            inner,
            encoder: StreamEncoder::with_options(codec, WriteBuffer::new(high_water_mark), options),
            ids: PacketIdGenerator::new(),
            sent: None,
        }
    }

    pub fn from_config(inner: W, codec: Arc<PacketCodec>, config: &Config) -> Self {
        Self::with_options(
            inner,
            codec,
            config.protocol.encode_options(),
            config.io.high_water_mark,
        )
    }

    /// Records every sent request so protobuf responses can be decoded.
    pub fn with_sent_requests(mut self, sent: Arc<SentRequests>) -> Self {
        self.sent = Some(sent);
        self
    }

    /// Writes a request under a fresh packet id and returns that id.
    pub fn send_request(&mut self, request: RpcRequest, completion: Option<Completion>) -> u32 {
        let packet_id = self.ids.next_id();
        if let Some(sent) = &self.sent {
            sent.insert(packet_id, &request);
        }
        self.encoder.write_request(packet_id, request, completion);
        packet_id
    }

    pub fn send_response(
        &mut self,
        ctx: RequestContext,
        response: RpcResponse,
        completion: Option<Completion>,
    ) {
        self.encoder.write_response(ctx, response, completion);
    }

    /// Writes a heartbeat under a fresh packet id and returns that id.
    pub fn send_heartbeat(&mut self, timeout: Option<Duration>, completion: Option<Completion>) -> u32 {
        let packet_id = self.ids.next_id();
        self.encoder.write_heartbeat(packet_id, timeout, completion);
        packet_id
    }

    /// Answers a heartbeat with the framing it arrived with.
    pub fn send_heartbeat_ack(&mut self, heartbeat: &HeartbeatPacket, completion: Option<Completion>) {
        let options = EncodeOptions::from(&heartbeat.options);
        self.encoder
            .write_heartbeat_ack(heartbeat.packet_id, options, completion);
    }

    /// Writes everything buffered or queued to the stream.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        loop {
            let chunk = self.encoder.sink_mut().take();
            if !chunk.is_empty() {
                tracing::trace!(bytes = chunk.len(), "flushing bolt packets");
                self.inner.write_all(&chunk).await?;
            }

            if self.encoder.is_limited() || self.encoder.queued() > 0 {
                self.encoder.on_drain();
                continue;
            }
            if self.encoder.sink().is_empty() {
                break;
            }
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the write half.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn options(&self) -> &EncodeOptions {
        self.encoder.options()
    }

    /// Framing for subsequent requests and heartbeats.
    pub fn options_mut(&mut self) -> &mut EncodeOptions {
        self.encoder.options_mut()
    }

    /// Packets waiting behind the high-water mark.
    pub fn queued(&self) -> usize {
        self.encoder.queued()
    }

    /// Bytes encoded but not yet flushed.
    pub fn pending_bytes(&self) -> usize {
        self.encoder.sink().len()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W> std::fmt::Debug for FramedWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedWriter")
            .field("encoder", &self.encoder)
            .finish()
    }
}

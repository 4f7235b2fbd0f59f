//! Incremental packet decoder over an arbitrary byte stream.

use crate::codec::PacketCodec;
use crate::error::{DecodeError, ProtocolError};
use crate::frame::{packet_length_limited, MAX_FRAME_SIZE};
use crate::message::Packet;
use bytes::BytesMut;
use std::sync::Arc;
use tokio::time::Instant;

/// Accumulates inbound bytes and yields complete packets.
///
/// Any decode failure is fatal for the stream: the buffered bytes are handed
/// back inside the [`DecodeError`] and the buffer is cleared.
pub struct StreamDecoder {
    codec: Arc<PacketCodec>,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl StreamDecoder {
    pub fn new(codec: Arc<PacketCodec>) -> Self {
        Self::with_capacity(codec, 8192)
    }

    pub fn with_capacity(codec: Arc<PacketCodec>, capacity: usize) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(capacity),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Rejects packets whose declared length exceeds `max` bytes.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next packet from the buffer.
    pub fn decode_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        let len = match packet_length_limited(&self.buffer, self.max_frame_size) {
            Ok(Some(len)) if self.buffer.len() >= len => len,
            Ok(_) => return Ok(None),
            Err(source) => return Err(self.fail(source)),
        };

        let received_at = Instant::now();
        let packet = self.buffer.split_to(len).freeze();
        let raw = packet.clone();
        match self.codec.decode(packet, received_at) {
            Ok(packet) => {
                tracing::trace!(
                    kind = ?packet.kind(),
                    packet_id = packet.packet_id(),
                    size = len,
                    "decoded packet"
                );
                Ok(Some(packet))
            }
            Err(source) => {
                // Report the failed packet together with whatever followed it.
                let mut all = BytesMut::from(&raw[..]);
                all.extend_from_slice(&self.buffer);
                self.buffer = all;
                Err(self.fail(source))
            }
        }
    }

    /// Feeds a chunk and hands every complete packet to `emit`.
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut emit: F) -> Result<usize, DecodeError>
    where
        F: FnMut(Packet),
    {
        self.extend(chunk);
        let mut count = 0;
        while let Some(packet) = self.decode_packet()? {
            emit(packet);
            count += 1;
        }
        Ok(count)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn fail(&mut self, source: ProtocolError) -> DecodeError {
        let raw = self.buffer.split().freeze();
        tracing::debug!(error = %source, buffered = raw.len(), "bolt decode failed");
        DecodeError { source, raw }
    }
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("buffered", &self.buffer.len())
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodeOptions;
    use crate::message::RpcRequest;
    use bolt_hessian::Value;
    use std::time::Duration;

    fn decoder() -> StreamDecoder {
        StreamDecoder::new(Arc::new(PacketCodec::default()))
    }

    fn request_bytes(id: u32) -> BytesMut {
        let req = RpcRequest::new("svc:1.0", "plus", vec![Value::Int(id as i32)]);
        PacketCodec::default()
            .encode_request(id, &req, &EncodeOptions::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let mut decoder = decoder();
        let bytes = request_bytes(1);
        let mut packets = Vec::new();
        for b in bytes.iter() {
            decoder.feed_with(&[*b], |p| packets.push(p)).unwrap();
        }
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].packet_id(), 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[tokio::test]
    async fn test_multiple_packets_in_one_chunk() {
        let mut decoder = decoder();
        let mut chunk = BytesMut::new();
        for id in 1..=3 {
            chunk.extend_from_slice(&request_bytes(id));
        }
        let partial = request_bytes(4);
        chunk.extend_from_slice(&partial[..10]);

        let mut ids = Vec::new();
        let count = decoder.feed_with(&chunk, |p| ids.push(p.packet_id())).unwrap();
        assert_eq!(count, 3);
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(decoder.buffered(), 10);

        let count = decoder.feed_with(&partial[10..], |p| ids.push(p.packet_id())).unwrap();
        assert_eq!(count, 1);
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_unknown_protocol_is_fatal() {
        let mut decoder = decoder();
        decoder.extend(&[0x07, 0x01, 0x02]);
        let err = decoder.decode_packet().unwrap_err();
        assert!(matches!(err.source, ProtocolError::UnknownProtocol(7)));
        assert_eq!(err.raw.as_ref(), &[0x07, 0x01, 0x02]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[tokio::test]
    async fn test_failure_carries_remaining_bytes() {
        let mut decoder = decoder();
        let options = EncodeOptions {
            protocol: crate::frame::BoltProtocol::V2,
            bolt_version: 1,
            crc_enabled: true,
            ..Default::default()
        };
        let req = RpcRequest::new("svc:1.0", "plus", Vec::new());
        let mut bad = PacketCodec::default().encode_request(1, &req, &options).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        let len = bad.len();
        bad.extend_from_slice(&[0x01]);

        let err = decoder.feed_with(&bad, |_| {}).unwrap_err();
        assert!(matches!(err.source, ProtocolError::CrcMismatch { .. }));
        assert_eq!(err.raw.len(), len + 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[tokio::test]
    async fn test_oversized_declared_length_is_fatal() {
        let mut decoder = decoder();
        let mut header = request_bytes(1)[..22].to_vec();
        header[18..22].copy_from_slice(&0x7fff_ffffu32.to_be_bytes());

        let err = decoder.feed_with(&header, |_| {}).unwrap_err();
        assert!(matches!(
            err.source,
            ProtocolError::FrameTooLarge { field: "packet", .. }
        ));
        assert_eq!(err.raw.as_ref(), &header[..]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[tokio::test]
    async fn test_custom_frame_limit() {
        let bytes = request_bytes(1);
        let mut strict = decoder().with_max_frame_size(bytes.len() - 1);
        assert!(strict.feed_with(&bytes, |_| {}).is_err());

        let mut exact = decoder().with_max_frame_size(bytes.len());
        assert_eq!(exact.feed_with(&bytes, |_| {}).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_meta_records_size() {
        let mut decoder = decoder();
        let bytes = request_bytes(9);
        decoder.extend(&bytes);
        tokio::time::advance(Duration::from_millis(5)).await;
        let packet = decoder.decode_packet().unwrap().unwrap();
        assert_eq!(packet.meta().size, bytes.len());
        assert_eq!(packet.meta().received_at, Instant::now());
    }
}

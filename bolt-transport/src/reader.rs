//! Packet reader over any `AsyncRead`.

use crate::config::{IoConfig, DEFAULT_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE, MIN_READ_BUFFER_SIZE};
use crate::error::TransportError;
use bolt_protocol::{Packet, PacketCodec, StreamDecoder};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads chunks from the underlying stream and yields decoded packets.
pub struct FramedReader<R> {
    inner: R,
    decoder: StreamDecoder,
    read_buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R, codec: Arc<PacketCodec>) -> Self {
        Self::with_buffer_size(inner, codec, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Creates a reader with a custom read buffer size.
    ///
    /// The size is clamped to [1 KiB, 1 MiB].
    pub fn with_buffer_size(inner: R, codec: Arc<PacketCodec>, size: usize) -> Self {
        let size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        Self {
            inner,
            decoder: StreamDecoder::with_capacity(codec, size),
            read_buf: vec![0u8; size],
        }
    }

    pub fn from_config(inner: R, codec: Arc<PacketCodec>, config: &IoConfig) -> Self {
        Self::with_buffer_size(inner, codec, config.read_buffer_size)
            .with_max_frame_size(config.max_frame_size)
    }

    /// Fails the stream on packets declaring more than `max` bytes.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.decoder = self.decoder.with_max_frame_size(max);
        self
    }

    /// Returns the next packet, or `None` once the peer closed the stream
    /// on a packet boundary.
    ///
    /// A decode failure is fatal: the buffered bytes are discarded and the
    /// caller should drop the connection.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            if let Some(packet) = self.decoder.decode_packet()? {
                return Ok(Some(packet));
            }

            let n = self.inner.read(&mut self.read_buf).await?;
            if n == 0 {
                let buffered = self.decoder.buffered();
                if buffered == 0 {
                    return Ok(None);
                }
                self.decoder.clear();
                tracing::debug!(buffered, "stream ended inside a packet");
                return Err(TransportError::UnexpectedEof { buffered });
            }

            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> std::fmt::Debug for FramedReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedReader")
            .field("decoder", &self.decoder)
            .field("read_buffer_size", &self.read_buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_hessian::Value;
    use bolt_protocol::{EncodeOptions, ProtocolError, RpcRequest};

    fn request_bytes(id: u32) -> bytes::BytesMut {
        let req = RpcRequest::new("svc:1.0", "plus", vec![Value::Int(1)]);
        PacketCodec::default()
            .encode_request(id, &req, &EncodeOptions::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_reads_split_chunks() {
        let first = request_bytes(1);
        let second = request_bytes(2);
        let mock = tokio_test::io::Builder::new()
            .read(&first[..7])
            .read(&first[7..])
            .read(&second)
            .build();

        let mut reader = FramedReader::new(mock, Arc::new(PacketCodec::default()));
        assert_eq!(reader.next_packet().await.unwrap().unwrap().packet_id(), 1);
        assert_eq!(reader.next_packet().await.unwrap().unwrap().packet_id(), 2);
        assert!(reader.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_packet() {
        let bytes = request_bytes(1);
        let mock = tokio_test::io::Builder::new().read(&bytes[..12]).build();

        let mut reader = FramedReader::new(mock, Arc::new(PacketCodec::default()));
        let err = reader.next_packet().await.unwrap_err();
        assert!(matches!(err, TransportError::UnexpectedEof { buffered: 12 }));
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_garbage_is_fatal() {
        let mock = tokio_test::io::Builder::new().read(&[0x09, 0x00]).build();

        let mut reader = FramedReader::new(mock, Arc::new(PacketCodec::default()));
        match reader.next_packet().await {
            Err(TransportError::Decode(err)) => {
                assert!(matches!(err.source, ProtocolError::UnknownProtocol(9)));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_packet_fails_before_buffering() {
        let mut header = request_bytes(1)[..22].to_vec();
        header[18..22].copy_from_slice(&0x7fff_ffffu32.to_be_bytes());
        let mock = tokio_test::io::Builder::new().read(&header).build();

        let config = IoConfig {
            max_frame_size: 4096,
            ..Default::default()
        };
        let mut reader = FramedReader::from_config(mock, Arc::new(PacketCodec::default()), &config);
        match reader.next_packet().await {
            Err(TransportError::Decode(err)) => {
                assert!(matches!(
                    err.source,
                    ProtocolError::FrameTooLarge { max: 4096, .. }
                ));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_buffer_size_clamped() {
        let codec = Arc::new(PacketCodec::default());
        let reader = FramedReader::with_buffer_size(tokio::io::empty(), codec.clone(), 1);
        assert_eq!(reader.read_buf.len(), MIN_READ_BUFFER_SIZE);
        let reader = FramedReader::with_buffer_size(tokio::io::empty(), codec, usize::MAX);
        assert_eq!(reader.read_buf.len(), MAX_READ_BUFFER_SIZE);
    }
}

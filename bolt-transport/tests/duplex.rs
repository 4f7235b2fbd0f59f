//! Client and server talking over an in-memory duplex pipe.

use bolt_hessian::Value;
use bolt_protocol::{
    BoltProtocol, CodecType, EncodeOptions, Packet, PacketCodec, ProtocolError, ResponseStatus,
    RpcRequest, RpcResponse, WriteReceipt,
};
use bolt_transport::{Config, FramedReader, FramedWriter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn serve_one<S>(stream: S, codec: Arc<PacketCodec>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedReader::new(read_half, codec.clone());
    let mut writer = FramedWriter::new(write_half, codec);

    while let Some(packet) = reader.next_packet().await.unwrap() {
        match packet {
            Packet::Request(req) => {
                let sum = req
                    .request
                    .args
                    .iter()
                    .filter_map(|v| match v {
                        Value::Int(i) => Some(*i),
                        _ => None,
                    })
                    .sum::<i32>();
                let response = if req.request.method_name == "plus" {
                    RpcResponse::ok(Value::Int(sum))
                } else {
                    RpcResponse::error(format!("unknown method {}", req.request.method_name))
                };
                writer.send_response(req.context(), response, None);
            }
            Packet::Heartbeat(hb) => writer.send_heartbeat_ack(&hb, None),
            _ => {}
        }
        writer.flush().await.unwrap();
    }
}

#[tokio::test]
async fn test_request_response_over_duplex() {
    let codec = Arc::new(PacketCodec::default());
    let (client, server) = tokio::io::duplex(64);
    let server_task = tokio::spawn(serve_one(server, codec.clone()));

    let (read_half, write_half) = tokio::io::split(client);
    let mut reader = FramedReader::new(read_half, codec.clone());
    let mut writer = FramedWriter::new(write_half, codec.clone());

    let written = Arc::new(AtomicUsize::new(0));
    let counter = written.clone();
    let id = writer.send_request(
        RpcRequest::new("calc:1.0", "plus", vec![Value::Int(2), Value::Int(5)]),
        Some(Box::new(move |res: Result<WriteReceipt, ProtocolError>| {
            assert!(res.is_ok());
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );
    writer.flush().await.unwrap();
    assert_eq!(written.load(Ordering::SeqCst), 1);

    match reader.next_packet().await.unwrap() {
        Some(Packet::Response(res)) => {
            assert_eq!(res.packet_id, id);
            assert_eq!(res.status, ResponseStatus::Success);
            assert_eq!(res.body.into_result(), Ok(Value::Int(7)));
        }
        other => panic!("expected response, got {other:?}"),
    }

    writer.send_request(RpcRequest::new("calc:1.0", "minus", Vec::new()), None);
    writer.flush().await.unwrap();
    match reader.next_packet().await.unwrap() {
        Some(Packet::Response(res)) => {
            assert_eq!(res.status, ResponseStatus::ServerException);
            let err = res.body.into_result().unwrap_err();
            assert_eq!(err.message, "unknown method minus");
        }
        other => panic!("expected response, got {other:?}"),
    }

    writer.shutdown().await.unwrap();
    server_task.await.unwrap();
    assert!(reader.next_packet().await.unwrap().is_none());
}

#[tokio::test]
async fn test_v2_heartbeat_ack_keeps_framing() {
    let codec = Arc::new(PacketCodec::default());
    let (client, server) = tokio::io::duplex(1024);
    let server_task = tokio::spawn(serve_one(server, codec.clone()));

    let mut config = Config::default();
    config.protocol.protocol = BoltProtocol::V2;
    config.protocol.bolt_version = 2;
    config.protocol.crc_enabled = true;
    config.validate().unwrap();

    let (read_half, write_half) = tokio::io::split(client);
    let mut reader = FramedReader::from_config(read_half, codec.clone(), &config.io);
    let mut writer = FramedWriter::from_config(write_half, codec, &config);

    let id = writer.send_heartbeat(Some(Duration::from_millis(500)), None);
    writer.flush().await.unwrap();

    match reader.next_packet().await.unwrap() {
        Some(Packet::HeartbeatAck(ack)) => {
            assert_eq!(ack.packet_id, id);
            assert_eq!(ack.options.protocol, BoltProtocol::V2);
            assert_eq!(ack.options.bolt_version, 2);
            assert!(ack.options.crc_enabled);
            assert_eq!(ack.options.codec, CodecType::Hessian2);
        }
        other => panic!("expected heartbeat ack, got {other:?}"),
    }

    writer.shutdown().await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_options_switch_between_requests() {
    let codec = Arc::new(PacketCodec::default());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read_half, _server_write) = tokio::io::split(server);
    let mut server_reader = FramedReader::new(read_half, codec.clone());

    let mut writer = FramedWriter::new(client, codec);
    writer.send_request(RpcRequest::new("calc:1.0", "plus", Vec::new()), None);
    *writer.options_mut() = EncodeOptions {
        protocol: BoltProtocol::V2,
        bolt_version: 1,
        ..Default::default()
    };
    writer.send_request(RpcRequest::new("calc:1.0", "plus", Vec::new()), None);
    writer.flush().await.unwrap();

    let first = server_reader.next_packet().await.unwrap().unwrap();
    let second = server_reader.next_packet().await.unwrap().unwrap();
    assert_eq!(first.options().protocol, BoltProtocol::V1);
    assert_eq!(second.options().protocol, BoltProtocol::V2);
}

//! Protobuf content boundary.
//!
//! Message bodies are encoded by a caller supplied [`ProtobufCodec`]; method
//! request/response types come from a [`MethodResolver`]. Request metadata
//! travels in the header block instead of a content envelope.

use crate::error::{ProtocolError, ResponseStatus};
use crate::headers::HeaderMap;
use crate::message::{AppResponse, RemoteError, ResponseBody, RpcRequest, RpcResponse};
use bolt_hessian::Value;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const HEAD_METHOD_NAME: &str = "sofa_head_method_name";
pub const HEAD_TARGET_APP: &str = "sofa_head_target_app";
pub const HEAD_TARGET_SERVICE: &str = "sofa_head_target_service";
pub const HEAD_RESPONSE_ERROR: &str = "sofa_head_response_error";
pub const TRACE_CONTEXT: &str = "rpc_trace_context";

/// Request and response message types of one service method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub request_type: Option<String>,
    pub response_type: Option<String>,
}

/// Looks up method message types by service name and method name.
pub trait MethodResolver: Send + Sync {
    fn resolve(&self, service: &str, method: &str) -> Option<MethodDescriptor>;
}

/// Encodes and decodes protobuf messages of a named type.
pub trait ProtobufCodec: Send + Sync {
    fn encode(&self, message_type: &str, value: &Value) -> Result<Bytes, ProtocolError>;
    fn decode(&self, message_type: &str, data: &[u8]) -> Result<Value, ProtocolError>;
}

/// Identity of an in-flight request, needed to decode its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub server_signature: String,
    pub method_name: String,
}

pub trait SentRequestLookup: Send + Sync {
    fn lookup(&self, packet_id: u32) -> Option<SentRequest>;
}

/// Concurrent table of in-flight requests keyed by packet id.
#[derive(Debug, Default)]
pub struct SentRequests {
    inner: DashMap<u32, SentRequest>,
}

impl SentRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, packet_id: u32, request: &RpcRequest) {
        self.inner.insert(
            packet_id,
            SentRequest {
                server_signature: request.server_signature.clone(),
                method_name: request.method_name.clone(),
            },
        );
    }

    pub fn remove(&self, packet_id: u32) -> Option<SentRequest> {
        self.inner.remove(&packet_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl SentRequestLookup for SentRequests {
    fn lookup(&self, packet_id: u32) -> Option<SentRequest> {
        self.inner.get(&packet_id).map(|entry| entry.value().clone())
    }
}

/// Collaborators for the protobuf codec plus a cache of resolved methods.
pub struct ProtobufContext {
    resolver: Arc<dyn MethodResolver>,
    codec: Arc<dyn ProtobufCodec>,
    sent: Arc<dyn SentRequestLookup>,
    methods: DashMap<String, Arc<MethodDescriptor>>,
}

impl ProtobufContext {
    pub fn new(
        resolver: Arc<dyn MethodResolver>,
        codec: Arc<dyn ProtobufCodec>,
        sent: Arc<dyn SentRequestLookup>,
    ) -> Self {
        Self {
            resolver,
            codec,
            sent,
            methods: DashMap::new(),
        }
    }

    /// Resolves a method of `service_id`. The service name is the part of
    /// the id before the first `:`.
    pub fn method(
        &self,
        service_id: &str,
        method: &str,
    ) -> Result<Arc<MethodDescriptor>, ProtocolError> {
        let key = format!("{service_id}#{method}");
        if let Some(found) = self.methods.get(&key) {
            return Ok(found.clone());
        }
        let service = service_id.split(':').next().unwrap_or(service_id);
        let descriptor = self
            .resolver
            .resolve(service, method)
            .ok_or_else(|| ProtocolError::UnknownMethod {
                service: service.to_string(),
                method: method.to_string(),
            })?;
        Ok(self
            .methods
            .entry(key)
            .or_insert_with(|| Arc::new(descriptor))
            .clone())
    }

    pub fn encode_request(&self, req: &RpcRequest, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let method = self.method(&req.server_signature, &req.method_name)?;
        if let Some(request_type) = &method.request_type {
            let arg = req.args.first().cloned().unwrap_or_default();
            buf.put_slice(&self.codec.encode(request_type, &arg)?);
        }
        Ok(())
    }

    /// Rebuilds a request from its header block. Trace context headers are
    /// folded into a `rpc_trace_context` map inside the request props.
    pub fn decode_request(
        &self,
        mut headers: HeaderMap,
        content: &[u8],
    ) -> Result<RpcRequest, ProtocolError> {
        let service = headers
            .get_str(HEAD_TARGET_SERVICE)
            .unwrap_or_default()
            .to_string();
        let method_name = headers
            .get_str(HEAD_METHOD_NAME)
            .unwrap_or_default()
            .to_string();
        let target_app = headers
            .get_str(HEAD_TARGET_APP)
            .filter(|app| !app.is_empty())
            .map(str::to_string);

        let prefix = format!("{TRACE_CONTEXT}.");
        let trace: Vec<(Value, Value)> = headers
            .drain_prefixed(&prefix)
            .into_iter()
            .map(|(k, v)| (Value::from(&k[prefix.len()..]), Value::from(v)))
            .collect();

        let mut request_props = BTreeMap::new();
        request_props.insert(TRACE_CONTEXT.to_string(), Value::map(trace));
        for (k, v) in headers.iter() {
            request_props.insert(k.to_string(), Value::from(v));
        }

        let method = self.method(&service, &method_name)?;
        let mut args = Vec::new();
        if let Some(request_type) = &method.request_type {
            if !content.is_empty() {
                args.push(self.codec.decode(request_type, content)?);
            }
        }

        let mut req = RpcRequest::new(service, method_name, args);
        req.target_app_name = target_app;
        req.request_props = request_props;
        Ok(req)
    }

    pub fn encode_response(
        &self,
        service: &str,
        method: &str,
        res: &RpcResponse,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let method = self.method(service, method)?;
        if let (Some(response_type), AppResponse::Value(value)) =
            (&method.response_type, &res.app_response)
        {
            buf.put_slice(&self.codec.encode(response_type, value)?);
        }
        Ok(())
    }

    pub fn decode_response(
        &self,
        packet_id: u32,
        content: &[u8],
    ) -> Result<ResponseBody, ProtocolError> {
        let sent = self
            .sent
            .lookup(packet_id)
            .ok_or(ProtocolError::SentRequestNotFound(packet_id))?;
        let method = self.method(&sent.server_signature, &sent.method_name)?;
        let app_response = match &method.response_type {
            Some(response_type) => self.codec.decode(response_type, content)?,
            None => Value::Null,
        };
        Ok(ResponseBody {
            app_response,
            ..Default::default()
        })
    }
}

impl std::fmt::Debug for ProtobufContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtobufContext")
            .field("cached_methods", &self.methods.len())
            .finish()
    }
}

/// Headers written for a protobuf request.
pub fn request_headers(req: &RpcRequest, headers: &mut HeaderMap) {
    headers.insert(HEAD_METHOD_NAME, Some(req.method_name.clone()));
    headers.insert(
        HEAD_TARGET_APP,
        Some(req.target_app_name.clone().unwrap_or_default()),
    );
    headers.insert(HEAD_TARGET_SERVICE, Some(req.server_signature.clone()));
    for (key, value) in &req.request_props {
        flatten_into(key, value, headers);
    }
}

/// Headers written for a protobuf response.
pub fn response_headers(res: &RpcResponse) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let flag = if res.is_error() { "true" } else { "false" };
    headers.insert(HEAD_RESPONSE_ERROR, Some(flag.to_string()));
    headers
}

/// Copies string and numeric leaves of `value` into `headers`, joining
/// nested keys with `.`. Other leaves are skipped.
fn flatten_into(key: &str, value: &Value, headers: &mut HeaderMap) {
    match value {
        Value::String(s) => headers.insert(key, Some(s.clone())),
        Value::Int(v) => headers.insert(key, Some(v.to_string())),
        Value::Long(v) => headers.insert(key, Some(v.to_string())),
        Value::Double(v) => headers.insert(key, Some(v.to_string())),
        Value::Map(map) => {
            for (k, v) in &map.entries {
                if let Some(k) = k.as_str() {
                    flatten_into(&format!("{key}.{k}"), v, headers);
                }
            }
        }
        Value::Object(obj) => {
            for (k, v) in &obj.fields {
                flatten_into(&format!("{key}.{k}"), v, headers);
            }
        }
        _ => {}
    }
}

/// Encodes an error message as raw UTF-8.
pub fn encode_exception(message: &str, buf: &mut BytesMut) {
    buf.put_slice(message.as_bytes());
}

pub fn decode_exception(content: &[u8]) -> RemoteError {
    RemoteError {
        status: ResponseStatus::ServerException,
        message: String::from_utf8_lossy(content).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves `EchoService.echo` and counts lookups.
    #[derive(Default)]
    struct EchoResolver {
        calls: AtomicUsize,
    }

    impl MethodResolver for EchoResolver {
        fn resolve(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (service == "com.demo.EchoService" && method == "echo").then(|| MethodDescriptor {
                request_type: Some("EchoRequest".into()),
                response_type: Some("EchoResponse".into()),
            })
        }
    }

    /// Writes string values as their UTF-8 bytes, tagged by type.
    struct TextCodec;

    impl ProtobufCodec for TextCodec {
        fn encode(&self, message_type: &str, value: &Value) -> Result<Bytes, ProtocolError> {
            let text = value
                .as_str()
                .ok_or_else(|| ProtocolError::Protobuf(format!("{message_type}: not a string")))?;
            Ok(Bytes::from(format!("{message_type}:{text}")))
        }

        fn decode(&self, message_type: &str, data: &[u8]) -> Result<Value, ProtocolError> {
            let text = std::str::from_utf8(data).map_err(|e| ProtocolError::Protobuf(e.to_string()))?;
            let body = text
                .strip_prefix(&format!("{message_type}:"))
                .ok_or_else(|| ProtocolError::Protobuf(format!("not a {message_type}")))?;
            Ok(Value::from(body))
        }
    }

    fn context(sent: Arc<SentRequests>) -> (ProtobufContext, Arc<EchoResolver>) {
        let resolver = Arc::new(EchoResolver::default());
        let ctx = ProtobufContext::new(resolver.clone(), Arc::new(TextCodec), sent);
        (ctx, resolver)
    }

    fn echo_request() -> RpcRequest {
        RpcRequest::new("com.demo.EchoService:1.0", "echo", vec![Value::from("hi")])
    }

    #[test]
    fn test_method_cache() {
        let (ctx, resolver) = context(Arc::new(SentRequests::new()));
        ctx.method("com.demo.EchoService:1.0", "echo").unwrap();
        ctx.method("com.demo.EchoService:1.0", "echo").unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_method() {
        let (ctx, _) = context(Arc::new(SentRequests::new()));
        let err = ctx.method("com.demo.EchoService:1.0", "shout").unwrap_err();
        assert_eq!(
            err.to_string(),
            "no such Method 'shout' in Service 'com.demo.EchoService'"
        );
    }

    #[test]
    fn test_request_headers_flatten_props() {
        let inner = Value::map(vec![(Value::from("id"), Value::Int(7))]);
        let req = echo_request()
            .with_prop("user", inner)
            .with_prop("zone", "gz")
            .with_prop("ignored", true);
        let mut headers = HeaderMap::new();
        request_headers(&req, &mut headers);

        assert_eq!(headers.get_str(HEAD_METHOD_NAME), Some("echo"));
        assert_eq!(headers.get_str(HEAD_TARGET_APP), Some(""));
        assert_eq!(
            headers.get_str(HEAD_TARGET_SERVICE),
            Some("com.demo.EchoService:1.0")
        );
        assert_eq!(headers.get_str("user.id"), Some("7"));
        assert_eq!(headers.get_str("zone"), Some("gz"));
        assert!(headers.get("ignored").is_none());
    }

    #[test]
    fn test_request_roundtrip_folds_trace_context() {
        let (ctx, _) = context(Arc::new(SentRequests::new()));
        let req = echo_request().with_prop(
            TRACE_CONTEXT,
            Value::map(vec![(Value::from("sofaTraceId"), Value::from("t-1"))]),
        );

        let mut headers = HeaderMap::new();
        headers.insert("service", Some(req.server_signature.clone()));
        request_headers(&req, &mut headers);
        assert_eq!(headers.get_str("rpc_trace_context.sofaTraceId"), Some("t-1"));

        let mut content = BytesMut::new();
        ctx.encode_request(&req, &mut content).unwrap();
        assert_eq!(content.as_ref(), b"EchoRequest:hi");

        let decoded = ctx.decode_request(headers, &content).unwrap();
        assert_eq!(decoded.server_signature, "com.demo.EchoService:1.0");
        assert_eq!(decoded.method_name, "echo");
        assert_eq!(decoded.args, vec![Value::from("hi")]);

        let trace = decoded.request_props.get(TRACE_CONTEXT).and_then(Value::as_map).unwrap();
        assert_eq!(trace.get("sofaTraceId"), Some(&Value::from("t-1")));
        assert!(!decoded.request_props.contains_key("rpc_trace_context.sofaTraceId"));
        assert_eq!(
            decoded.request_props.get("service"),
            Some(&Value::from("com.demo.EchoService:1.0"))
        );
    }

    #[test]
    fn test_response_needs_sent_request() {
        let sent = Arc::new(SentRequests::new());
        let (ctx, _) = context(sent.clone());

        let err = ctx.decode_response(9, b"EchoResponse:x").unwrap_err();
        assert_eq!(err.to_string(), "not found req for res#9");

        sent.insert(9, &echo_request());
        let mut content = BytesMut::new();
        ctx.encode_response(
            "com.demo.EchoService:1.0",
            "echo",
            &RpcResponse::ok(Value::from("x")),
            &mut content,
        )
        .unwrap();
        let body = ctx.decode_response(9, &content).unwrap();
        assert_eq!(body.app_response, Value::from("x"));
        assert_eq!(sent.remove(9).map(|s| s.method_name), Some("echo".to_string()));
        assert!(sent.is_empty());
    }

    #[test]
    fn test_response_error_header() {
        let headers = response_headers(&RpcResponse::error("x"));
        assert_eq!(headers.get_str(HEAD_RESPONSE_ERROR), Some("true"));
        let headers = response_headers(&RpcResponse::ok(Value::Null));
        assert_eq!(headers.get_str(HEAD_RESPONSE_ERROR), Some("false"));
    }

    #[test]
    fn test_exception_is_raw_text() {
        let mut buf = BytesMut::new();
        encode_exception("boom", &mut buf);
        assert_eq!(buf.as_ref(), b"boom");
        assert_eq!(decode_exception(&buf).message, "boom");
    }
}

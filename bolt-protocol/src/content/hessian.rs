//! Hessian 2.0 application types carried in request and response content.

use crate::error::{ProtocolError, ResponseStatus};
use crate::message::{AppResponse, RemoteError, ResponseBody, RpcRequest, RpcResponse};
use bolt_hessian::registry::{RPC_SERVER_EXCEPTION, SOFA_REQUEST, SOFA_RESPONSE};
use bolt_hessian::{HessianCodec, TypeDescriptor, Value, Version};
use bytes::BytesMut;
use std::collections::BTreeMap;

/// Class of exceptions raised by service handlers.
const APP_EXCEPTION: &str = "java.lang.Exception";

/// Message used when an error response carries no content.
pub const EMPTY_ERROR_MESSAGE: &str =
    "Server exception when invoke with callback.Please check the server log!";

/// Writes a `SofaRequest` envelope followed by one value per argument.
pub fn encode_request(
    codec: &HessianCodec,
    req: &RpcRequest,
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let sigs = req.arg_sigs().into_iter().map(Value::from).collect();
    let props = if req.request_props.is_empty() {
        Value::Null
    } else {
        Value::map(
            req.request_props
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                .collect(),
        )
    };
    let envelope = Value::object(
        SOFA_REQUEST,
        [
            ("methodName", Value::from(req.method_name.as_str())),
            ("methodArgSigs", Value::list(sigs)),
            (
                "targetServiceUniqueName",
                Value::from(req.server_signature.as_str()),
            ),
            ("targetAppName", Value::from(req.target_app_name.clone())),
            ("requestProps", props),
        ],
    );

    let mut writer = codec.writer(buf, Version::V2);
    writer.write_with(&TypeDescriptor::new(SOFA_REQUEST), &envelope)?;
    for arg in &req.args {
        writer.write_value(arg)?;
    }
    Ok(())
}

/// Reads a `SofaRequest` envelope and its arguments. Frame level fields
/// (timeout, oneway, codec) are left at their defaults.
pub fn decode_request(codec: &HessianCodec, content: &[u8]) -> Result<RpcRequest, ProtocolError> {
    let mut reader = codec.reader(content, Version::V2);
    let envelope = reader.read_value()?;
    if !matches!(envelope, Value::Object(_) | Value::Map(_)) {
        return Err(ProtocolError::MalformedContent(format!(
            "expected request envelope, found {}",
            envelope.kind()
        )));
    }

    let method_arg_sigs: Vec<String> = match field(&envelope, "methodArgSigs") {
        Some(Value::List(list)) => list
            .items
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect(),
        _ => Vec::new(),
    };
    let mut args = Vec::with_capacity(method_arg_sigs.len());
    for _ in 0..method_arg_sigs.len() {
        args.push(reader.read_value()?);
    }

    let request_props = match field(&envelope, "requestProps") {
        Some(Value::Map(map)) => map
            .entries
            .iter()
            .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.clone())))
            .collect(),
        _ => BTreeMap::new(),
    };

    let mut req = RpcRequest::new(
        string_field(&envelope, "targetServiceUniqueName").unwrap_or_default(),
        string_field(&envelope, "methodName").unwrap_or_default(),
        args,
    );
    req.method_arg_sigs = method_arg_sigs;
    req.target_app_name = string_field(&envelope, "targetAppName");
    req.request_props = request_props;
    Ok(req)
}

/// Writes a `SofaResponse` envelope for a successful call.
pub fn encode_response(
    codec: &HessianCodec,
    res: &RpcResponse,
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let app_response = match &res.app_response {
        AppResponse::Value(value) => value.clone(),
        AppResponse::Exception(message) => exception_object(APP_EXCEPTION, message),
    };
    let props = if res.response_props.is_empty() {
        Value::Null
    } else {
        Value::map(
            res.response_props
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), Value::from(v.as_str())))
                .collect(),
        )
    };
    let envelope = Value::object(
        SOFA_RESPONSE,
        [
            ("isError", Value::Bool(res.is_error())),
            ("errorMsg", Value::from(res.error_msg.clone())),
            ("appResponse", app_response),
            ("responseProps", props),
        ],
    );
    let mut writer = codec.writer(buf, Version::V2);
    writer.write_with(&TypeDescriptor::new(SOFA_RESPONSE), &envelope)?;
    Ok(())
}

/// Writes the `RpcServerException` payload of an error response.
pub fn encode_exception(
    codec: &HessianCodec,
    message: &str,
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let exception = exception_object(RPC_SERVER_EXCEPTION, message);
    let mut writer = codec.writer(buf, Version::V2);
    writer.write_with(&TypeDescriptor::new(RPC_SERVER_EXCEPTION), &exception)?;
    Ok(())
}

/// Decodes the content of a successful response.
pub fn decode_response(
    codec: &HessianCodec,
    class_name: &str,
    content: &[u8],
) -> Result<ResponseBody, ProtocolError> {
    let value = codec.decode(content, Version::V2)?;
    if class_name != SOFA_RESPONSE {
        return Ok(ResponseBody {
            app_response: value,
            ..Default::default()
        });
    }

    if let Value::String(message) = &value {
        return Ok(failed(message.clone()));
    }
    if let Some(message) = exception_message(&value) {
        return Ok(failed(message));
    }

    let response_props = match field(&value, "responseProps") {
        Some(Value::Map(map)) => map
            .entries
            .iter()
            .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    };
    let mut app_response = field(&value, "appResponse").cloned().unwrap_or_default();

    let mut error = None;
    if let Some(message) = exception_message(&app_response) {
        error = Some(app_error(message));
        app_response = Value::Null;
    } else if field(&value, "isError").and_then(Value::as_bool) == Some(true) {
        error = Some(app_error(
            string_field(&value, "errorMsg").unwrap_or_default(),
        ));
    }

    Ok(ResponseBody {
        error,
        app_response,
        response_props,
    })
}

/// Decodes the message of an error response payload.
pub fn decode_exception(codec: &HessianCodec, content: &[u8]) -> Result<Option<String>, ProtocolError> {
    let value = codec.decode(content, Version::V2)?;
    Ok(match value {
        Value::String(message) => Some(message),
        other => exception_message(&other),
    })
}

/// Builds an exception object as the Java side expects it.
fn exception_object(class_name: &str, message: &str) -> Value {
    Value::object(
        class_name,
        [
            ("detailMessage", Value::from(format!("Error: {message}"))),
            ("stackTrace", Value::list(Vec::new())),
            ("cause", Value::Null),
        ],
    )
}

/// Returns the message of a decoded throwable.
pub fn exception_message(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    let name = obj.class_name.as_str();
    let is_throwable = name.ends_with("Exception")
        || name.ends_with("Error")
        || name == "java.lang.Throwable";
    if !is_throwable {
        return None;
    }
    Some(
        obj.get("detailMessage")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    )
}

fn app_error(message: String) -> RemoteError {
    RemoteError {
        status: ResponseStatus::ServerException,
        message,
    }
}

fn failed(message: String) -> ResponseBody {
    ResponseBody {
        error: Some(app_error(message)),
        ..Default::default()
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(obj) => obj.get(name),
        Value::Map(map) => map.get(name),
        _ => None,
    }
}

fn string_field(value: &Value, name: &str) -> Option<String> {
    field(value, name).and_then(Value::as_str).map(str::to_string)
}

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// BOLT8 custom message type carrying LSPS traffic.
pub const LSPS_MESSAGE_TYPE: u32 = 37913;
/// Feature bit advertised by nodes offering LSPS services.
pub const LSP_FEATURE_BIT: u32 = 729;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_GET_INFO: &str = "lsps1.get_info";
pub const METHOD_CREATE_ORDER: &str = "lsps1.create_order";
pub const METHOD_GET_ORDER: &str = "lsps1.get_order";

/// JSON-RPC invalid params (missing or ill-typed fields).
pub const ERR_INVALID_PARAMS: i32 = -32602;
/// Request is well-formed but violates the advertised options.
pub const ERR_OPTION_MISMATCH: i32 = 100;
/// Referenced resource (order) does not exist.
pub const ERR_NOT_FOUND: i32 = 101;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// A JSON-RPC 2.0 shaped protocol message. Requests carry `method`/`params`,
/// responses carry `result` or `error`, echoing the request `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl WireMessage {
    pub fn request(id: Value, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// The single place protocol error objects are built.
    pub fn error_response(
        id: Value,
        code: i32,
        property: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.clone(),
                data: Some(ErrorData {
                    property: property.map(str::to_string),
                    message,
                }),
            }),
        }
    }
}

/// Renders a message as the hex text the peer-messaging transport carries.
pub fn encode(message: &WireMessage) -> Result<String> {
    let bytes = serde_json::to_vec(message).context("serialize wire message")?;
    Ok(hex::encode(bytes))
}

/// Decodes a transport payload. Anything that is not a well-formed message of
/// this protocol (bad hex, bad JSON, wrong `jsonrpc` tag) yields `None`: the
/// transport is shared with unrelated traffic and such payloads are ignored.
pub fn decode(payload_hex: &str) -> Option<WireMessage> {
    let bytes = hex::decode(payload_hex).ok()?;
    let message: WireMessage = serde_json::from_slice(&bytes).ok()?;
    if message.jsonrpc != JSONRPC_VERSION {
        return None;
    }
    Some(message)
}

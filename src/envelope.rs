//! JSON-RPC 2.0 envelope types and codecs.
//!
//! Requests are `{"jsonrpc":"2.0","method":…,"params":…,"id":…}` with an
//! unsigned 64-bit id; responses carry either `result` or `error`. The
//! `result` of a decoded response is kept as [`RawValue`] so the backend's
//! exact bytes survive forwarding unchanged. Id 0 is reserved for the
//! liveness probe and is never allocated to user requests.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

/// Protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request id reserved for the liveness probe; never surfaced to callers.
pub const PROBE_ID: u64 = 0;

/// Method name used by liveness probes.
pub const METHOD_PING: &str = "ping";

/// JSON-RPC error codes observable by callers.
pub mod codes {
    /// Success sentinel
    pub const NONE: i32 = 0;
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Transport failure; also used for local request timeouts.
    pub const TRANSPORT_ERROR: i32 = -32000;
}

/// The error member of a JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// A decoded incoming request (gateway side).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: u64,
}

/// A decoded incoming response (client side).
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    id: u64,
}

#[derive(Serialize)]
struct ResultEnvelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    result: &'a RawValue,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: i32,
    message: &'a str,
}

/// Encode a request envelope. Absent params encode as `{}`.
pub fn encode_request(
    id: u64,
    method: &str,
    params: Option<&Value>,
) -> Result<Vec<u8>, serde_json::Error> {
    let empty = Value::Object(serde_json::Map::new());
    let params = params.unwrap_or(&empty);
    serde_json::to_vec(&RequestEnvelope {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id,
    })
}

/// Encode a success response, splicing `result` in byte-for-byte.
pub fn encode_result_response(id: u64, result: &RawValue) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ResultEnvelope {
        jsonrpc: JSONRPC_VERSION,
        id,
        result,
    })
}

/// Encode an error response.
pub fn encode_error_response(
    id: u64,
    code: i32,
    message: &str,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ErrorEnvelope {
        jsonrpc: JSONRPC_VERSION,
        id,
        error: ErrorBody { code, message },
    })
}

/// Decode an incoming request payload.
pub fn decode_request(bytes: &[u8]) -> Result<RpcRequest, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Decode an incoming response payload.
pub fn decode_response(bytes: &[u8]) -> Result<RpcResponse, serde_json::Error> {
    serde_json::from_slice(bytes)
}

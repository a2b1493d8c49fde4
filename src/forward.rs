//! Gateway forwarder: acquire a pooled connection, relay the request
//! under its original id, release the connection, and translate the
//! outcome into a JSON-RPC response. The forwarder never retries; retry
//! policy belongs to higher layers.

use std::time::Duration;

use serde_json::value::RawValue;
use tracing::{error, warn};

use crate::config::BackendConfig;
use crate::envelope::{self, codes, RpcRequest};
use crate::error::ClientError;
use crate::manager::PoolManager;

/// Last-resort response when encoding itself fails, which would take a
/// broken allocator to reach.
const ENCODE_FALLBACK: &[u8] =
    b"{\"jsonrpc\":\"2.0\",\"id\":0,\"error\":{\"code\":-32603,\"message\":\"response encoding failed\"}}";

pub(crate) fn error_response(id: u64, code: i32, message: &str) -> Vec<u8> {
    match envelope::encode_error_response(id, code, message) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to encode error response: {e}");
            ENCODE_FALLBACK.to_vec()
        }
    }
}

fn result_response(id: u64, result: &RawValue) -> Vec<u8> {
    match envelope::encode_result_response(id, result) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to encode result response: {e}");
            ENCODE_FALLBACK.to_vec()
        }
    }
}

/// Forward `request` to `backend` through a pooled client engine.
///
/// Always yields a complete JSON-RPC response carrying the request's id:
/// the backend's exact result bytes on success, the backend's error
/// object on a protocol error, and a synthesised `-32000` error on
/// timeout or transport failure.
pub async fn forward(
    manager: &PoolManager,
    backend: &BackendConfig,
    request: &RpcRequest,
) -> Vec<u8> {
    let wait = Duration::from_millis(backend.pool.connect_timeout_ms);
    let client = match manager.get_connection(backend, wait).await {
        Ok(client) => client,
        Err(e) => {
            warn!(backend = %backend.name, "connection acquisition failed: {e}");
            return error_response(
                request.id,
                codes::INTERNAL_ERROR,
                "Gateway failed to get backend connection",
            );
        }
    };

    // A request without params forwards as `{}`, not `null`.
    let params = if request.params.is_null() {
        None
    } else {
        Some(request.params.clone())
    };
    let outcome = client.send_raw(&request.method, params, request.id).await;

    // The connection goes back whether the request succeeded or not.
    manager.release_connection(&backend.address, client).await;

    match outcome {
        Ok(result) => result_response(request.id, &result),
        Err(ClientError::Protocol { code, message }) => {
            error_response(request.id, code, &message)
        }
        Err(e @ ClientError::Timeout { .. }) => {
            warn!(backend = %backend.name, id = request.id, "forwarded request timed out");
            error_response(
                request.id,
                codes::TRANSPORT_ERROR,
                &format!("Gateway request to backend failed: {e}"),
            )
        }
        Err(ClientError::Transport(message)) => {
            warn!(backend = %backend.name, id = request.id, "forwarded request failed: {message}");
            error_response(
                request.id,
                codes::TRANSPORT_ERROR,
                &format!("Gateway request to backend failed: {message}"),
            )
        }
    }
}

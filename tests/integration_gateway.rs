//! Gateway end-to-end: parse, route, forward over pooled mock backends,
//! and translate failures into JSON-RPC error responses.

mod common;

use std::sync::Arc;

use common::MockConnector;
use mcp_gateway::{BackendConfig, ClientConfig, Connector, Gateway, GatewayConfig, PoolConfig};

fn backend(name: &str, address: &str) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        address: address.to_string(),
        pool: PoolConfig {
            min_connections: 0,
            ..Default::default()
        },
        resource_prefixes: Vec::new(),
        resource_regexes: Vec::new(),
        tool_names: Vec::new(),
    }
}

fn two_backend_config() -> GatewayConfig {
    let mut cache = backend("cache", "127.0.0.1:7100");
    cache.resource_prefixes = vec!["cache://".to_string()];
    let mut tools = backend("tools", "tcp://127.0.0.1:7200");
    tools.tool_names = vec!["echo".to_string()];

    GatewayConfig {
        client: ClientConfig {
            initial_probe: false,
            ..Default::default()
        },
        backends: vec![cache, tools],
    }
}

fn gateway_over(connector: Arc<MockConnector>) -> Gateway {
    let connector: Arc<dyn Connector> = connector;
    Gateway::with_connector(two_backend_config(), connector).unwrap()
}

/// Resource reads route by URI prefix and come back with the caller's id
/// and the backend's result bytes.
#[tokio::test]
async fn resource_request_routes_and_round_trips() {
    let connector = MockConnector::new();
    let gateway = gateway_over(Arc::clone(&connector));

    let response = gateway
        .handle(br#"{"jsonrpc":"2.0","method":"read_resource","params":{"uri":"cache://foo"},"id":7}"#)
        .await;
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 7);
    assert_eq!(response["result"]["echo"], "read_resource");
    assert_eq!(connector.addresses_dialed(), vec!["127.0.0.1:7100".to_string()]);

    // The connection went back to the pool after forwarding.
    let pool_backend = two_backend_config().backends[0].clone();
    let pool = gateway.manager().get_or_create_pool(&pool_backend).await;
    let (idle, active, _total) = pool.counts();
    assert_eq!(idle, 1);
    assert_eq!(active, 0);

    gateway.shutdown().await;
}

/// Tool calls route by exact name to their own backend.
#[tokio::test]
async fn tool_request_routes_to_tool_backend() {
    let connector = MockConnector::new();
    let gateway = gateway_over(Arc::clone(&connector));

    let response = gateway
        .handle(br#"{"jsonrpc":"2.0","method":"call_tool","params":{"name":"echo"},"id":3}"#)
        .await;
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(response["id"], 3);
    assert_eq!(response["result"]["echo"], "call_tool");
    assert_eq!(
        connector.addresses_dialed(),
        vec!["tcp://127.0.0.1:7200".to_string()]
    );
    gateway.shutdown().await;
}

/// Requests no backend serves come back as method-not-found errors.
#[tokio::test]
async fn unrouted_request_yields_method_not_found() {
    let connector = MockConnector::new();
    let gateway = gateway_over(Arc::clone(&connector));

    let response = gateway
        .handle(br#"{"jsonrpc":"2.0","method":"ping","params":{},"id":11}"#)
        .await;
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(response["id"], 11);
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(connector.connections_made(), 0);
    gateway.shutdown().await;
}

/// Unparseable payloads come back as parse errors.
#[tokio::test]
async fn garbage_payload_yields_parse_error() {
    let connector = MockConnector::new();
    let gateway = gateway_over(Arc::clone(&connector));

    let response = gateway.handle(b"this is not json").await;
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();
    assert_eq!(response["error"]["code"], -32700);
    gateway.shutdown().await;
}

/// An unreachable backend surfaces as an internal error, not a hang.
#[tokio::test]
async fn unreachable_backend_yields_internal_error() {
    let connector = MockConnector::new();
    connector.refuse_address("127.0.0.1:7100");
    let gateway = gateway_over(Arc::clone(&connector));

    let response = gateway
        .handle(br#"{"jsonrpc":"2.0","method":"read_resource","params":{"uri":"cache://x"},"id":5}"#)
        .await;
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(response["id"], 5);
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(
        response["error"]["message"],
        "Gateway failed to get backend connection"
    );
    gateway.shutdown().await;
}

/// A backend's own JSON-RPC error passes through with its code and the
/// caller's id.
#[tokio::test]
async fn backend_protocol_error_passes_through() {
    let connector = MockConnector::with_responder_factory(Box::new(|| {
        Box::new(|payload: &[u8]| {
            let request: serde_json::Value = serde_json::from_slice(payload).ok()?;
            let id = request.get("id")?.as_u64()?;
            if id == 0 {
                return None;
            }
            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32602, "message": "bad params"},
            });
            Some(serde_json::to_vec(&response).expect("test response encodes"))
        })
    }));
    let gateway = gateway_over(Arc::clone(&connector));

    let response = gateway
        .handle(br#"{"jsonrpc":"2.0","method":"call_tool","params":{"name":"echo"},"id":9}"#)
        .await;
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(response["id"], 9);
    assert_eq!(response["error"]["code"], -32602);
    assert_eq!(response["error"]["message"], "bad params");
    gateway.shutdown().await;
}

/// A silent backend turns into a `-32000` timeout response.
#[tokio::test]
async fn silent_backend_yields_transport_error() {
    let connector = MockConnector::silent();
    let mut config = two_backend_config();
    config.client.request_timeout_ms = 50;
    let connector_dyn: Arc<dyn Connector> = connector.clone();
    let gateway = Gateway::with_connector(config, connector_dyn).unwrap();

    let response = gateway
        .handle(br#"{"jsonrpc":"2.0","method":"call_tool","params":{"name":"echo"},"id":4}"#)
        .await;
    let response: serde_json::Value = serde_json::from_slice(&response).unwrap();

    assert_eq!(response["id"], 4);
    assert_eq!(response["error"]["code"], -32000);
    let message = response["error"]["message"].as_str().unwrap();
    assert!(message.contains("timed out"), "unexpected message: {message}");
    gateway.shutdown().await;
}

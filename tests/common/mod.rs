//! Shared mock transport and connector for integration tests.
//!
//! The mock transport records every payload the engine frames for the
//! wire and lets tests inject inbound payloads and transport failures
//! directly into the engine's handler. The mock connector builds engines
//! over such transports, optionally auto-responding like a backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use mcp_gateway::{
    Client, ClientConfig, Connector, MessageHandler, Transport, TransportError, TransportFailure,
    TransportState,
};

/// Produces an optional inbound payload for every payload sent.
pub type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

pub struct MockTransport {
    state: Mutex<TransportState>,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    sent_tx: mpsc::UnboundedSender<Vec<u8>>,
    fail_sends: AtomicBool,
    responder: Option<Responder>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        Self::build(None)
    }

    pub fn with_responder(responder: Responder) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        Self::build(Some(responder))
    }

    fn build(responder: Option<Responder>) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            state: Mutex::new(TransportState::Created),
            handler: Mutex::new(None),
            sent_tx,
            fail_sends: AtomicBool::new(false),
            responder,
        });
        (transport, sent_rx)
    }

    /// Deliver an inbound payload to the engine, as the reader task
    /// would.
    pub fn inject(&self, payload: &[u8]) {
        let handler = self
            .handler
            .lock()
            .clone()
            .expect("transport not started");
        handler.on_message(payload.to_vec());
    }

    /// Fire the fatal-failure hook, as the reader task would.
    pub fn fire_error(&self, failure: TransportFailure) {
        let handler = self
            .handler
            .lock()
            .clone()
            .expect("transport not started");
        handler.on_error(failure);
    }

    /// Make every subsequent send fail, simulating a dead connection.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            match *state {
                TransportState::Started => return Ok(()),
                TransportState::Created => *state = TransportState::Started,
                _ => return Err(TransportError::Stopped),
            }
        }
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    async fn stop(&self) {
        *self.state.lock() = TransportState::Stopped;
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if *self.state.lock() != TransportState::Started {
            return Err(TransportError::NotStarted);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("mock send failure".into()));
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        let _ = self.sent_tx.send(payload.to_vec());
        if let Some(responder) = &self.responder {
            if let Some(response) = responder(payload) {
                self.inject(&response);
            }
        }
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// A responder that answers every request (except the id-0 probe) with
/// a result echoing the request's method.
pub fn echo_responder() -> Responder {
    Box::new(|payload| {
        let request: serde_json::Value = serde_json::from_slice(payload).ok()?;
        let id = request.get("id")?.as_u64()?;
        if id == 0 {
            return None;
        }
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"echo": request.get("method")},
        });
        Some(serde_json::to_vec(&response).expect("test response encodes"))
    })
}

/// A responder that never answers (requests hang until they time out).
pub fn silent_responder() -> Responder {
    Box::new(|_| None)
}

/// Record of one connection built by the [`MockConnector`].
pub struct MadeConnection {
    pub address: String,
    pub engine_id: u64,
    pub transport: Arc<MockTransport>,
}

/// Connector building engines over [`MockTransport`]s.
pub struct MockConnector {
    /// Addresses for which `connect` fails outright.
    refuse: Mutex<HashMap<String, ()>>,
    refuse_all: AtomicBool,
    made: Mutex<Vec<MadeConnection>>,
    responder_factory: Box<dyn Fn() -> Responder + Send + Sync>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Self::with_responder_factory(Box::new(echo_responder))
    }

    pub fn silent() -> Arc<Self> {
        Self::with_responder_factory(Box::new(silent_responder))
    }

    pub fn with_responder_factory(
        responder_factory: Box<dyn Fn() -> Responder + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            refuse: Mutex::new(HashMap::new()),
            refuse_all: AtomicBool::new(false),
            made: Mutex::new(Vec::new()),
            responder_factory,
        })
    }

    pub fn refuse_address(&self, address: &str) {
        self.refuse.lock().insert(address.to_string(), ());
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    pub fn connections_made(&self) -> usize {
        self.made.lock().len()
    }

    pub fn addresses_dialed(&self) -> Vec<String> {
        self.made.lock().iter().map(|c| c.address.clone()).collect()
    }

    /// Transport of the `index`-th connection built, in creation order.
    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.made.lock()[index].transport)
    }

    pub fn engine_id(&self, index: usize) -> u64 {
        self.made.lock()[index].engine_id
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        address: &str,
        client_config: &ClientConfig,
        _connect_timeout: std::time::Duration,
    ) -> anyhow::Result<Client> {
        if self.refuse_all.load(Ordering::SeqCst) || self.refuse.lock().contains_key(address) {
            anyhow::bail!("connection refused: {address}");
        }
        let (transport, _outbound) = MockTransport::with_responder((self.responder_factory)());
        let engine_transport: Arc<dyn Transport> = transport.clone();
        let client = Client::start(engine_transport, client_config.clone()).await?;
        self.made.lock().push(MadeConnection {
            address: address.to_string(),
            engine_id: client.engine_id(),
            transport,
        });
        Ok(client)
    }
}

//! In-memory transport for unit tests.

use std::sync::{
    Weak,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    Kuzzle, KuzzleOptions,
    error::{KuzzleError, KuzzleResult},
    protocol::{Protocol, ProtocolListener},
    types::TransportState,
};

type Responder = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Records sent payloads and lets tests inject messages and transitions.
///
/// With a responder installed, every sent payload is answered synchronously
/// from inside [`Protocol::send`].
pub(crate) struct MockProtocol {
    state: Mutex<TransportState>,
    listeners: Mutex<Vec<Weak<dyn ProtocolListener>>>,
    sent: Mutex<Vec<Value>>,
    fail_send: AtomicBool,
    responder: Mutex<Option<Responder>>,
}

impl MockProtocol {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TransportState::Closed),
            listeners: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            fail_send: AtomicBool::new(false),
            responder: Mutex::new(None),
        }
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
        for listener in self.live_listeners() {
            listener.on_state_changed(state);
        }
    }

    pub(crate) fn deliver(&self, payload: &str) {
        for listener in self.live_listeners() {
            listener.on_message(payload);
        }
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub(crate) fn last_sent(&self) -> Option<Value> {
        self.sent.lock().last().cloned()
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    fn live_listeners(&self) -> Vec<std::sync::Arc<dyn ProtocolListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| listener.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

#[async_trait]
impl Protocol for MockProtocol {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn send(&self, payload: String) -> KuzzleResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(KuzzleError::websocket("Send queue closed"));
        }
        let request: Value = serde_json::from_str(&payload)?;
        self.sent.lock().push(request.clone());

        let reply = self
            .responder
            .lock()
            .as_ref()
            .and_then(|responder| responder(&request));
        if let Some(reply) = reply {
            self.deliver(&reply.to_string());
        }
        Ok(())
    }

    async fn connect(&self) -> KuzzleResult<()> {
        self.set_state(TransportState::Connecting);
        self.set_state(TransportState::Open);
        Ok(())
    }

    async fn disconnect(&self) -> KuzzleResult<()> {
        self.set_state(TransportState::Closed);
        Ok(())
    }

    fn add_listener(&self, listener: Weak<dyn ProtocolListener>) {
        self.listeners.lock().push(listener);
    }
}

/// A client over an already open mock transport.
pub(crate) fn connected_client() -> Kuzzle<MockProtocol> {
    connected_client_with(KuzzleOptions::default())
}

pub(crate) fn connected_client_with(options: KuzzleOptions) -> Kuzzle<MockProtocol> {
    let kuzzle = Kuzzle::with_options(MockProtocol::new(), options).unwrap();
    kuzzle.protocol().set_state(TransportState::Open);
    kuzzle
}

//! Query dispatcher: the [`Kuzzle`] client.
//!
//! [`Kuzzle`] sits between callers and a [`Protocol`]. It stamps each query
//! with a request id, parks an [`AwaitableResult`] in the
//! [`PendingQueryTable`] before handing the payload to the transport, and
//! settles that result when the matching response or a disconnect arrives.
//!
//! ```text
//! caller ── query() ──▶ PendingQueryTable.insert ──▶ Protocol.send
//!                                 ▲
//! Protocol ── on_message ─────────┤ take ─▶ resolve / reject
//!          ── on_state_changed ───┘ drain ─▶ reject(ConnectionLost)
//! ```
//!
//! A "dispatch gate" orders queries against disconnects: `query` holds it
//! shared while checking the state and inserting, a `Closed` transition
//! holds it exclusively while recording the state and draining. A query
//! therefore either lands before the drain and is rejected by it, or sees
//! the closed transport and inserts nothing.

use std::{ops::Deref, sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    awaitable::AwaitableResult,
    controllers::{AuthController, DocumentController},
    error::{KuzzleError, KuzzleResult},
    events::{EventKind, EventNotifier, KuzzleEvent, ListenerId},
    options::KuzzleOptions,
    pending::{PendingQuery, PendingQueryTable},
    protocol::{Protocol, ProtocolListener},
    response::{self, Response},
    types::{ConnectionState, RequestId, TransportState},
};

/// Shared dispatcher state. Registered with the protocol as its listener.
pub struct Dispatcher<P: Protocol> {
    protocol: Arc<P>,
    options: KuzzleOptions,
    pending: PendingQueryTable,
    events: EventNotifier,
    gate: RwLock<ConnectionState>,
    auth_token: RwLock<Option<String>>,
    instance_id: String,
}

/// Kuzzle client. Cheap to clone; clones share one dispatcher.
///
/// # Example
///
/// ```rust,ignore
/// use kuzzle_sdk::{Kuzzle, websocket::{WebSocketProtocol, WsConfig}};
///
/// let protocol = WebSocketProtocol::new(WsConfig::new("ws://localhost:7512"))?;
/// let kuzzle = Kuzzle::new(protocol)?;
/// kuzzle.connect().await?;
///
/// let response = kuzzle
///     .query(serde_json::json!({"controller": "server", "action": "now"}))?
///     .await?;
/// ```
pub struct Kuzzle<P: Protocol> {
    inner: Arc<Dispatcher<P>>,
}

impl<P: Protocol> Clone for Kuzzle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> Deref for Kuzzle<P> {
    type Target = Dispatcher<P>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<P: Protocol> Kuzzle<P> {
    /// Create a client over `protocol` with default options.
    pub fn new(protocol: P) -> KuzzleResult<Self> {
        Self::with_options(protocol, KuzzleOptions::default())
    }

    /// Create a client over `protocol`.
    pub fn with_options(protocol: P, options: KuzzleOptions) -> KuzzleResult<Self> {
        Self::from_shared(Arc::new(protocol), options)
    }

    /// Create a client over a protocol the caller keeps a handle to.
    pub fn from_shared(protocol: Arc<P>, options: KuzzleOptions) -> KuzzleResult<Self> {
        options.validate().map_err(KuzzleError::config)?;

        let inner = Arc::new(Dispatcher {
            protocol,
            pending: PendingQueryTable::new(options.max_pending_queries),
            options,
            events: EventNotifier::new(),
            gate: RwLock::new(ConnectionState::Disconnected),
            auth_token: RwLock::new(None),
            instance_id: RequestId::new().to_string(),
        });

        let as_listener: Arc<dyn ProtocolListener> = inner.clone();
        inner.protocol.add_listener(Arc::downgrade(&as_listener));

        Ok(Self { inner })
    }

    /// Document controller bound to this client.
    pub fn document(&self) -> DocumentController<P> {
        DocumentController::new(self.clone())
    }

    /// Auth controller bound to this client.
    pub fn auth(&self) -> AuthController<P> {
        AuthController::new(self.clone())
    }
}

impl<P: Protocol> Dispatcher<P> {
    /// Open the transport.
    pub async fn connect(&self) -> KuzzleResult<()> {
        self.protocol.connect().await
    }

    /// Close the transport. Pending queries are rejected once the transport
    /// reports the closed state.
    pub async fn disconnect(&self) -> KuzzleResult<()> {
        self.protocol.disconnect().await
    }

    /// The underlying protocol.
    pub fn protocol(&self) -> &Arc<P> {
        &self.protocol
    }

    /// Options in use.
    pub fn options(&self) -> &KuzzleOptions {
        &self.options
    }

    /// Last connection state reported by the transport.
    pub fn state(&self) -> ConnectionState {
        *self.gate.read()
    }

    /// Number of queries awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Read-only view of the pending query table.
    pub fn pending(&self) -> &PendingQueryTable {
        &self.pending
    }

    /// Event listener registry.
    pub fn events(&self) -> &EventNotifier {
        &self.events
    }

    /// Current authentication token.
    pub fn authentication_token(&self) -> Option<String> {
        self.auth_token.read().clone()
    }

    /// Set or clear the token attached to queries as `jwt`.
    pub fn set_authentication_token(&self, token: Option<String>) {
        *self.auth_token.write() = token;
    }

    /// Register a listener for token expiry.
    pub fn register_token_expired_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_token_expired(listener)
    }

    /// Unregister a token expiry listener.
    pub fn unregister_token_expired_event(&self, id: ListenerId) -> bool {
        self.events.unregister(EventKind::TokenExpired, id)
    }

    /// Register a listener for responses matching no pending query.
    pub fn register_unhandled_response_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.events.on_unhandled_response(listener)
    }

    /// Unregister an unhandled response listener.
    pub fn unregister_unhandled_response_event(&self, id: ListenerId) -> bool {
        self.events.unregister(EventKind::UnhandledResponse, id)
    }

    /// Send a query and return the result to await.
    ///
    /// `request` must be a JSON object, typically carrying `controller` and
    /// `action`. A string `requestId` is used as the correlation id; if
    /// absent one is generated and written into the payload.
    ///
    /// Fails synchronously with [`KuzzleError::NotConnected`] when the
    /// transport is not open, with [`KuzzleError::Internal`] on a malformed
    /// payload or a request id that is already pending, and with the
    /// transport's error if the payload cannot be enqueued.
    pub fn query(&self, request: Value) -> KuzzleResult<AwaitableResult> {
        self.dispatch(request).map(|(_, result)| result)
    }

    /// Send a query and wait for its response, giving up after `timeout`.
    ///
    /// On timeout the query is removed from the pending table and its result
    /// rejected with [`KuzzleError::Timeout`]; a late response is then
    /// reported as unhandled.
    pub async fn query_with_timeout(
        &self,
        request: Value,
        timeout: Duration,
    ) -> KuzzleResult<Response> {
        let (request_id, result) = self.dispatch(request)?;
        match tokio::time::timeout(timeout, result.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = KuzzleError::timeout(timeout);
                if let Some(pending) = self.pending.take(&request_id) {
                    debug!(request_id = %request_id, "Query timed out");
                    pending.result.reject(err.clone());
                }
                // A response may have settled it between the deadline and the take.
                result.outcome().unwrap_or(Err(err))
            }
        }
    }

    fn dispatch(&self, request: Value) -> KuzzleResult<(RequestId, AwaitableResult)> {
        let mut request = match request {
            Value::Object(map) => map,
            _ => return Err(KuzzleError::internal("Query payload must be a JSON object")),
        };
        self.decorate(&mut request)?;

        let (request_id, result) = {
            let _gate = self.gate.read();

            if !self.protocol.state().is_open() {
                return Err(KuzzleError::NotConnected);
            }

            let request_id = match request.get("requestId") {
                None | Some(Value::Null) => {
                    let id = RequestId::new();
                    request.insert("requestId".to_string(), Value::String(id.to_string()));
                    id
                }
                Some(Value::String(id)) => RequestId::from(id.as_str()),
                Some(_) => return Err(KuzzleError::internal("requestId must be a string")),
            };

            let jwt = request.get("jwt").and_then(Value::as_str).map(str::to_string);
            let result = AwaitableResult::new();
            self.pending
                .insert(request_id.clone(), PendingQuery::new(result.clone(), jwt))
                .map_err(|err| match err {
                    KuzzleError::CapacityExceeded { .. } => err,
                    other => KuzzleError::internal(other.to_string()),
                })?;
            (request_id, result)
        };

        let sent = serde_json::to_string(&request)
            .map_err(KuzzleError::from)
            .and_then(|payload| self.protocol.send(payload));

        if let Err(err) = sent {
            if let Some(pending) = self.pending.take(&request_id) {
                pending.result.reject(err.clone());
            }
            warn!(request_id = %request_id, error = %err, "Failed to send query");
            return Err(err);
        }

        debug!(request_id = %request_id, "Query sent");
        Ok((request_id, result))
    }

    /// Send a query and wait for its response with the default timeout.
    pub async fn query_and_wait(&self, request: Value) -> KuzzleResult<Response> {
        self.query_with_timeout(request, self.options.default_query_timeout)
            .await
    }

    fn decorate(&self, request: &mut Map<String, Value>) -> KuzzleResult<()> {
        let volatile = request
            .entry("volatile")
            .or_insert_with(|| Value::Object(Map::new()));
        if volatile.is_null() {
            *volatile = Value::Object(Map::new());
        }
        let Value::Object(volatile) = volatile else {
            return Err(KuzzleError::internal("Volatile data must be a JSON object"));
        };
        volatile.insert(
            "sdkInstanceId".to_string(),
            Value::String(self.instance_id.clone()),
        );
        volatile.insert(
            "sdkName".to_string(),
            Value::String(self.options.sdk_name.clone()),
        );

        if !request.contains_key("jwt")
            && let Some(token) = self.auth_token.read().clone()
        {
            request.insert("jwt".to_string(), Value::String(token));
        }
        Ok(())
    }

    fn handle_response(&self, response: Response) {
        let ids = response.correlation_ids();
        if ids.is_empty() {
            warn!("Dropping response without request id or room");
            return;
        }

        let Some((request_id, pending)) = ids
            .into_iter()
            .find_map(|id| self.pending.take(&id).map(|pending| (id, pending)))
        else {
            warn!(
                request_id = ?response.request_id,
                room = ?response.room,
                "Unhandled response"
            );
            self.events
                .trigger(&KuzzleEvent::UnhandledResponse(response));
            return;
        };

        match &response.error {
            Some(error) => {
                if error.message == self.options.token_expired_message {
                    info!(request_id = %request_id, "Authentication token expired");
                    self.clear_expired_token(pending.jwt.as_deref());
                    self.events.trigger(&KuzzleEvent::TokenExpired);
                }
                debug!(request_id = %request_id, status = error.status, "Query rejected");
                pending
                    .result
                    .reject(KuzzleError::api(error.status, error.message.clone()));
            }
            None => {
                debug!(request_id = %request_id, "Query resolved");
                pending.result.resolve(response);
            }
        }
    }

    /// Settle the query a malformed response was meant for, if any.
    fn handle_undecodable(&self, payload: &str, err: KuzzleError) {
        let Some((request_id, pending)) = response::raw_correlation_ids(payload)
            .into_iter()
            .find_map(|id| self.pending.take(&id).map(|pending| (id, pending)))
        else {
            warn!(error = %err, "Dropping undecodable message");
            return;
        };

        warn!(request_id = %request_id, error = %err, "Undecodable response");
        pending.result.reject(err);
    }

    /// Clear the stored token if it is still the one the expired query used.
    fn clear_expired_token(&self, used: Option<&str>) {
        let mut token = self.auth_token.write();
        if used.is_some() && token.as_deref() == used {
            *token = None;
        }
    }
}

impl<P: Protocol> ProtocolListener for Dispatcher<P> {
    fn on_message(&self, payload: &str) {
        match Response::from_json(payload) {
            Ok(response) => self.handle_response(response),
            Err(err) => self.handle_undecodable(payload, err),
        }
    }

    fn on_state_changed(&self, state: TransportState) {
        let drained = {
            let mut gate = self.gate.write();
            *gate = ConnectionState::from(state);
            if !state.is_closed() {
                debug!(%state, "Transport state changed");
                return;
            }
            self.pending.drain_all()
        };

        info!(pending = drained.len(), "Connection closed");
        for (_, pending) in drained {
            pending.result.reject(KuzzleError::connection_lost(None));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::mock::{MockProtocol, connected_client, connected_client_with};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        (hits, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let kuzzle = Kuzzle::new(MockProtocol::new()).unwrap();
        assert_eq!(kuzzle.state(), ConnectionState::Disconnected);
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let result = Kuzzle::with_options(
            MockProtocol::new(),
            KuzzleOptions::new().max_pending_queries(0),
        );
        assert!(matches!(result, Err(KuzzleError::Config { .. })));
    }

    #[tokio::test]
    async fn test_connect_tracks_transport_state() {
        let kuzzle = Kuzzle::new(MockProtocol::new()).unwrap();
        kuzzle.connect().await.unwrap();
        assert_eq!(kuzzle.state(), ConnectionState::Connected);

        kuzzle.disconnect().await.unwrap();
        assert_eq!(kuzzle.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_query_while_connected_creates_one_entry() {
        let kuzzle = connected_client();
        let result = kuzzle
            .query(json!({"controller": "server", "action": "now"}))
            .unwrap();

        assert_eq!(kuzzle.pending_count(), 1);
        assert!(!result.is_settled());
        assert_eq!(kuzzle.protocol().sent().len(), 1);
    }

    #[test]
    fn test_query_while_disconnected_fails() {
        let kuzzle = Kuzzle::new(MockProtocol::new()).unwrap();
        let err = kuzzle
            .query(json!({"controller": "server", "action": "now"}))
            .unwrap_err();

        assert_eq!(err, KuzzleError::NotConnected);
        assert_eq!(kuzzle.pending_count(), 0);
        assert!(kuzzle.protocol().sent().is_empty());
    }

    #[test]
    fn test_query_while_connecting_fails() {
        let kuzzle = Kuzzle::new(MockProtocol::new()).unwrap();
        kuzzle.protocol().set_state(TransportState::Connecting);

        let err = kuzzle.query(json!({"action": "now"})).unwrap_err();
        assert_eq!(err, KuzzleError::NotConnected);
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[test]
    fn test_query_decorates_request() {
        let kuzzle = connected_client_with(KuzzleOptions::new().sdk_name("test-sdk"));
        kuzzle.set_authentication_token(Some("secret".to_string()));

        kuzzle
            .query(json!({"controller": "server", "action": "now", "volatile": {"app": "x"}}))
            .unwrap();

        let sent = kuzzle.protocol().last_sent().unwrap();
        assert_eq!(sent["jwt"], "secret");
        assert_eq!(sent["volatile"]["app"], "x");
        assert_eq!(sent["volatile"]["sdkName"], "test-sdk");
        assert!(sent["volatile"]["sdkInstanceId"].is_string());
        assert!(sent["requestId"].is_string());
    }

    #[test]
    fn test_query_keeps_caller_jwt_and_request_id() {
        let kuzzle = connected_client();
        kuzzle.set_authentication_token(Some("stored".to_string()));

        kuzzle
            .query(json!({"action": "now", "jwt": "explicit", "requestId": "mine"}))
            .unwrap();

        let sent = kuzzle.protocol().last_sent().unwrap();
        assert_eq!(sent["jwt"], "explicit");
        assert_eq!(sent["requestId"], "mine");
        assert!(kuzzle.pending().contains(&RequestId::from("mine")));
    }

    #[test]
    fn test_malformed_requests_are_internal_errors() {
        let kuzzle = connected_client();

        for request in [
            json!("not an object"),
            json!({"action": "now", "volatile": "oops"}),
            json!({"action": "now", "requestId": 42}),
        ] {
            let err = kuzzle.query(request).unwrap_err();
            assert!(matches!(err, KuzzleError::Internal { .. }), "{err:?}");
        }
        assert_eq!(kuzzle.pending_count(), 0);
        assert!(kuzzle.protocol().sent().is_empty());
    }

    #[test]
    fn test_duplicate_request_id_is_internal_error() {
        let kuzzle = connected_client();
        let first = kuzzle.query(json!({"requestId": "dup"})).unwrap();

        let err = kuzzle.query(json!({"requestId": "dup"})).unwrap_err();
        assert!(matches!(err, KuzzleError::Internal { .. }));
        assert_eq!(kuzzle.pending_count(), 1);
        assert!(!first.is_settled());
    }

    #[test]
    fn test_capacity_exceeded() {
        let kuzzle = connected_client_with(KuzzleOptions::new().max_pending_queries(1));
        kuzzle.query(json!({"action": "a"})).unwrap();

        let err = kuzzle.query(json!({"action": "b"})).unwrap_err();
        assert!(matches!(err, KuzzleError::CapacityExceeded { .. }));
        assert_eq!(kuzzle.pending_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_respect_capacity() {
        let kuzzle = connected_client_with(KuzzleOptions::new().max_pending_queries(5));
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let kuzzle = kuzzle.clone();
                tokio::spawn(async move { kuzzle.query(json!({"action": "now"})) })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert!(matches!(err, KuzzleError::CapacityExceeded { .. })),
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(kuzzle.pending_count(), 5);
    }

    #[test]
    fn test_send_failure_rejects_and_removes_entry() {
        let kuzzle = connected_client();
        kuzzle.protocol().fail_sends(true);

        let err = kuzzle.query(json!({"requestId": "r"})).unwrap_err();
        assert!(matches!(err, KuzzleError::WebSocket { .. }));
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_success_response_resolves() {
        let kuzzle = connected_client();
        let result = kuzzle.query(json!({"requestId": "r1"})).unwrap();

        kuzzle.on_message(r#"{"requestId":"r1","status":200,"result":{"ok":true}}"#);

        let response = result.await.unwrap();
        assert_eq!(response.result, Some(json!({"ok": true})));
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_response_rejects_with_api_error() {
        let kuzzle = connected_client();
        let result = kuzzle.query(json!({"requestId": "bad"})).unwrap();

        kuzzle.on_message(
            r#"{"requestId":"bad","status":404,"error":{"message":"Not found","status":404}}"#,
        );

        assert_eq!(result.await.unwrap_err(), KuzzleError::api(404, "Not found"));
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_id_takes_precedence_over_room() {
        let kuzzle = connected_client();
        let a = kuzzle.query(json!({"requestId": "A"})).unwrap();
        let b = kuzzle.query(json!({"requestId": "B"})).unwrap();

        kuzzle.on_message(r#"{"requestId":"B","room":"A","result":{"for":"B"}}"#);

        assert!(!a.is_settled());
        assert_eq!(b.await.unwrap().result, Some(json!({"for": "B"})));
        assert_eq!(kuzzle.pending_count(), 1);
        assert!(kuzzle.pending().contains(&RequestId::from("A")));
    }

    #[test]
    fn test_falls_back_to_room_when_request_id_unknown() {
        let kuzzle = connected_client();
        let result = kuzzle.query(json!({"requestId": "room-1"})).unwrap();

        kuzzle.on_message(r#"{"room":"room-1","requestId":"other","result":{}}"#);

        assert!(result.is_settled());
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[test]
    fn test_room_only_response_is_correlated() {
        let kuzzle = connected_client();
        let result = kuzzle.query(json!({"requestId": "room-1"})).unwrap();

        kuzzle.on_message(r#"{"room":"room-1","result":{}}"#);

        assert!(result.is_settled());
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_stack_of_any_shape_still_rejects() {
        let kuzzle = connected_client();
        let result = kuzzle.query(json!({"requestId": "r1"})).unwrap();

        kuzzle.on_message(
            r#"{"requestId":"r1","error":{"message":"boom","status":400,"stack":["x"]}}"#,
        );

        assert_eq!(result.await.unwrap_err(), KuzzleError::api(400, "boom"));
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_rejects_its_query() {
        let kuzzle = connected_client();
        let (hits, listener) = counter();
        kuzzle.register_unhandled_response_event(move |_| listener());
        let result = kuzzle.query(json!({"requestId": "r1"})).unwrap();

        kuzzle.on_message(r#"{"requestId":"r1","status":"teapot","result":{}}"#);

        assert!(matches!(
            result.await,
            Err(KuzzleError::Serialization { .. })
        ));
        assert_eq!(kuzzle.pending_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_response_fires_unhandled_once() {
        let kuzzle = connected_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        kuzzle.register_unhandled_response_event(move |response| {
            sink.lock().push(response.request_id.clone());
        });

        assert_eq!(kuzzle.pending_count(), 0);
        kuzzle.on_message(r#"{"requestId":"unknown"}"#);

        assert_eq!(*seen.lock(), vec![Some("unknown".to_string())]);
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[test]
    fn test_unknown_response_leaves_table_unchanged() {
        let kuzzle = connected_client();
        let pending = kuzzle.query(json!({"requestId": "kept"})).unwrap();

        kuzzle.on_message(r#"{"requestId":"other","result":{}}"#);

        assert_eq!(kuzzle.pending_count(), 1);
        assert!(!pending.is_settled());
    }

    #[test]
    fn test_uncorrelatable_messages_are_dropped() {
        let kuzzle = connected_client();
        let (hits, listener) = counter();
        kuzzle.register_unhandled_response_event(move |_| listener());
        kuzzle.query(json!({"requestId": "r"})).unwrap();

        kuzzle.on_message("not json");
        kuzzle.on_message(r#"{"result":{}}"#);
        kuzzle.on_message(r#"{"requestId":"","room":""}"#);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(kuzzle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_rejects_every_pending_query() {
        let kuzzle = connected_client();
        let results: Vec<_> = (0..5)
            .map(|i| kuzzle.query(json!({"requestId": format!("q{i}")})).unwrap())
            .collect();

        kuzzle.protocol().set_state(TransportState::Closed);

        assert_eq!(kuzzle.pending_count(), 0);
        assert_eq!(kuzzle.state(), ConnectionState::Disconnected);
        for result in results {
            assert!(matches!(
                result.await,
                Err(KuzzleError::ConnectionLost { .. })
            ));
        }
    }

    #[test]
    fn test_connecting_leaves_pending_untouched() {
        let kuzzle = connected_client();
        let result = kuzzle.query(json!({"requestId": "r"})).unwrap();

        kuzzle.on_state_changed(TransportState::Connecting);

        assert_eq!(kuzzle.state(), ConnectionState::Connecting);
        assert_eq!(kuzzle.pending_count(), 1);
        assert!(!result.is_settled());
    }

    #[tokio::test]
    async fn test_token_expired_notifies_and_rejects() {
        let kuzzle = connected_client();
        kuzzle.set_authentication_token(Some("old".to_string()));
        let (hits, listener) = counter();
        kuzzle.register_token_expired_event(listener);

        let result = kuzzle.query(json!({"requestId": "room-id"})).unwrap();
        kuzzle.on_message(
            r#"{"room":"room-id","status":401,"error":{"message":"Token expired","status":401}}"#,
        );

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.await.unwrap_err(),
            KuzzleError::api(401, "Token expired")
        );
        assert_eq!(kuzzle.authentication_token(), None);
        assert_eq!(kuzzle.pending_count(), 0);
    }

    #[test]
    fn test_token_expiry_keeps_a_newer_token() {
        let kuzzle = connected_client();
        kuzzle.set_authentication_token(Some("old".to_string()));
        let (hits, listener) = counter();
        kuzzle.register_token_expired_event(listener);

        let result = kuzzle.query(json!({"requestId": "r"})).unwrap();
        kuzzle.set_authentication_token(Some("fresh".to_string()));
        kuzzle.on_message(r#"{"requestId":"r","error":{"message":"Token expired","status":401}}"#);

        assert!(result.is_rejected());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(kuzzle.authentication_token().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_other_errors_do_not_fire_token_expired() {
        let kuzzle = connected_client();
        let (hits, listener) = counter();
        kuzzle.register_token_expired_event(listener);

        let result = kuzzle.query(json!({"requestId": "r"})).unwrap();
        kuzzle.on_message(r#"{"requestId":"r","error":{"message":"Forbidden","status":403}}"#);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(result.is_rejected());
    }

    #[test]
    fn test_custom_token_expired_message() {
        let kuzzle =
            connected_client_with(KuzzleOptions::new().token_expired_message("jwt expired"));
        let (hits, listener) = counter();
        kuzzle.register_token_expired_event(listener);

        kuzzle.query(json!({"requestId": "r"})).unwrap();
        kuzzle.on_message(r#"{"requestId":"r","error":{"message":"jwt expired","status":401}}"#);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregistered_listener_not_called() {
        let kuzzle = connected_client();
        let (hits, listener) = counter();
        let id = kuzzle.register_token_expired_event(listener);
        assert!(kuzzle.unregister_token_expired_event(id));

        kuzzle.query(json!({"requestId": "r"})).unwrap();
        kuzzle.on_message(r#"{"requestId":"r","error":{"message":"Token expired","status":401}}"#);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_settlement_has_no_effect() {
        let kuzzle = connected_client();
        let (hits, listener) = counter();
        kuzzle.register_unhandled_response_event(move |_| listener());

        let result = kuzzle.query(json!({"requestId": "once"})).unwrap();
        kuzzle.on_message(r#"{"requestId":"once","result":1}"#);
        assert!(!result.reject(KuzzleError::NotConnected));
        kuzzle.on_state_changed(TransportState::Closed);

        assert_eq!(result.await.unwrap().result, Some(json!(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_with_timeout_removes_entry() {
        let kuzzle = connected_client();
        let (hits, listener) = counter();
        kuzzle.register_unhandled_response_event(move |_| listener());

        let err = kuzzle
            .query_with_timeout(json!({"requestId": "slow"}), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert_eq!(err, KuzzleError::timeout(Duration::from_millis(50)));
        assert_eq!(kuzzle.pending_count(), 0);

        kuzzle.on_message(r#"{"requestId":"slow","result":{}}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_and_wait_with_responder() {
        let kuzzle = connected_client();
        kuzzle.protocol().respond_with(|request| {
            Some(json!({"requestId": request["requestId"], "result": {"now": 1}}))
        });

        let response = kuzzle
            .query_and_wait(json!({"controller": "server", "action": "now"}))
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!({"now": 1})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_and_close_never_leak_entries() {
        for _ in 0..20 {
            let kuzzle = connected_client();
            let mut tasks = Vec::new();
            for _ in 0..8 {
                let kuzzle = kuzzle.clone();
                tasks.push(tokio::spawn(async move {
                    kuzzle.query(json!({"action": "now"})).ok()
                }));
            }
            let closer = {
                let kuzzle = kuzzle.clone();
                tokio::spawn(async move { kuzzle.protocol().set_state(TransportState::Closed) })
            };

            closer.await.unwrap();
            let mut results = Vec::new();
            for task in tasks {
                if let Some(result) = task.await.unwrap() {
                    results.push(result);
                }
            }

            assert_eq!(kuzzle.pending_count(), 0);
            for result in results {
                assert!(result.is_settled());
            }
        }
    }

    #[test]
    fn test_dropping_client_releases_listener() {
        let protocol = Arc::new(MockProtocol::new());
        let kuzzle = Kuzzle::from_shared(Arc::clone(&protocol), KuzzleOptions::default()).unwrap();
        drop(kuzzle);

        protocol.set_state(TransportState::Open);
        protocol.deliver(r#"{"requestId":"x"}"#);
    }
}

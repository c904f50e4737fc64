//! Transport abstraction used by the query dispatcher.
//!
//! A [`Protocol`] moves serialized queries to the backend and reports
//! incoming payloads and state transitions to its registered
//! [`ProtocolListener`]s. How it connects, frames bytes or detects failures
//! is up to the implementation.

use std::sync::Weak;

use async_trait::async_trait;

use crate::{error::KuzzleResult, types::TransportState};

/// Receiver of transport notifications.
pub trait ProtocolListener: Send + Sync {
    /// Called with the raw text of every incoming message.
    fn on_message(&self, payload: &str);

    /// Called after the transport state changed.
    fn on_state_changed(&self, state: TransportState);
}

/// Trait implemented by network transports.
///
/// # Contract
///
/// - [`state`](Protocol::state) must already report the new state when
///   listeners are notified of a transition.
/// - [`send`](Protocol::send) must not block on network I/O; it enqueues the
///   payload and reports only synchronous failures.
/// - Listeners are held weakly; dead ones may be pruned at any time.
///
/// # Example
///
/// ```rust
/// use std::sync::Weak;
///
/// use async_trait::async_trait;
/// use kuzzle_sdk::{KuzzleResult, Protocol, ProtocolListener, TransportState};
///
/// struct Loopback;
///
/// #[async_trait]
/// impl Protocol for Loopback {
///     fn state(&self) -> TransportState {
///         TransportState::Open
///     }
///
///     fn send(&self, _payload: String) -> KuzzleResult<()> {
///         Ok(())
///     }
///
///     async fn connect(&self) -> KuzzleResult<()> {
///         Ok(())
///     }
///
///     async fn disconnect(&self) -> KuzzleResult<()> {
///         Ok(())
///     }
///
///     fn add_listener(&self, _listener: Weak<dyn ProtocolListener>) {}
/// }
/// ```
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// Current transport state.
    fn state(&self) -> TransportState;

    /// Enqueue a serialized payload for transmission.
    fn send(&self, payload: String) -> KuzzleResult<()>;

    /// Open the connection.
    async fn connect(&self) -> KuzzleResult<()>;

    /// Close the connection.
    async fn disconnect(&self) -> KuzzleResult<()>;

    /// Register a listener for messages and state transitions.
    fn add_listener(&self, listener: Weak<dyn ProtocolListener>);
}

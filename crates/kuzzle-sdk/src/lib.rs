//! # Kuzzle SDK
//!
//! Asynchronous client for the Kuzzle backend.
//!
//! The core of the crate is the query dispatcher: every request sent
//! through [`Kuzzle::query`] is tagged with a request id and parked in a
//! lock-free table until the matching response arrives, the transport
//! closes, or the caller gives up. Responses are correlated by `room` then
//! `requestId`; anything left unmatched is reported through the
//! unhandled-response event.
//!
//! ## Features
//!
//! - **Transport agnostic**: any type implementing [`Protocol`] can carry
//!   queries; a WebSocket implementation ships behind the `websocket` feature
//! - **Settle once**: each [`AwaitableResult`] resolves or rejects exactly
//!   once and may be awaited from several tasks
//! - **No leaks on disconnect**: a closed transport rejects every pending
//!   query with [`KuzzleError::ConnectionLost`]
//! - **Token expiry**: an expired authentication token is cleared and
//!   reported through a listener
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kuzzle_sdk::{
//!     Kuzzle,
//!     websocket::{WebSocketProtocol, WsConfig},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let protocol = WebSocketProtocol::new(WsConfig::new("ws://localhost:7512"))?;
//!     let kuzzle = Kuzzle::new(protocol)?;
//!     kuzzle.connect().await?;
//!
//!     let now = kuzzle
//!         .query(serde_json::json!({"controller": "server", "action": "now"}))?
//!         .await?;
//!     println!("{:?}", now.result);
//!
//!     kuzzle.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod awaitable;
pub mod controllers;
pub mod error;
pub mod events;
pub mod kuzzle;
pub mod options;
pub mod pending;
pub mod protocol;
pub mod response;
pub mod types;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
mod mock;

// Re-export commonly used types
pub use awaitable::AwaitableResult;
pub use controllers::{AuthController, DocumentController};
pub use error::{KuzzleError, KuzzleResult};
pub use events::{EventKind, EventNotifier, KuzzleEvent, ListenerId};
pub use kuzzle::{Dispatcher, Kuzzle};
pub use options::KuzzleOptions;
pub use pending::PendingQueryTable;
pub use protocol::{Protocol, ProtocolListener};
pub use response::{ErrorResponse, Response};
pub use types::{ConnectionState, RequestId, TransportState};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketProtocol, WsConfig};

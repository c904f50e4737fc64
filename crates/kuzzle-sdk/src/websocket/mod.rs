//! WebSocket transport.
//!
//! [`WebSocketProtocol`] implements [`Protocol`](crate::Protocol) on top of
//! `tokio-tungstenite`. A background task owns the socket:
//!
//! ```text
//! ┌─────────────┐  send()   ┌─────────────────┐  frames  ┌──────────────┐
//! │   Kuzzle    │──────────▶│ connection_task │◀────────▶│    Kuzzle    │
//! │ (listener)  │◀──────────│  (background)   │          │    server    │
//! └─────────────┘ callbacks └─────────────────┘          └──────────────┘
//! ```
//!
//! Outgoing payloads go through a bounded channel, so [`send`](crate::Protocol::send)
//! never waits on the network. Incoming text frames are handed to every
//! registered listener. When the socket ends for any reason the state
//! becomes [`Closed`](crate::TransportState::Closed) and listeners are told.
//! There is no automatic reconnection.
//!
//! # Example
//!
//! ```rust,ignore
//! use kuzzle_sdk::{Kuzzle, websocket::{WebSocketProtocol, WsConfig}};
//!
//! let config = WsConfig::new("ws://localhost:7512")
//!     .ping_interval(std::time::Duration::from_secs(10));
//! let kuzzle = Kuzzle::new(WebSocketProtocol::new(config)?)?;
//! kuzzle.connect().await?;
//! ```

mod config;
mod connection;

pub use config::WsConfig;
pub use connection::WebSocketProtocol;

//! Typed request builders for Kuzzle API controllers.
//!
//! Controllers hold no state of their own: each method builds a request,
//! runs it through [`Kuzzle::query`](crate::Kuzzle) and extracts the
//! `result` payload.

mod auth;
mod document;

pub use auth::{AuthController, TokenValidity};
pub use document::{CreateOptions, DocumentController, SearchOptions, SearchResult, UpdateOptions};
use serde_json::{Map, Value};

use crate::{Kuzzle, error::KuzzleResult, protocol::Protocol};

/// Start a request for `controller`/`action`.
pub(crate) fn request(controller: &str, action: &str) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert("controller".to_string(), Value::from(controller));
    request.insert("action".to_string(), Value::from(action));
    request
}

/// Send `request` and return the response's `result`, or `null` if absent.
pub(crate) async fn call<P: Protocol>(
    kuzzle: &Kuzzle<P>,
    request: Map<String, Value>,
) -> KuzzleResult<Value> {
    let response = kuzzle.query(Value::Object(request))?.await?;
    Ok(response.result.unwrap_or(Value::Null))
}

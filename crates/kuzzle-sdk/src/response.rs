//! Response envelope as sent by the Kuzzle backend.
//!
//! Only the fields needed for correlation and error reporting are typed;
//! everything else in `result` stays a [`serde_json::Value`].

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{error::KuzzleResult, types::RequestId};

/// Error object embedded in a response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: u16,
    /// Backend stack trace, in whatever shape the backend sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A decoded response envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatile: Option<Value>,
}

impl Response {
    /// Decode a response from its JSON text.
    pub fn from_json(raw: &str) -> KuzzleResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode the response back to JSON text.
    pub fn to_json(&self) -> KuzzleResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Identifiers this response may be correlated with, in lookup order:
    /// `requestId` first, then `room`. Empty and repeated values are skipped.
    pub fn correlation_ids(&self) -> Vec<RequestId> {
        correlation_ids(self.request_id.as_deref(), self.room.as_deref())
    }

    /// Check whether the backend reported an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Deserialize the `result` payload. A missing result decodes as `null`.
    pub fn result_as<T: DeserializeOwned>(&self) -> KuzzleResult<T> {
        let value = self.result.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

fn correlation_ids(request_id: Option<&str>, room: Option<&str>) -> Vec<RequestId> {
    let mut ids: Vec<RequestId> = Vec::with_capacity(2);
    for candidate in [request_id, room].into_iter().flatten() {
        if candidate.is_empty() || ids.iter().any(|id| id.as_str() == candidate) {
            continue;
        }
        ids.push(RequestId::from(candidate));
    }
    ids
}

/// Correlation identifiers of a payload that is JSON but not a valid
/// [`Response`]. Empty when the payload is not a JSON object.
pub(crate) fn raw_correlation_ids(raw: &str) -> Vec<RequestId> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };
    correlation_ids(
        map.get("requestId").and_then(Value::as_str),
        map.get("room").and_then(Value::as_str),
    )
}

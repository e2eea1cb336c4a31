//! Wire envelopes (spec §3, §6).
//!
//! All three envelope kinds are serialized as JSON bytes by the
//! configured [`crate::serializer::Serializer`] (JSON by default).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Arbitrary string-keyed metadata carried alongside requests/events.
/// Used to pass through trace identifiers transparently (spec §1 non-goals).
pub type Metadata = HashMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub command: String,
    pub timestamp: i64,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl RequestEnvelope {
    /// Builds a request with the command uppercased per spec §4.3 step 3.
    pub fn new(id: String, command: &str, data: Value, metadata: Option<Metadata>) -> Self {
        Self {
            id,
            command: command.to_uppercase(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub timestamp: i64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseEnvelope {
    pub fn success(id: String, data: Value) -> Self {
        Self {
            id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: String, code: impl Into<String>, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            success: false,
            data: None,
            error: Some(ResponseError { code: code.into(), message: message.into(), details }),
        }
    }

    pub fn from_error(id: String, err: &crate::error::Error) -> Self {
        Self::failure(id, err.code(), err.to_string(), err.details().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub data: Value,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl EventEnvelope {
    pub fn new(event_name: impl Into<String>, data: Value, metadata: Option<Metadata>) -> Self {
        Self {
            event_name: event_name.into(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_uppercases_command() {
        let req = RequestEnvelope::new("id-1".into(), "add", json!({"a": 1}), None);
        assert_eq!(req.command, "ADD");
    }

    #[test]
    fn response_envelope_round_trips_through_json() {
        let resp = ResponseEnvelope::success("id-1".into(), json!({"result": 8}));
        let bytes = serde_json::to_vec(&resp).unwrap();
        let decoded: ResponseEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.data, Some(json!({"result": 8})));
        assert!(decoded.error.is_none());
    }

    #[test]
    fn failure_envelope_carries_code_message_details() {
        let resp = ResponseEnvelope::failure(
            "id-2".into(),
            "VALIDATION:DIVIDE_BY_ZERO",
            "Cannot divide by zero",
            Some(json!({"a": 10, "b": 0})),
        );
        assert!(!resp.success);
        let err = resp.error.unwrap();
        assert_eq!(err.message, "Cannot divide by zero");
        assert_eq!(err.details.unwrap()["a"], 10);
    }

    #[test]
    fn event_envelope_serializes_event_name_key() {
        let event = EventEnvelope::new("user.created", json!({"id": 1}), None);
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["eventName"], "user.created");
    }
}

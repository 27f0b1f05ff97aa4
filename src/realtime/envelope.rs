// Realtime wire protocol: the JSON envelope and its typed payloads
//
// Every frame in either direction is {v, type, id, ts, payload}. The
// version must match and type/id are required; payload shape depends on
// the type and is validated at dispatch.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::utils::new_server_msg_id;

/// Envelope protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Required websocket subprotocol
pub const SUBPROTOCOL: &str = "arc.realtime.v1";

// Frame types
pub const T_HELLO: &str = "hello";
pub const T_HELLO_ACK: &str = "hello.ack";
pub const T_JOIN: &str = "conversation.join";
pub const T_MESSAGE_SEND: &str = "message.send";
pub const T_MESSAGE_ACK: &str = "message.ack";
pub const T_MESSAGE_NEW: &str = "message.new";
pub const T_HISTORY_FETCH: &str = "conversation.history.fetch";
pub const T_HISTORY_CHUNK: &str = "conversation.history.chunk";
pub const T_ERROR: &str = "error";

/// Maximum message text length in runes accepted over the wire
pub const MAX_WIRE_TEXT_RUNES: usize = 4000;

/// The wire frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u8,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub ts: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build a server-originated frame
    pub fn server(kind: &str, payload: serde_json::Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            kind: kind.to_string(),
            id: new_server_msg_id(),
            ts: Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Build an error frame with a stable code
    pub fn error(code: &str, message: &str) -> Self {
        Self::server(
            T_ERROR,
            serde_json::json!({ "code": code, "message": message }),
        )
    }

    /// Structural validation: version match plus required fields
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.v != PROTOCOL_VERSION {
            return Err("unsupported protocol version");
        }
        if self.kind.is_empty() {
            return Err("type is required");
        }
        if self.id.is_empty() {
            return Err("id is required");
        }
        Ok(())
    }
}

// Client payloads

#[derive(Debug, Clone, Deserialize)]
pub struct JoinPayload {
    pub conversation_id: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendPayload {
    pub conversation_id: String,
    pub client_msg_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryFetchPayload {
    pub conversation_id: String,
    #[serde(default)]
    pub after_seq: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

// Server payloads

#[derive(Debug, Clone, Serialize)]
pub struct HelloAckPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageAckPayload {
    pub conversation_id: String,
    pub client_msg_id: String,
    pub server_msg_id: String,
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageNewPayload {
    pub conversation_id: String,
    pub seq: i64,
    pub server_msg_id: String,
    pub client_msg_id: String,
    pub sender: String,
    pub text: String,
    pub server_ts: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryMessage {
    pub seq: i64,
    pub server_msg_id: String,
    pub client_msg_id: String,
    pub sender: String,
    pub text: String,
    pub server_ts: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryChunkPayload {
    pub conversation_id: String,
    pub messages: Vec<HistoryMessage>,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let frame = Envelope::server(T_HELLO_ACK, serde_json::json!({"session_id": "s1"}));
        let text = serde_json::to_string(&frame).unwrap();
        let parsed: Envelope = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed.v, PROTOCOL_VERSION);
        assert_eq!(parsed.kind, T_HELLO_ACK);
        assert_eq!(parsed.payload["session_id"], "s1");
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_frames() {
        let mut frame = Envelope::server(T_HELLO, serde_json::Value::Null);
        frame.v = 2;
        assert!(frame.validate().is_err());

        let mut frame = Envelope::server(T_HELLO, serde_json::Value::Null);
        frame.id = String::new();
        assert!(frame.validate().is_err());

        let mut frame = Envelope::server(T_HELLO, serde_json::Value::Null);
        frame.kind = String::new();
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let parsed: Envelope =
            serde_json::from_str(r#"{"v":1,"type":"hello","id":"x","ts":0}"#).unwrap();
        assert!(parsed.payload.is_null());
        assert!(parsed.validate().is_ok());
    }
}

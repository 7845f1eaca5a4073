//! Payload codec for the chat topics.
//!
//! Inbound payloads are either a JSON object `{"user_id", "message"}` or
//! plain text. Decoding never fails: anything that is not a JSON object
//! is treated as plain text from the anonymous identity.

use chatmq_core::ANONYMOUS_USER;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: String,
    pub text: String,
}

impl InboundMessage {
    #[must_use]
    pub fn decode(payload: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(payload);
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(fields)) => Self::from_fields(&fields),
            _ => Self {
                user_id: ANONYMOUS_USER.to_string(),
                text: raw.trim().to_string(),
            },
        }
    }

    fn from_fields(fields: &Map<String, Value>) -> Self {
        let user_id = match fields.get("user_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => ANONYMOUS_USER.to_string(),
        };
        let text = fields
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self { user_id, text }
    }

    /// Messages with nothing but whitespace are dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Shape of published replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundFormat {
    /// JSON envelope with identity and original message
    #[default]
    Envelope,
    /// Reply text only
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub user_id: String,
    pub response: String,
    pub original_message: String,
}

impl OutboundMessage {
    pub fn encode(&self, format: OutboundFormat) -> serde_json::Result<Vec<u8>> {
        match format {
            OutboundFormat::Envelope => serde_json::to_vec(self),
            OutboundFormat::Bare => Ok(self.response.clone().into_bytes()),
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single message on the platform stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique per message
    pub id: String,
    /// Routing discriminator
    #[serde(rename = "type")]
    pub event_type: String,
    /// URI-like identity of the sender
    pub source: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an outbound envelope with a fresh id
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            data,
        }
    }
}

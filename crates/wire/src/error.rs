use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("invalid {event_type} payload: {source}")]
    InvalidPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize {event_type}: {source}")]
    Serialize {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

//! Typed payloads carried in [`crate::Envelope::data`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const JOIN_EVENT: &str = "CalculationMemberJoinEvent";
pub const GREET_EVENT: &str = "CalculationMemberGreetEvent";
pub const KEEP_ALIVE_EVENT: &str = "CalculationMemberKeepAliveEvent";
pub const EVENT_ACK: &str = "EventAckResponse";
pub const PROCESSOR_REQUEST: &str = "EntityProcessorCalculationRequest";
pub const PROCESSOR_RESPONSE: &str = "EntityProcessorCalculationResponse";
pub const CRITERIA_REQUEST: &str = "EntityCriteriaCalculationRequest";
pub const CRITERIA_RESPONSE: &str = "EntityCriteriaCalculationResponse";

/// Envelope `type` discriminator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Join,
    Greet,
    KeepAlive,
    Ack,
    ProcessorRequest,
    ProcessorResponse,
    CriteriaRequest,
    CriteriaResponse,
    Other(String),
}

impl EventType {
    pub fn parse(s: &str) -> Self {
        match s {
            JOIN_EVENT => Self::Join,
            GREET_EVENT => Self::Greet,
            KEEP_ALIVE_EVENT => Self::KeepAlive,
            EVENT_ACK => Self::Ack,
            PROCESSOR_REQUEST => Self::ProcessorRequest,
            PROCESSOR_RESPONSE => Self::ProcessorResponse,
            CRITERIA_REQUEST => Self::CriteriaRequest,
            CRITERIA_RESPONSE => Self::CriteriaResponse,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => JOIN_EVENT,
            Self::Greet => GREET_EVENT,
            Self::KeepAlive => KEEP_ALIVE_EVENT,
            Self::Ack => EVENT_ACK,
            Self::ProcessorRequest => PROCESSOR_REQUEST,
            Self::ProcessorResponse => PROCESSOR_RESPONSE,
            Self::CriteriaRequest => CRITERIA_REQUEST,
            Self::CriteriaResponse => CRITERIA_RESPONSE,
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details attached to failed responses and acks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Handshake sent right after the stream opens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinEvent {
    /// Random correlation id for this join
    pub id: String,
    /// Capability tags this client serves
    pub tags: Vec<String>,
}

/// Handshake completion signal from the platform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreetEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
}

/// Periodic liveness signal from the platform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeepAliveEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Acknowledgment of a previously sent envelope (both directions)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventAck {
    #[serde(default)]
    pub id: Option<String>,
    /// Envelope id being acknowledged
    #[serde(default)]
    pub source_event_id: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

fn default_true() -> bool {
    true
}

impl EventAck {
    pub fn success(source_event_id: impl Into<String>) -> Self {
        Self {
            id: None,
            source_event_id: Some(source_event_id.into()),
            success: true,
            error: None,
        }
    }
}

/// Request to run a named processor against an entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorRequest {
    pub request_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub processor_id: Option<String>,
    pub processor_name: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorResponse {
    pub request_id: String,
    pub entity_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ProcessorResponse {
    pub fn ok(request: &ProcessorRequest, payload: Value) -> Self {
        Self {
            request_id: request.request_id.clone(),
            entity_id: request.entity_id.clone(),
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failed(request: &ProcessorRequest, error: ErrorInfo) -> Self {
        Self {
            request_id: request.request_id.clone(),
            entity_id: request.entity_id.clone(),
            success: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Request to evaluate a named criterion against an entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaRequest {
    pub request_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub criteria_id: Option<String>,
    pub criteria_name: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaResponse {
    pub request_id: String,
    pub entity_id: String,
    pub success: bool,
    pub matches: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl CriteriaResponse {
    pub fn ok(request: &CriteriaRequest, matches: bool) -> Self {
        Self {
            request_id: request.request_id.clone(),
            entity_id: request.entity_id.clone(),
            success: true,
            matches,
            error: None,
        }
    }

    pub fn failed(request: &CriteriaRequest, error: ErrorInfo) -> Self {
        Self {
            request_id: request.request_id.clone(),
            entity_id: request.entity_id.clone(),
            success: false,
            matches: false,
            error: Some(error),
        }
    }
}

/// Everything the platform may send us
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Greet(GreetEvent),
    KeepAlive(KeepAliveEvent),
    Ack(EventAck),
    ProcessorRequest(ProcessorRequest),
    CriteriaRequest(CriteriaRequest),
    /// Any type without a dedicated payload; handled as a generic request
    Other { event_type: String, data: Value },
}

impl InboundEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Greet(_) => EventType::Greet,
            Self::KeepAlive(_) => EventType::KeepAlive,
            Self::Ack(_) => EventType::Ack,
            Self::ProcessorRequest(_) => EventType::ProcessorRequest,
            Self::CriteriaRequest(_) => EventType::CriteriaRequest,
            Self::Other { event_type, .. } => EventType::parse(event_type),
        }
    }
}

/// Everything we send to the platform
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Join(JoinEvent),
    ProcessorResponse(ProcessorResponse),
    CriteriaResponse(CriteriaResponse),
    Ack(EventAck),
}

impl OutboundEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Join(_) => EventType::Join,
            Self::ProcessorResponse(_) => EventType::ProcessorResponse,
            Self::CriteriaResponse(_) => EventType::CriteriaResponse,
            Self::Ack(_) => EventType::Ack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_parse_known() {
        assert_eq!(EventType::parse(PROCESSOR_REQUEST), EventType::ProcessorRequest);
        assert_eq!(EventType::parse(CRITERIA_REQUEST), EventType::CriteriaRequest);
        assert_eq!(EventType::parse(KEEP_ALIVE_EVENT), EventType::KeepAlive);
        assert_eq!(EventType::parse(GREET_EVENT).as_str(), GREET_EVENT);
    }

    #[test]
    fn test_event_type_parse_unknown_keeps_name() {
        let t = EventType::parse("EntityModelImportRequest");
        assert_eq!(t, EventType::Other("EntityModelImportRequest".to_string()));
        assert_eq!(t.to_string(), "EntityModelImportRequest");
    }

    #[test]
    fn test_ack_defaults_to_success() {
        let ack: EventAck = serde_json::from_value(json!({"sourceEventId": "abc"})).unwrap();
        assert!(ack.success);
        assert_eq!(ack.source_event_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_processor_request_camel_case() {
        let req: ProcessorRequest = serde_json::from_value(json!({
            "requestId": "r1",
            "entityId": "e1",
            "processorName": "accrue-interest",
            "payload": {"principal": 1000}
        }))
        .unwrap();
        assert_eq!(req.processor_name, "accrue-interest");
        assert_eq!(req.payload["principal"], 1000);
        assert!(req.transaction_id.is_none());
    }

    #[test]
    fn test_failed_response_omits_payload() {
        let req = CriteriaRequest {
            request_id: "r1".to_string(),
            entity_id: "e1".to_string(),
            criteria_id: None,
            criteria_name: "is-overdue".to_string(),
            payload: Value::Null,
        };
        let resp = CriteriaResponse::failed(&req, ErrorInfo::new("HANDLER_ERROR", "boom"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["matches"], false);
        assert_eq!(value["error"]["code"], "HANDLER_ERROR");
    }
}

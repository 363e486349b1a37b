use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::CodecError;
use crate::events::{EventType, InboundEvent, OutboundEvent};

/// A decoded inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Envelope id, used when acknowledging
    pub id: String,
    pub source: String,
    pub event: InboundEvent,
}

/// Converts typed events to and from wire envelopes
#[derive(Debug, Clone)]
pub struct Codec {
    source: String,
}

impl Codec {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Wrap an outbound event in a fresh envelope
    pub fn encode(&self, event: &OutboundEvent) -> Result<Envelope, CodecError> {
        let event_type = event.event_type();
        let data = match event {
            OutboundEvent::Join(e) => to_data(&event_type, e)?,
            OutboundEvent::ProcessorResponse(e) => to_data(&event_type, e)?,
            OutboundEvent::CriteriaResponse(e) => to_data(&event_type, e)?,
            OutboundEvent::Ack(e) => to_data(&event_type, e)?,
        };
        Ok(Envelope::new(event_type.as_str(), self.source.as_str(), data))
    }

    /// Serialize an envelope to a text frame
    pub fn to_text(&self, envelope: &Envelope) -> Result<String, CodecError> {
        serde_json::to_string(envelope).map_err(|source| CodecError::Serialize {
            event_type: envelope.event_type.clone(),
            source,
        })
    }

    /// Parse a text frame into a typed inbound event
    pub fn decode(&self, text: &str) -> Result<Inbound, CodecError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(CodecError::Malformed)?;
        self.decode_envelope(envelope)
    }

    pub fn decode_envelope(&self, envelope: Envelope) -> Result<Inbound, CodecError> {
        let Envelope {
            id,
            event_type,
            source,
            data,
        } = envelope;

        let event = match EventType::parse(&event_type) {
            EventType::Greet => InboundEvent::Greet(from_data(&event_type, data)?),
            EventType::KeepAlive => InboundEvent::KeepAlive(from_data(&event_type, data)?),
            EventType::Ack => InboundEvent::Ack(from_data(&event_type, data)?),
            EventType::ProcessorRequest => {
                InboundEvent::ProcessorRequest(from_data(&event_type, data)?)
            }
            EventType::CriteriaRequest => {
                InboundEvent::CriteriaRequest(from_data(&event_type, data)?)
            }
            _ => InboundEvent::Other { event_type, data },
        };

        Ok(Inbound { id, source, event })
    }
}

fn to_data<T: Serialize>(event_type: &EventType, payload: &T) -> Result<Value, CodecError> {
    serde_json::to_value(payload).map_err(|source| CodecError::Serialize {
        event_type: event_type.to_string(),
        source,
    })
}

fn from_data<T: DeserializeOwned>(event_type: &str, data: Value) -> Result<T, CodecError> {
    // Bodiless greet/keep-alive frames arrive with `data` absent
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| CodecError::InvalidPayload {
        event_type: event_type.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventAck, JoinEvent, ProcessorResponse};
    use serde_json::json;

    fn codec() -> Codec {
        Codec::new("urn:wflink:test")
    }

    #[test]
    fn test_encode_join() {
        let join = OutboundEvent::Join(JoinEvent {
            id: "corr-1".to_string(),
            tags: vec!["loans".to_string()],
        });
        let env = codec().encode(&join).unwrap();
        assert_eq!(env.event_type, "CalculationMemberJoinEvent");
        assert_eq!(env.source, "urn:wflink:test");
        assert_eq!(env.data, json!({"id": "corr-1", "tags": ["loans"]}));
    }

    #[test]
    fn test_to_text_is_parseable() {
        let ack = OutboundEvent::Ack(EventAck::success("ka-1"));
        let c = codec();
        let env = c.encode(&ack).unwrap();
        let text = c.to_text(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_decode_processor_request() {
        let text = json!({
            "id": "m-1",
            "type": "EntityProcessorCalculationRequest",
            "source": "platform",
            "data": {
                "requestId": "r-1",
                "entityId": "loan-7",
                "processorName": "accrue",
                "payload": {"rate": 0.05}
            }
        })
        .to_string();

        let inbound = codec().decode(&text).unwrap();
        assert_eq!(inbound.id, "m-1");
        match inbound.event {
            InboundEvent::ProcessorRequest(req) => {
                assert_eq!(req.entity_id, "loan-7");
                assert_eq!(req.processor_name, "accrue");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_greet_without_data() {
        let text = r#"{"id":"g-1","type":"CalculationMemberGreetEvent","source":"platform"}"#;
        let inbound = codec().decode(text).unwrap();
        assert_eq!(inbound.event, InboundEvent::Greet(Default::default()));
    }

    #[test]
    fn test_decode_unknown_type_is_generic() {
        let text = r#"{"id":"x","type":"EntityModelImportRequest","source":"p","data":{"a":1}}"#;
        let inbound = codec().decode(text).unwrap();
        match inbound.event {
            InboundEvent::Other { event_type, data } => {
                assert_eq!(event_type, "EntityModelImportRequest");
                assert_eq!(data["a"], 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            codec().decode("not json"),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_invalid_payload() {
        let text = r#"{"id":"x","type":"EntityCriteriaCalculationRequest","source":"p","data":{"requestId":1}}"#;
        match codec().decode(text) {
            Err(CodecError::InvalidPayload { event_type, .. }) => {
                assert_eq!(event_type, "EntityCriteriaCalculationRequest")
            }
            other => panic!("expected invalid payload, got {:?}", other),
        }
    }

    #[test]
    fn test_outbound_response_type() {
        let resp = OutboundEvent::ProcessorResponse(ProcessorResponse {
            request_id: "r".to_string(),
            entity_id: "e".to_string(),
            success: true,
            payload: Some(json!({})),
            error: None,
        });
        let env = codec().encode(&resp).unwrap();
        assert_eq!(env.event_type, "EntityProcessorCalculationResponse");
    }
}

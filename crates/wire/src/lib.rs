//! wflink-wire: envelope format and typed events for the platform stream
//!
//! Encoding and decoding are pure functions of their input; the only state a
//! [`Codec`] carries is the `source` it stamps on outbound envelopes.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod events;

pub use codec::{Codec, Inbound};
pub use envelope::Envelope;
pub use error::CodecError;
pub use events::{
    CriteriaRequest, CriteriaResponse, ErrorInfo, EventAck, EventType, GreetEvent, InboundEvent,
    JoinEvent, KeepAliveEvent, OutboundEvent, ProcessorRequest, ProcessorResponse,
};

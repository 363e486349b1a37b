//! Notifications broadcast through the [`super::ListenerRegistry`]

use chrono::{DateTime, Utc};

use crate::observer::ObserverState;
use wflink_middleware::ConnectivityState;

/// An outbound envelope was written and is awaiting acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct EventSent {
    pub event_id: String,
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AckReceived {
    pub source_event_id: Option<String>,
    pub success: bool,
    /// Whether the acknowledged id was found in the sent-event cache
    pub correlated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeepAliveReceived {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverStateChanged {
    pub previous: ObserverState,
    pub current: ObserverState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectivityChanged {
    pub previous: Option<ConnectivityState>,
    pub current: ConnectivityState,
}

/// More than half the sent-event cache is waiting on acks
#[derive(Debug, Clone, PartialEq)]
pub struct BacklogGrowing {
    pub size: usize,
    pub capacity: usize,
    /// Unacknowledged event ids, oldest first
    pub stuck_ids: Vec<String>,
}

//! Connection monitor
//!
//! Correlates outbound envelopes with platform acknowledgments, records
//! keep-alives and handshake state, and runs a periodic health pass over
//! all of it. Every observation is also broadcast through the listener
//! registry.

mod listeners;
pub mod notifications;

pub use listeners::{ListenerRegistry, ListenerResult};
pub use notifications::{
    AckReceived, BacklogGrowing, ConnectivityChanged, EventSent, KeepAliveReceived,
    ObserverStateChanged,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::observer::ObserverState;
use wflink_metadata::MonitorConfig;
use wflink_middleware::{BoundedTtlCache, ConnectivityState, Displaced, Transport};
use wflink_wire::{Envelope, EventAck};

/// Fill level of the sent-event cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogLevel {
    Normal,
    /// Above 10% of capacity
    Elevated,
    /// Above 50% of capacity
    Critical,
}

impl BacklogLevel {
    pub fn classify(size: usize, capacity: usize) -> Self {
        if size * 2 > capacity {
            Self::Critical
        } else if size * 10 > capacity {
            Self::Elevated
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveStatus {
    Fresh(Duration),
    Stale(Duration),
    NeverReceived,
}

/// Result of one periodic check pass
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub connectivity: ConnectivityState,
    pub cache_size: usize,
    pub backlog: BacklogLevel,
    pub keep_alive: KeepAliveStatus,
    /// Ids swept from the cache because their TTL ran out
    pub expired: Vec<String>,
}

struct KeepAliveMark {
    at: DateTime<Utc>,
    received: Instant,
}

pub struct ConnectionMonitor {
    config: MonitorConfig,
    sent: BoundedTtlCache<Envelope>,
    listeners: Arc<ListenerRegistry>,
    transport: Arc<dyn Transport>,
    observer: Mutex<ObserverState>,
    keep_alive: Mutex<Option<KeepAliveMark>>,
    last_connectivity: Mutex<Option<ConnectivityState>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionMonitor {
    pub fn new(
        config: MonitorConfig,
        transport: Arc<dyn Transport>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let sent = BoundedTtlCache::new(config.cache_capacity, config.cache_ttl());
        Self {
            config,
            sent,
            listeners,
            transport,
            observer: Mutex::new(ObserverState::Disconnected),
            keep_alive: Mutex::new(None),
            last_connectivity: Mutex::new(None),
        }
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn observer_state(&self) -> ObserverState {
        *lock(&self.observer)
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.transport.connectivity()
    }

    pub fn pending_acks(&self) -> usize {
        self.sent.len()
    }

    pub fn is_pending(&self, event_id: &str) -> bool {
        self.sent.contains(event_id)
    }

    pub fn last_keep_alive(&self) -> Option<DateTime<Utc>> {
        lock(&self.keep_alive).as_ref().map(|k| k.at)
    }

    /// Record an envelope before it is written to the stream
    pub fn track_event_sent(&self, envelope: &Envelope) {
        match self.sent.insert(envelope.id.clone(), envelope.clone()) {
            Displaced::Evicted(id, evicted) => {
                warn!(
                    event_id = %id,
                    event_type = %evicted.event_type,
                    capacity = self.sent.capacity(),
                    "Sent-event cache full, evicted oldest unacknowledged event"
                );
                metrics::inc_sent_cache_dropped("evicted");
            }
            Displaced::Replaced(_) => {
                debug!(event_id = %envelope.id, "Sent event id already tracked, replaced");
            }
            Displaced::None => {}
        }
        metrics::set_sent_cache_size(self.sent.len());
        debug!(event_id = %envelope.id, event_type = %envelope.event_type, "Tracking sent event");

        self.listeners.publish(&EventSent {
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
        });
    }

    /// Forget an event whose write failed; it will never be acknowledged
    pub fn untrack(&self, event_id: &str) -> bool {
        let removed = self.sent.remove(event_id).is_some();
        if removed {
            debug!(event_id, "Unwritten event removed from sent-event cache");
            metrics::set_sent_cache_size(self.sent.len());
        }
        removed
    }

    /// Correlate an acknowledgment; returns whether it matched a tracked event
    pub fn track_acknowledge(&self, ack: &EventAck) -> bool {
        let correlated = match ack.source_event_id.as_deref() {
            Some(id) => match self.sent.remove(id) {
                Some(envelope) => {
                    if ack.success {
                        debug!(event_id = %id, event_type = %envelope.event_type, "Event acknowledged");
                    } else {
                        warn!(
                            event_id = %id,
                            event_type = %envelope.event_type,
                            error = ?ack.error,
                            "Event acknowledged with failure"
                        );
                    }
                    true
                }
                None => {
                    warn!(event_id = %id, "Acknowledgment for unknown or expired event");
                    false
                }
            },
            None => {
                warn!("Acknowledgment without source event id");
                false
            }
        };

        let outcome = match (correlated, ack.success) {
            (false, _) => "uncorrelated",
            (true, true) => "success",
            (true, false) => "failure",
        };
        metrics::inc_ack(outcome);
        metrics::set_sent_cache_size(self.sent.len());

        self.listeners.publish(&AckReceived {
            source_event_id: ack.source_event_id.clone(),
            success: ack.success,
            correlated,
        });
        correlated
    }

    /// Record a keep-alive; falls back to the local clock when the platform omits a timestamp
    pub fn track_keep_alive(&self, timestamp: Option<DateTime<Utc>>) {
        let at = timestamp.unwrap_or_else(Utc::now);
        *lock(&self.keep_alive) = Some(KeepAliveMark {
            at,
            received: Instant::now(),
        });
        debug!(at = %at, "Keep-alive received");
        metrics::set_keep_alive_age(0.0);
        self.listeners.publish(&KeepAliveReceived { at });
    }

    /// Record a new handshake state and return the previous one
    pub fn track_observer_state(&self, next: ObserverState) -> ObserverState {
        let previous = std::mem::replace(&mut *lock(&self.observer), next);
        self.observer_changed(previous, next);
        previous
    }

    /// Move to `next` only if the current state is `expected`
    pub fn transition_observer(&self, expected: ObserverState, next: ObserverState) -> bool {
        {
            let mut state = lock(&self.observer);
            if *state != expected {
                return false;
            }
            *state = next;
        }
        self.observer_changed(expected, next);
        true
    }

    fn observer_changed(&self, previous: ObserverState, current: ObserverState) {
        if !previous.can_transition_to(current) {
            warn!(previous = %previous, current = %current, "Unexpected observer state transition");
        }
        if previous != current {
            info!(previous = %previous, current = %current, "Observer state changed");
        }
        metrics::set_observer_state(current.as_metric());
        self.listeners
            .publish(&ObserverStateChanged { previous, current });
    }

    /// One periodic health pass
    pub fn run_checks(&self) -> CheckReport {
        let connectivity = self.check_connectivity();
        let expired = self.sweep_expired();
        let (cache_size, backlog) = self.check_backlog();
        let keep_alive = self.check_keep_alive();

        CheckReport {
            connectivity,
            cache_size,
            backlog,
            keep_alive,
            expired,
        }
    }

    fn check_connectivity(&self) -> ConnectivityState {
        let current = self.transport.connectivity();
        let previous = lock(&self.last_connectivity).replace(current);
        if previous != Some(current) {
            match previous {
                Some(previous) => {
                    info!(previous = %previous, current = %current, "Transport connectivity changed")
                }
                None => info!(current = %current, "Transport connectivity"),
            }
            self.listeners
                .publish(&ConnectivityChanged { previous, current });
        }
        current
    }

    fn sweep_expired(&self) -> Vec<String> {
        let expired = self.sent.purge_expired();
        for (id, envelope) in &expired {
            warn!(
                event_id = %id,
                event_type = %envelope.event_type,
                ttl_secs = self.sent.ttl().as_secs(),
                "Sent event expired without acknowledgment"
            );
            metrics::inc_sent_cache_dropped("expired");
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }

    fn check_backlog(&self) -> (usize, BacklogLevel) {
        let size = self.sent.len();
        let capacity = self.sent.capacity();
        metrics::set_sent_cache_size(size);

        let level = BacklogLevel::classify(size, capacity);
        match level {
            BacklogLevel::Critical => {
                let stuck_ids = self.sent.keys();
                error!(size, capacity, "Sent-event cache over half full, acknowledgments are not arriving");
                self.listeners.publish(&BacklogGrowing {
                    size,
                    capacity,
                    stuck_ids,
                });
            }
            BacklogLevel::Elevated => {
                warn!(size, capacity, "Sent-event cache backlog growing");
            }
            BacklogLevel::Normal => {}
        }
        (size, level)
    }

    fn check_keep_alive(&self) -> KeepAliveStatus {
        let threshold = self.config.keep_alive_warn();
        let mark = lock(&self.keep_alive)
            .as_ref()
            .map(|k| (k.at, k.received.elapsed()));

        match mark {
            None => {
                warn!("No keep-alive received from the platform yet");
                KeepAliveStatus::NeverReceived
            }
            Some((at, age)) => {
                metrics::set_keep_alive_age(age.as_secs_f64());
                if age > threshold {
                    warn!(
                        last = %at,
                        age_ms = age.as_millis() as u64,
                        threshold_ms = threshold.as_millis() as u64,
                        "Keep-alive overdue"
                    );
                    KeepAliveStatus::Stale(age)
                } else {
                    KeepAliveStatus::Fresh(age)
                }
            }
        }
    }

    /// Run [`Self::run_checks`] after the initial delay and then with a
    /// fixed delay between passes, until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let initial = self.config.initial_delay();
        let interval = self.config.interval();
        tokio::spawn(async move {
            info!(
                initial_delay_secs = initial.as_secs(),
                interval_secs = interval.as_secs(),
                "Connection monitor started"
            );
            let mut delay = initial;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        info!("Connection monitor stopped");
                        return;
                    }
                }
                self.run_checks();
                delay = interval;
            }
        })
    }
}

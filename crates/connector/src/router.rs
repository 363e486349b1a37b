//! Inbound event classification and dispatch

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ConnectorError;
use crate::metrics;
use crate::pools::{ExecutionPools, PoolKind};
use wflink_wire::{Codec, EventType, Inbound};

/// Processes one decoded inbound event inside a pool task
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, inbound: Inbound) -> Result<(), ConnectorError>;
}

/// Pool an event type runs on. Total over every type, known or not.
pub fn route(event_type: &EventType) -> PoolKind {
    match event_type {
        EventType::ProcessorRequest => PoolKind::Processor,
        EventType::CriteriaRequest => PoolKind::Criteria,
        _ => PoolKind::Control,
    }
}

/// Decodes raw frames and hands them to the pool chosen by [`route`].
///
/// `dispatch` never waits for the handler, so the stream reader is never
/// blocked by business logic.
pub struct EventRouter {
    codec: Codec,
    pools: Arc<ExecutionPools>,
}

impl EventRouter {
    pub fn new(codec: Codec, pools: Arc<ExecutionPools>) -> Self {
        Self { codec, pools }
    }

    pub fn pools(&self) -> &Arc<ExecutionPools> {
        &self.pools
    }

    /// Returns the pool the frame was queued on, or `None` if it was dropped
    pub fn dispatch(&self, text: &str, handler: Arc<dyn InboundHandler>) -> Option<PoolKind> {
        let inbound = match self.codec.decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable inbound frame");
                metrics::inc_decode_error();
                return None;
            }
        };

        let event_type = inbound.event.event_type();
        let pool = route(&event_type);
        let event_id = inbound.id.clone();
        debug!(event_id = %event_id, event_type = %event_type, pool = %pool, "Dispatching inbound event");
        metrics::inc_event_received(event_type.as_str(), pool.as_str());

        let task_type = event_type.clone();
        let submitted = self.pools.submit(pool, async move {
            if let Err(e) = handler.handle(inbound).await {
                warn!(
                    event_id = %event_id,
                    event_type = %task_type,
                    error = %e,
                    "Inbound event handling failed"
                );
                metrics::inc_pool_task(pool.as_str(), "error");
            }
        });

        match submitted {
            Ok(()) => Some(pool),
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Inbound event rejected");
                None
            }
        }
    }
}

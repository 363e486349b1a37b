//! wflink-connector-lib: platform connectivity runtime
//!
//! Connection lifecycle and reconnection, event-type routing into isolated
//! execution pools, acknowledgment and keep-alive monitoring, and the
//! health/metrics surface.

pub mod error;
pub mod handlers;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod observer;
pub mod pools;
pub mod reconnect;
pub mod router;
pub mod server;

pub use error::{ConnectorError, HandlerError, PoolError};
pub use handlers::{Criterion, HandlerRegistry, Processor};
pub use manager::ConnectionManager;
pub use monitor::{CheckReport, ConnectionMonitor, ListenerRegistry, ListenerResult};
pub use observer::ObserverState;
pub use pools::{ExecutionPool, ExecutionPools, PoolKind};
pub use reconnect::{ReconnectProcedure, ReconnectionStrategy};
pub use router::{route, EventRouter, InboundHandler};
pub use server::{create_router, run_server, ServerState};

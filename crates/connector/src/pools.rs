//! Execution pools for inbound event handling
//!
//! Three isolated pools keep slow calculations from starving control
//! traffic (greets, keep-alives, acks). Each pool bounds its in-flight tasks
//! with a semaphore sized to the configured pool size.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::PoolError;
use crate::metrics;
use wflink_metadata::{PoolsConfig, ThreadKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Greets, keep-alives, acks and anything unclassified
    Control,
    Criteria,
    Processor,
}

impl PoolKind {
    pub const ALL: [PoolKind; 3] = [PoolKind::Control, PoolKind::Criteria, PoolKind::Processor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Criteria => "criteria",
            Self::Processor => "processor",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded task pool.
///
/// With [`ThreadKind::Os`] the pool owns a dedicated multi-thread runtime
/// whose workers are named `wflink-<pool>`; with [`ThreadKind::Lightweight`]
/// tasks run on the runtime that calls [`ExecutionPool::submit`].
pub struct ExecutionPool {
    kind: PoolKind,
    size: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    runtime: Mutex<Option<Runtime>>,
    handle: Option<Handle>,
    closed: AtomicBool,
    grace: Duration,
}

impl ExecutionPool {
    pub fn new(
        kind: PoolKind,
        size: usize,
        thread_kind: ThreadKind,
        grace: Duration,
    ) -> Result<Self, PoolError> {
        let size = size.max(1);

        let runtime = match thread_kind {
            ThreadKind::Os => Some(
                Builder::new_multi_thread()
                    .worker_threads(size)
                    .thread_name(format!("wflink-{}", kind))
                    .enable_all()
                    .build()
                    .map_err(|source| PoolError::Runtime { pool: kind, source })?,
            ),
            ThreadKind::Lightweight => None,
        };
        let handle = runtime.as_ref().map(|rt| rt.handle().clone());

        info!(pool = %kind, size, ?thread_kind, "Execution pool created");

        Ok(Self {
            kind,
            size,
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            runtime: Mutex::new(runtime),
            handle,
            closed: AtomicBool::new(false),
            grace,
        })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks submitted and not yet finished (queued or running)
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a task. Panics inside the task are caught and logged; the
    /// task is dropped if the pool is cancelled before it finishes.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::ShutDown(self.kind));
        }

        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        let pool = self.kind;

        let wrapped = async move {
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = cancel.cancelled() => {
                    metrics::inc_pool_task(pool.as_str(), "cancelled");
                    return;
                }
            };

            tokio::select! {
                result = AssertUnwindSafe(task).catch_unwind() => match result {
                    Ok(()) => metrics::inc_pool_task(pool.as_str(), "ok"),
                    Err(_) => {
                        error!(pool = %pool, "Task panicked");
                        metrics::inc_pool_task(pool.as_str(), "panicked");
                    }
                },
                _ = cancel.cancelled() => {
                    metrics::inc_pool_task(pool.as_str(), "cancelled");
                }
            }
        };

        match &self.handle {
            Some(handle) => self.tracker.spawn_on(wrapped, handle),
            None => self.tracker.spawn(wrapped),
        };
        Ok(())
    }

    /// Stop accepting tasks, wait up to the grace period, then cancel
    /// whatever is still running. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tracker.close();

        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pool = %self.kind,
                remaining = self.tracker.len(),
                grace_ms = self.grace.as_millis() as u64,
                "Grace period elapsed, cancelling remaining tasks"
            );
            self.cancel.cancel();
        }

        self.release_runtime();
        info!(pool = %self.kind, "Execution pool shut down");
    }

    fn release_runtime(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Dropping a runtime from async context panics
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.release_runtime();
    }
}

/// The three pools the router dispatches into
pub struct ExecutionPools {
    control: ExecutionPool,
    criteria: ExecutionPool,
    processor: ExecutionPool,
}

impl ExecutionPools {
    pub fn from_config(config: &PoolsConfig) -> Result<Self, PoolError> {
        let grace = config.shutdown_grace();
        Ok(Self {
            control: ExecutionPool::new(
                PoolKind::Control,
                config.control_size,
                config.thread_kind,
                grace,
            )?,
            criteria: ExecutionPool::new(
                PoolKind::Criteria,
                config.criteria_size,
                config.thread_kind,
                grace,
            )?,
            processor: ExecutionPool::new(
                PoolKind::Processor,
                config.processor_size,
                config.thread_kind,
                grace,
            )?,
        })
    }

    pub fn get(&self, kind: PoolKind) -> &ExecutionPool {
        match kind {
            PoolKind::Control => &self.control,
            PoolKind::Criteria => &self.criteria,
            PoolKind::Processor => &self.processor,
        }
    }

    pub fn submit<F>(&self, kind: PoolKind, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.get(kind).submit(task)
    }

    /// Shut all pools down concurrently
    pub async fn shutdown(&self) {
        tokio::join!(
            self.control.shutdown(),
            self.criteria.shutdown(),
            self.processor.shutdown(),
        );
    }
}

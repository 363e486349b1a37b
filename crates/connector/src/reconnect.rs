//! Exponential-backoff reconnection with a single in-flight retry cycle

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ConnectorError;
use crate::metrics;
use wflink_metadata::ReconnectConfig;

pub type ReconnectFuture = Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send>>;

/// One reconnection attempt; invoked again for every retry
pub type ReconnectProcedure = Arc<dyn Fn() -> ReconnectFuture + Send + Sync>;

#[derive(Debug, Default)]
struct RetryState {
    in_progress: bool,
    failure_count: u32,
    /// An attempt is running right now
    attempting: bool,
    /// The connection was lost again while an attempt was running
    lost_during_attempt: bool,
}

/// Serialises reconnection attempts.
///
/// While a cycle is running further requests are discarded. Attempts run one
/// after another on a single spawned task, delayed by
/// `min(initial * 2^failures, max)`. After `max_failures` consecutive
/// failures the cycle gives up and resets, so the next request starts over
/// from the initial delay.
///
/// A request that arrives while an attempt is executing cannot be covered by
/// that attempt. If the attempt then succeeds, the cycle runs once more from
/// the initial delay instead of ending.
pub struct ReconnectionStrategy {
    config: ReconnectConfig,
    state: Arc<Mutex<RetryState>>,
    cancel: CancellationToken,
}

fn lock(state: &Mutex<RetryState>) -> MutexGuard<'_, RetryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReconnectionStrategy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(RetryState::default())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        backoff_delay(&self.config, failures)
    }

    pub fn is_in_progress(&self) -> bool {
        lock(&self.state).in_progress
    }

    pub fn failure_count(&self) -> u32 {
        lock(&self.state).failure_count
    }

    /// Start a retry cycle unless one is already running.
    /// Returns whether this request started the cycle.
    pub fn request_reconnection(&self, procedure: ReconnectProcedure) -> bool {
        if self.cancel.is_cancelled() {
            info!("Reconnection requested after shutdown, ignoring");
            return false;
        }
        {
            let mut state = lock(&self.state);
            if state.in_progress {
                if state.attempting {
                    state.lost_during_attempt = true;
                }
                info!(
                    failures = state.failure_count,
                    "Reconnection already in progress, ignoring request"
                );
                return false;
            }
            state.in_progress = true;
        }

        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        tokio::spawn(retry_loop(config, state, cancel, procedure));
        true
    }

    /// Stop any running cycle and refuse new ones
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn backoff_delay(config: &ReconnectConfig, failures: u32) -> Duration {
    let initial = config.initial_delay();
    let max = config.max_delay();
    let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
    initial.checked_mul(factor).unwrap_or(max).min(max)
}

async fn retry_loop(
    config: ReconnectConfig,
    state: Arc<Mutex<RetryState>>,
    cancel: CancellationToken,
    procedure: ReconnectProcedure,
) {
    loop {
        let failures = lock(&state).failure_count;
        let delay = backoff_delay(&config, failures);
        warn!(
            attempt = failures + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection attempt"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                *lock(&state) = RetryState::default();
                info!("Reconnection cancelled");
                return;
            }
        }

        lock(&state).attempting = true;
        let outcome = procedure().await;
        let mut s = lock(&state);
        s.attempting = false;
        let lost_again = std::mem::take(&mut s.lost_during_attempt);

        match outcome {
            Ok(()) => {
                info!(attempts = s.failure_count + 1, "Reconnected");
                metrics::inc_reconnect_attempt("success");
                if lost_again {
                    warn!("Connection lost while reconnecting, starting over");
                    s.failure_count = 0;
                    continue;
                }
                *s = RetryState::default();
                return;
            }
            Err(e) => {
                metrics::inc_reconnect_attempt("failure");
                s.failure_count += 1;
                if s.failure_count >= config.max_failures {
                    error!(
                        fatal = true,
                        failures = s.failure_count,
                        error = %e,
                        "Reconnection attempts exhausted, giving up until the next request"
                    );
                    metrics::inc_reconnect_exhausted();
                    *s = RetryState::default();
                    return;
                }
                warn!(failures = s.failure_count, error = %e, "Reconnection attempt failed");
            }
        }
    }
}

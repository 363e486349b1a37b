//! Submit / poll / fetch driver for snapshot searches

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::SearchApi;
use crate::error::SearchError;
use crate::types::{PageRequest, SearchRequest, SnapshotState, SnapshotStatus};
use wflink_metadata::SearchConfig;

/// Runs a search to completion and returns one page of results.
///
/// The wait between polls is a timer sleep, so a pending search holds no
/// worker thread. Polling gives up once the wait ceiling is exceeded.
pub struct SnapshotSearchClient {
    api: Arc<dyn SearchApi>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl SnapshotSearchClient {
    pub fn new(api: Arc<dyn SearchApi>, config: &SearchConfig) -> Self {
        Self::with_timing(api, config.poll_interval(), config.max_wait())
    }

    pub fn with_timing(api: Arc<dyn SearchApi>, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            api,
            poll_interval,
            max_wait,
        }
    }

    /// Raw result payloads; a missing model or snapshot yields an empty list
    pub async fn search(
        &self,
        request: &SearchRequest,
        page: PageRequest,
    ) -> Result<Vec<Value>, SearchError> {
        let state = match self.api.submit(request).await {
            Ok(state) => state,
            Err(SearchError::NotFound(what)) => {
                info!(model = %request.model, version = request.version, what = %what, "Search target not found, returning no results");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        debug!(snapshot_id = %state.snapshot_id, status = %state.status, "Search submitted");

        self.await_snapshot(&state).await?;

        match self.api.fetch(&state.snapshot_id, page).await {
            Ok(items) => {
                info!(
                    snapshot_id = %state.snapshot_id,
                    results = items.len(),
                    page_size = page.page_size,
                    page_number = page.page_number,
                    "Search completed"
                );
                Ok(items)
            }
            Err(SearchError::NotFound(_)) => {
                info!(snapshot_id = %state.snapshot_id, "Snapshot page not found, returning no results");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`Self::search`], deserializing each result
    pub async fn search_as<T: DeserializeOwned>(
        &self,
        request: &SearchRequest,
        page: PageRequest,
    ) -> Result<Vec<T>, SearchError> {
        self.search(request, page)
            .await?
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|e| SearchError::InvalidResponse(e.to_string()))
            })
            .collect()
    }

    async fn await_snapshot(&self, state: &SnapshotState) -> Result<(), SearchError> {
        if state.status == SnapshotStatus::Successful {
            return Ok(());
        }

        let snapshot_id = state.snapshot_id.as_str();
        let started = Instant::now();
        loop {
            let status = self.api.status(snapshot_id).await?;
            match status {
                SnapshotStatus::Successful => {
                    debug!(
                        snapshot_id,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Snapshot ready"
                    );
                    return Ok(());
                }
                SnapshotStatus::Running => {
                    let waited = started.elapsed();
                    if waited > self.max_wait {
                        warn!(snapshot_id, waited_ms = waited.as_millis() as u64, "Snapshot wait ceiling exceeded");
                        return Err(SearchError::Timeout {
                            snapshot_id: snapshot_id.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                other => {
                    warn!(snapshot_id, status = %other, "Snapshot failed");
                    return Err(SearchError::SnapshotFailed {
                        snapshot_id: snapshot_id.to_string(),
                        status: other.to_string(),
                    });
                }
            }
        }
    }
}

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SearchError;
use crate::types::{PageRequest, SearchRequest, SnapshotState, SnapshotStatus};

/// The three calls of the snapshot search protocol.
///
/// A missing model, snapshot or page is reported as [`SearchError::NotFound`].
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn submit(&self, request: &SearchRequest) -> Result<SnapshotState, SearchError>;

    async fn status(&self, snapshot_id: &str) -> Result<SnapshotStatus, SearchError>;

    async fn fetch(&self, snapshot_id: &str, page: PageRequest) -> Result<Vec<Value>, SearchError>;
}

use thiserror::Error;
use wflink_middleware::AuthError;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized after {attempts} attempts")]
    Unauthorized { attempts: u32 },
    #[error("snapshot {snapshot_id} finished with status {status}")]
    SnapshotFailed { snapshot_id: String, status: String },
    #[error("snapshot {snapshot_id} still running after {waited_ms}ms")]
    Timeout { snapshot_id: String, waited_ms: u64 },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
}

use thiserror::Error;
use wflink_middleware::TransportError;
use wflink_wire::CodecError;

use crate::pools::PoolKind;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("no open stream")]
    NotConnected,
    #[error("connection manager is shut down")]
    ShutDown,
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("{0} pool is shut down")]
    ShutDown(PoolKind),
    #[error("failed to start {pool} pool runtime: {source}")]
    Runtime {
        pool: PoolKind,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by a processor or criterion implementation
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

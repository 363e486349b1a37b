use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("stream closed")]
    Closed,
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Request(String),
    #[error("token endpoint rejected credentials: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Raw transport connectivity, owned by the transport implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectivityState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Ready => 2,
            Self::TransientFailure => 3,
            Self::Shutdown => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Ready,
            3 => Self::TransientFailure,
            4 => Self::Shutdown,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// Lock-free holder for a [`ConnectivityState`], readable from any thread
#[derive(Debug)]
pub struct ConnectivityCell(AtomicU8);

impl ConnectivityCell {
    pub fn new(state: ConnectivityState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectivityState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

impl Default for ConnectivityCell {
    fn default() -> Self {
        Self::new(ConnectivityState::Idle)
    }
}

/// What the read side of an open stream reports
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// One inbound text frame
    Message(String),
    /// The stream failed; no more signals follow
    Error(String),
    /// The peer closed the stream normally; no more signals follow
    Completed,
}

/// Write half of an open stream
#[async_trait]
pub trait StreamSink: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the stream; closing twice is a no-op
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An open full-duplex stream: a sink plus the reader's signal channel
pub struct StreamChannel {
    pub sink: Box<dyn StreamSink>,
    pub signals: mpsc::Receiver<StreamSignal>,
}

/// Opens streams to the platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new stream. The previous stream (if any) is the caller's to close.
    async fn open(&self) -> Result<StreamChannel, TransportError>;

    /// Current connectivity; must not block
    fn connectivity(&self) -> ConnectivityState;

    /// Mark the transport as permanently shut down
    fn shutdown(&self) {}
}

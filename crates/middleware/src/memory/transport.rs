use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{
    ConnectivityCell, ConnectivityState, StreamChannel, StreamSignal, StreamSink, Transport,
};

const SIGNAL_BUFFER_SIZE: usize = 256;

/// Scripted in-process transport.
///
/// Every successful `open()` hands the platform side of the new stream to the
/// receiver returned by [`MemoryTransport::new`] as a [`MemoryPeer`].
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    state: Arc<ConnectivityCell>,
    fail_next: AtomicUsize,
    opens: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            peers: tx,
            state: Arc::new(ConnectivityCell::default()),
            fail_next: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        };
        (transport, rx)
    }

    /// Make the next `n` calls to `open()` fail
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of `open()` calls so far, failed ones included
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn set_connectivity(&self, state: ConnectivityState) {
        self.state.set(state);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<StreamChannel, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.state.set(ConnectivityState::Connecting);

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.state.set(ConnectivityState::TransientFailure);
            return Err(TransportError::ConnectionFailed(
                "scripted open failure".to_string(),
            ));
        }

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER_SIZE);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            signals: signal_tx,
            sent: out_rx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectionFailed("no peer listening".to_string()))?;

        self.state.set(ConnectivityState::Ready);
        Ok(StreamChannel {
            sink: Box::new(MemorySink {
                out: Some(out_tx),
                state: Arc::clone(&self.state),
            }),
            signals: signal_rx,
        })
    }

    fn connectivity(&self) -> ConnectivityState {
        self.state.get()
    }

    fn shutdown(&self) {
        self.state.set(ConnectivityState::Shutdown);
    }
}

struct MemorySink {
    out: Option<mpsc::UnboundedSender<String>>,
    state: Arc<ConnectivityCell>,
}

#[async_trait]
impl StreamSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let out = self.out.as_ref().ok_or(TransportError::Closed)?;
        out.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.out.take().is_some() && self.state.get() != ConnectivityState::Shutdown {
            self.state.set(ConnectivityState::Idle);
        }
        Ok(())
    }
}

/// Platform side of one in-memory stream
pub struct MemoryPeer {
    signals: mpsc::Sender<StreamSignal>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Push an inbound text frame to the client; false once the client dropped the stream
    pub async fn deliver(&self, text: impl Into<String>) -> bool {
        self.signals
            .send(StreamSignal::Message(text.into()))
            .await
            .is_ok()
    }

    /// Terminate the stream with an error
    pub async fn fail(self, message: impl Into<String>) {
        let _ = self.signals.send(StreamSignal::Error(message.into())).await;
    }

    /// Terminate the stream normally
    pub async fn complete(self) {
        let _ = self.signals.send(StreamSignal::Completed).await;
    }

    /// Next frame the client sent; `None` once the client closed its sink
    pub async fn recv(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }
}

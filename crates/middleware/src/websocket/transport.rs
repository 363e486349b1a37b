use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::auth::TokenProvider;
use crate::error::TransportError;
use crate::transport::{
    ConnectivityCell, ConnectivityState, StreamChannel, StreamSignal, StreamSink, Transport,
};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const SIGNAL_BUFFER_SIZE: usize = 1024;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// `tokio-tungstenite` implementation of [`Transport`].
///
/// The bearer token is sent in the upgrade request; a 401 on upgrade
/// invalidates it so the next attempt fetches a fresh one. Writes and
/// close frames are bounded by the write timeout, so a peer that stops
/// reading cannot stall the sink.
pub struct WebSocketTransport {
    url: String,
    tokens: Arc<dyn TokenProvider>,
    state: Arc<ConnectivityCell>,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            url: url.into(),
            tokens,
            state: Arc::new(ConnectivityCell::default()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn handshake(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, TransportError> {
        let token = self.tokens.token().await?;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        info!(url = %self.url, "Connecting to platform WebSocket");

        let connected = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                ))
            })?;

        match connected {
            Ok((ws, response)) => {
                info!(status = ?response.status(), "WebSocket connected");
                Ok(ws)
            }
            Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                warn!("WebSocket upgrade rejected as unauthorized, invalidating token");
                self.tokens.invalidate();
                Err(TransportError::ConnectionFailed(
                    "upgrade rejected: 401 Unauthorized".to_string(),
                ))
            }
            Err(e) => Err(TransportError::ConnectionFailed(e.to_string())),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<StreamChannel, TransportError> {
        self.state.set(ConnectivityState::Connecting);

        let ws = match self.handshake().await {
            Ok(ws) => ws,
            Err(e) => {
                self.state.set(ConnectivityState::TransientFailure);
                return Err(e);
            }
        };
        self.state.set(ConnectivityState::Ready);

        let (write, mut read) = ws.split();
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER_SIZE);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let terminal = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(StreamSignal::Message(text)).await.is_err() {
                            // Stream owner went away
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            if tx.send(StreamSignal::Message(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "WebSocket closed by peer");
                        break StreamSignal::Completed;
                    }
                    Some(Ok(_)) => trace!("Ignoring control frame"),
                    Some(Err(e)) => break StreamSignal::Error(e.to_string()),
                    None => break StreamSignal::Completed,
                }
            };

            if state.get() != ConnectivityState::Shutdown {
                match &terminal {
                    StreamSignal::Error(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        state.set(ConnectivityState::TransientFailure);
                    }
                    _ => state.set(ConnectivityState::Idle),
                }
            }
            let _ = tx.send(terminal).await;
        });

        Ok(StreamChannel {
            sink: Box::new(WebSocketSink {
                write,
                closed: false,
                write_timeout: self.write_timeout,
                state: Arc::clone(&self.state),
            }),
            signals: rx,
        })
    }

    fn connectivity(&self) -> ConnectivityState {
        self.state.get()
    }

    fn shutdown(&self) {
        self.state.set(ConnectivityState::Shutdown);
    }
}

struct WebSocketSink {
    write: WsWrite,
    closed: bool,
    write_timeout: Duration,
    state: Arc<ConnectivityCell>,
}

#[async_trait]
impl StreamSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match tokio::time::timeout(self.write_timeout, self.write.send(Message::Text(text))).await {
            Ok(result) => result.map_err(|e| TransportError::SendFailed(e.to_string())),
            Err(_) => {
                warn!(timeout_ms = self.write_timeout.as_millis() as u64, "WebSocket write timed out");
                Err(TransportError::SendFailed(format!(
                    "write timed out after {:?}",
                    self.write_timeout
                )))
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.state.get() != ConnectivityState::Shutdown {
            self.state.set(ConnectivityState::Idle);
        }
        // Peer may already be gone; a failed close frame is not an error
        match tokio::time::timeout(self.write_timeout, self.write.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "WebSocket close frame not delivered"),
            Err(_) => debug!("WebSocket close timed out, dropping connection"),
        }
        Ok(())
    }
}

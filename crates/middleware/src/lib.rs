//! wflink-middleware: transport, auth and cache building blocks
//!
//! Provides the stream [`Transport`] abstraction with a WebSocket
//! implementation and an in-memory one for tests, bearer token providers,
//! and the bounded TTL cache used for acknowledgment tracking.

pub mod auth;
pub mod cache;
pub mod error;
pub mod memory;
pub mod transport;
pub mod websocket;

pub use auth::{
    token_provider_from_config, ClientCredentialsProvider, StaticTokenProvider, TokenProvider,
};
pub use cache::{BoundedTtlCache, Displaced};
pub use error::{AuthError, TransportError};
pub use transport::{
    ConnectivityCell, ConnectivityState, StreamChannel, StreamSignal, StreamSink, Transport,
};
pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::WebSocketTransport;

//! WebSocket transport to the platform's calculation-member endpoint
pub mod transport;

pub use transport::WebSocketTransport;

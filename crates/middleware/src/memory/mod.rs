//! In-memory implementations for testing
pub mod transport;

pub use transport::{MemoryPeer, MemoryTransport};

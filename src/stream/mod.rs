//! Market data streaming
//!
//! Real-time per-market delta events over WebSocket, decoded into typed
//! events and pushed through an mpsc channel to the tracker.

pub mod socket;
pub mod types;

pub use socket::MarketStreamClient;
pub use types::{Fill, MarketDelta, MarketEvent, OrderBookEntry};

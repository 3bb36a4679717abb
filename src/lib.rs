//! Pump Trader Library
//!
//! Detects post-signal activity spikes across exchange markets and
//! executes a chunked buy-then-sell plan against the resolved market.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod math;
pub mod stream;
pub mod tracker;
pub mod trade;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};

//! Trade execution
//!
//! The coordinator splits the source amount into chunks; each chunk gets
//! its own lifecycle manager that drives buy and sell orders through
//! bounded re-pricing rounds.

pub mod coordinator;
pub mod lifecycle;
pub mod poll;

pub use coordinator::{ChunkResult, ChunkedExecutionCoordinator};
pub use lifecycle::{BuyFill, OrderLifecycleManager, TaskOutcome};

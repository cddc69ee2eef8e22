//! In-memory engine state
//!
//! Features:
//! - Bounded per-network fee history with FIFO eviction
//! - Copy-on-write network snapshots
//! - Monotonic token price writes with fallback handling
//! - Slice-scoped change subscriptions

pub mod hub;
pub mod state;
pub mod store;

pub use hub::{ChangeKind, Slice, SliceHub, StateChange};
pub use state::{AggregateState, NetworkState, NetworkView, PriceWrite, StateSnapshot, StateStats};
pub use store::{AppendOutcome, TimeSeriesStore};

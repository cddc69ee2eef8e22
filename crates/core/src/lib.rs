//! Core types and utilities for the multi-chain gas tracker
//!
//! This crate provides shared types used across all components:
//! - Network, token and fee observation definitions
//! - OHLC candle aggregation
//! - Oracle price math and plausibility ranges
//! - Engine configuration and error taxonomy

pub mod types;
pub mod tokens;
pub mod oracle;
pub mod candles;
pub mod cost;
pub mod config;
pub mod errors;

pub use types::*;
pub use tokens::*;
pub use oracle::*;
pub use candles::*;
pub use cost::*;
pub use config::*;
pub use errors::*;

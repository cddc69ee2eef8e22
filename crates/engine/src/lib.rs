//! Multi-chain gas fee engine
//!
//! Wires the state, ingestion and price feed crates together behind one `Engine`
//! and loads its configuration.

pub mod engine;
pub mod settings;

pub use engine::{Engine, EngineStats};

//! Chain RPC access
//!
//! Features:
//! - `ChainRpc` capability: head and log subscriptions, block headers, contract calls
//! - alloy WebSocket implementation, one transport per network
//! - Scripted in-memory implementation behind the `mock` feature

pub mod client;
pub mod ws;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::{BlockHeader, ChainRpc, HeadStream, HeadSubscription, LogStream, SubscriptionId};
pub use ws::WsChainRpc;

#[cfg(any(test, feature = "mock"))]
pub use mock::{abi_words, MockChainRpc};

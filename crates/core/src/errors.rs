//! Error types

use alloy_primitives::Address;
use thiserror::Error;

use crate::{ChainId, TokenSymbol};

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Chain {0} not configured")]
    ChainNotConfigured(ChainId),

    #[error("Token {0} not tracked")]
    TokenNotTracked(TokenSymbol),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Unknown token: {0}")]
    UnknownToken(String),

    #[error("Bucket interval must be positive, got {0}ms")]
    InvalidInterval(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Live subscription errors
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Subscription to {chain} at {endpoint} failed: {reason}")]
    SubscribeFailed {
        chain: ChainId,
        endpoint: String,
        reason: String,
    },

    #[error("Subscription to {chain} timed out after {after_ms}ms")]
    Timeout { chain: ChainId, after_ms: u64 },

    #[error("Subscription to {chain} lost: {reason}")]
    Lost { chain: ChainId, reason: String },

    #[error("Connect to {0} cancelled by disconnect")]
    Cancelled(ChainId),

    #[error("Network {0} is not configured")]
    NotConfigured(ChainId),

    #[error("Chain {0} has no open transport")]
    NotConnected(ChainId),
}

/// Single block header or contract call failures
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Block {height} on {chain} unavailable: {reason}")]
    BlockHeader {
        chain: ChainId,
        height: u64,
        reason: String,
    },

    #[error("Block {height} on {chain} not found")]
    MissingBlock { chain: ChainId, height: u64 },

    #[error("Call to {address} on {chain} failed: {reason}")]
    ContractCall {
        chain: ChainId,
        address: Address,
        reason: String,
    },

    #[error("Log subscription to {address} on {chain} failed: {reason}")]
    LogSubscription {
        chain: ChainId,
        address: Address,
        reason: String,
    },

    #[error("Could not decode response: {0}")]
    Decode(String),

    #[error("{what} timed out after {after_ms}ms")]
    Timeout { what: String, after_ms: u64 },

    #[error("Chain {0} has no open transport")]
    NotConnected(ChainId),
}

/// Fetched price rejected before it reaches state
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{token} price {value} outside plausible range [{min}, {max}]")]
    OutOfRange {
        token: TokenSymbol,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{token} price is not a finite number")]
    NotFinite { token: TokenSymbol },
}

/// Price feed errors
#[derive(Debug, Clone, Error)]
pub enum PriceFeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Token {0} not tracked")]
    NotTracked(TokenSymbol),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type ConnectionResult<T> = Result<T, ConnectionError>;
pub type FetchResult<T> = Result<T, FetchError>;
pub type PriceFeedResult<T> = Result<T, PriceFeedError>;

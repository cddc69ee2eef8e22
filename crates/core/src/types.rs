//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Polygon,
    Arbitrum,
}

impl ChainId {
    pub const ALL: [ChainId; 3] = [ChainId::Ethereum, ChainId::Polygon, ChainId::Arbitrum];

    pub fn chain_id(&self) -> u64 {
        match self {
            ChainId::Ethereum => 1,
            ChainId::Polygon => 137,
            ChainId::Arbitrum => 42161,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Polygon => "polygon",
            ChainId::Arbitrum => "arbitrum",
        }
    }

    /// Token the network charges fees in
    pub fn native_token(&self) -> TokenSymbol {
        match self {
            ChainId::Ethereum | ChainId::Arbitrum => TokenSymbol::Eth,
            ChainId::Polygon => TokenSymbol::Matic,
        }
    }

    /// Flat priority fee estimate in gwei, used when no override is configured
    pub fn default_priority_fee_gwei(&self) -> f64 {
        match self {
            ChainId::Ethereum => 2.0,
            ChainId::Polygon => 30.0,
            ChainId::Arbitrum => 0.1,
        }
    }

    pub fn default_ws_url(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "wss://ethereum-rpc.publicnode.com",
            ChainId::Polygon => "wss://polygon-bor-rpc.publicnode.com",
            ChainId::Arbitrum => "wss://arbitrum-one-rpc.publicnode.com",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ChainId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(ChainId::Ethereum),
            "polygon" | "matic" => Ok(ChainId::Polygon),
            "arbitrum" | "arb" => Ok(ChainId::Arbitrum),
            other => Err(CoreError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Tracked token symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenSymbol {
    Eth,
    Matic,
}

impl TokenSymbol {
    pub const ALL: [TokenSymbol; 2] = [TokenSymbol::Eth, TokenSymbol::Matic];

    pub fn symbol(&self) -> &'static str {
        match self {
            TokenSymbol::Eth => "ETH",
            TokenSymbol::Matic => "MATIC",
        }
    }
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for TokenSymbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ETH" | "WETH" => Ok(TokenSymbol::Eth),
            "MATIC" | "POL" | "WMATIC" => Ok(TokenSymbol::Matic),
            other => Err(CoreError::UnknownToken(other.to_string())),
        }
    }
}

/// A single fee sample taken from one block, in gwei.
///
/// `total_fee` is fixed at construction; there is no setter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    timestamp_ms: u64,
    base_fee: f64,
    priority_fee: f64,
    total_fee: f64,
}

impl Observation {
    pub fn new(timestamp_ms: u64, base_fee: f64, priority_fee: f64) -> Self {
        Self {
            timestamp_ms,
            base_fee,
            priority_fee,
            total_fee: base_fee + priority_fee,
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn base_fee(&self) -> f64 {
        self.base_fee
    }

    pub fn priority_fee(&self) -> f64 {
        self.priority_fee
    }

    pub fn total_fee(&self) -> f64 {
        self.total_fee
    }
}

/// Where the active token price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceOrigin {
    /// Nothing accepted yet
    #[default]
    Unset,
    /// Static constant applied after a failed first fetch
    Fallback,
    /// Validated oracle read
    Oracle,
}

/// Active USD price for a token
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenPrice {
    pub value: f64,
    pub last_updated_ms: u64,
    pub origin: PriceOrigin,
}

impl TokenPrice {
    pub fn oracle(value: f64, last_updated_ms: u64) -> Self {
        Self {
            value,
            last_updated_ms,
            origin: PriceOrigin::Oracle,
        }
    }

    pub fn fallback(value: f64, last_updated_ms: u64) -> Self {
        Self {
            value,
            last_updated_ms,
            origin: PriceOrigin::Fallback,
        }
    }

    pub fn is_set(&self) -> bool {
        self.origin != PriceOrigin::Unset
    }
}

/// Live-data subscription status of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Current unix time in milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_fee_is_sum() {
        let obs = Observation::new(1_000, 12.5, 2.0);
        assert_eq!(obs.total_fee(), 14.5);
        assert_eq!(obs.base_fee() + obs.priority_fee(), obs.total_fee());
    }

    #[test]
    fn test_native_tokens() {
        assert_eq!(ChainId::Ethereum.native_token(), TokenSymbol::Eth);
        assert_eq!(ChainId::Arbitrum.native_token(), TokenSymbol::Eth);
        assert_eq!(ChainId::Polygon.native_token(), TokenSymbol::Matic);
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!("Polygon".parse::<ChainId>().unwrap(), ChainId::Polygon);
        assert_eq!("matic".parse::<TokenSymbol>().unwrap(), TokenSymbol::Matic);
        assert!("solana".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&ChainId::Arbitrum).unwrap(), "\"arbitrum\"");
        assert_eq!(serde_json::to_string(&TokenSymbol::Matic).unwrap(), "\"MATIC\"");
    }
}

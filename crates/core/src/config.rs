//! Configuration types

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::tokens::{fallback_price, plausible_range, PriceRange};
use crate::{ChainId, CoreError, CoreResult, TokenSymbol};

/// Uniswap V3 USDC/WETH 0.05% pool on Ethereum mainnet
pub const UNISWAP_V3_USDC_WETH_POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");

/// Chainlink MATIC/USD aggregator on Ethereum mainnet
pub const CHAINLINK_MATIC_USD_FEED: Address = address!("7bAC85A8a13A4BcD8abb3eB7d6b4d632c5a57676");

/// Per-network live-data configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain: ChainId,
    pub ws_url: String,
    pub priority_fee_gwei: f64,
}

impl NetworkConfig {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            ws_url: chain.default_ws_url().to_string(),
            priority_fee_gwei: chain.default_priority_fee_gwei(),
        }
    }
}

/// On-chain source a token price is read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleSource {
    /// Spot price from a pool's `slot0().sqrtPriceX96`
    UniswapV3 {
        pool: Address,
        token0_decimals: u8,
        token1_decimals: u8,
        /// Quote token0 per token1 instead of token1 per token0
        invert: bool,
    },
    /// `latestRoundData().answer` scaled by the feed's `decimals()`
    Chainlink { feed: Address },
}

/// Per-token price polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    pub token: TokenSymbol,
    /// Network the oracle contract lives on
    pub network: ChainId,
    pub source: OracleSource,
    pub poll_interval_ms: u64,
    pub range: PriceRange,
    pub fallback: f64,
}

impl PriceFeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// ETH/USD from the USDC/WETH pool, every 30s
    pub fn eth_uniswap_v3() -> Self {
        Self {
            token: TokenSymbol::Eth,
            network: ChainId::Ethereum,
            source: OracleSource::UniswapV3 {
                pool: UNISWAP_V3_USDC_WETH_POOL,
                token0_decimals: 6,
                token1_decimals: 18,
                invert: true,
            },
            poll_interval_ms: 30_000,
            range: plausible_range(TokenSymbol::Eth),
            fallback: fallback_price(TokenSymbol::Eth),
        }
    }

    /// MATIC/USD from Chainlink, every 60s
    pub fn matic_chainlink() -> Self {
        Self {
            token: TokenSymbol::Matic,
            network: ChainId::Ethereum,
            source: OracleSource::Chainlink {
                feed: CHAINLINK_MATIC_USD_FEED,
            },
            poll_interval_ms: 60_000,
            range: plausible_range(TokenSymbol::Matic),
            fallback: fallback_price(TokenSymbol::Matic),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub networks: Vec<NetworkConfig>,
    pub price_feeds: Vec<PriceFeedConfig>,
    /// Observations retained per network (96 = one day of 15 minute candles)
    pub history_capacity: usize,
    pub fetch_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Pending head notifications buffered per network before new ones are dropped
    pub ingest_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            networks: ChainId::ALL.into_iter().map(NetworkConfig::new).collect(),
            price_feeds: vec![
                PriceFeedConfig::eth_uniswap_v3(),
                PriceFeedConfig::matic_chainlink(),
            ],
            history_capacity: 96,
            fetch_timeout_ms: 10_000,
            connect_timeout_ms: 15_000,
            ingest_queue_depth: 256,
        }
    }
}

impl EngineConfig {
    pub fn get_network_config(&self, chain: ChainId) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain == chain)
    }

    pub fn get_network_config_mut(&mut self, chain: ChainId) -> Option<&mut NetworkConfig> {
        self.networks.iter_mut().find(|n| n.chain == chain)
    }

    pub fn get_price_feed(&self, token: TokenSymbol) -> Option<&PriceFeedConfig> {
        self.price_feeds.iter().find(|p| p.token == token)
    }

    pub fn chains(&self) -> Vec<ChainId> {
        self.networks.iter().map(|n| n.chain).collect()
    }

    pub fn tokens(&self) -> Vec<TokenSymbol> {
        self.price_feeds.iter().map(|p| p.token).collect()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.history_capacity == 0 {
            return Err(CoreError::InvalidConfig("history_capacity must be > 0".into()));
        }
        if self.ingest_queue_depth == 0 {
            return Err(CoreError::InvalidConfig("ingest_queue_depth must be > 0".into()));
        }
        if self.fetch_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig("timeouts must be > 0".into()));
        }

        for (i, net) in self.networks.iter().enumerate() {
            if self.networks[..i].iter().any(|n| n.chain == net.chain) {
                return Err(CoreError::InvalidConfig(format!("duplicate network {}", net.chain)));
            }
            if net.ws_url.is_empty() {
                return Err(CoreError::InvalidConfig(format!("{} has no ws_url", net.chain)));
            }
            if !(net.priority_fee_gwei.is_finite() && net.priority_fee_gwei >= 0.0) {
                return Err(CoreError::InvalidConfig(format!(
                    "{} priority fee must be a non-negative number",
                    net.chain
                )));
            }
        }

        for (i, feed) in self.price_feeds.iter().enumerate() {
            if self.price_feeds[..i].iter().any(|f| f.token == feed.token) {
                return Err(CoreError::InvalidConfig(format!("duplicate price feed {}", feed.token)));
            }
            if feed.poll_interval_ms == 0 {
                return Err(CoreError::InvalidConfig(format!("{} poll interval must be > 0", feed.token)));
            }
            if !(feed.range.min < feed.range.max) {
                return Err(CoreError::InvalidConfig(format!("{} range is empty", feed.token)));
            }
            if !feed.range.contains(feed.fallback) {
                return Err(CoreError::InvalidConfig(format!(
                    "{} fallback {} outside its own range",
                    feed.token, feed.fallback
                )));
            }
            if self.get_network_config(feed.network).is_none() {
                return Err(CoreError::ChainNotConfigured(feed.network));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.history_capacity, 96);
        assert_eq!(config.networks.len(), 3);
        assert_eq!(config.get_network_config(ChainId::Polygon).unwrap().priority_fee_gwei, 30.0);
        assert_eq!(config.get_price_feed(TokenSymbol::Eth).unwrap().poll_interval_ms, 30_000);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.history_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.price_feeds[0].range = PriceRange::new(10.0, 1.0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.networks.retain(|n| n.chain != ChainId::Ethereum);
        assert!(matches!(config.validate(), Err(CoreError::ChainNotConfigured(ChainId::Ethereum))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "history_capacity": 10 }"#).unwrap();
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.fetch_timeout_ms, 10_000);
        assert_eq!(config.price_feeds.len(), 2);
    }
}

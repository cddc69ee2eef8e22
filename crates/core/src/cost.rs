//! Transaction cost estimates across networks

use serde::Serialize;

use crate::{ChainId, TokenSymbol};

/// Gas units of a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

const GWEI_PER_TOKEN: f64 = 1e9;

/// Cost of one transaction on one network
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub chain: ChainId,
    pub token: TokenSymbol,
    pub gas_price_gwei: f64,
    pub token_price_usd: f64,
    pub gas_cost_token: f64,
    pub gas_cost_usd: f64,
    pub total_cost_token: f64,
    pub total_cost_usd: f64,
}

impl CostEstimate {
    /// `value_token` is the amount transferred, in the network's native token
    pub fn new(
        chain: ChainId,
        gas_price_gwei: f64,
        token_price_usd: f64,
        gas_limit: u64,
        value_token: f64,
    ) -> Self {
        let gas_cost_token = gas_price_gwei * gas_limit as f64 / GWEI_PER_TOKEN;
        let total_cost_token = value_token + gas_cost_token;

        Self {
            chain,
            token: chain.native_token(),
            gas_price_gwei,
            token_price_usd,
            gas_cost_token,
            gas_cost_usd: gas_cost_token * token_price_usd,
            total_cost_token,
            total_cost_usd: total_cost_token * token_price_usd,
        }
    }
}

/// Estimate with the lowest USD gas cost
pub fn cheapest(estimates: &[CostEstimate]) -> Option<&CostEstimate> {
    estimates.iter().min_by(|a, b| {
        a.gas_cost_usd
            .partial_cmp(&b.gas_cost_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_cost() {
        // 20 gwei * 21000 = 0.00042 ETH, at $2500 = $1.05
        let est = CostEstimate::new(ChainId::Ethereum, 20.0, 2500.0, TRANSFER_GAS_LIMIT, 0.5);
        assert!((est.gas_cost_token - 0.00042).abs() < 1e-12);
        assert!((est.gas_cost_usd - 1.05).abs() < 1e-9);
        assert!((est.total_cost_usd - 0.50042 * 2500.0).abs() < 1e-9);
        assert_eq!(est.token, TokenSymbol::Eth);
    }

    #[test]
    fn test_cheapest() {
        let estimates = vec![
            CostEstimate::new(ChainId::Ethereum, 20.0, 2500.0, TRANSFER_GAS_LIMIT, 0.0),
            CostEstimate::new(ChainId::Polygon, 60.0, 0.85, TRANSFER_GAS_LIMIT, 0.0),
            CostEstimate::new(ChainId::Arbitrum, 0.11, 2500.0, TRANSFER_GAS_LIMIT, 0.0),
        ];
        assert_eq!(cheapest(&estimates).unwrap().chain, ChainId::Polygon);
        assert!(cheapest(&[]).is_none());
    }
}

//! On-chain price sources

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use gastrack_core::{
    scale_answer, ChainId, FetchError, FetchResult, OracleSource, PriceFeedConfig, Slot0,
    TokenSymbol,
};
use gastrack_rpc::ChainRpc;

pub mod abi {
    alloy_sol_types::sol! {
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked);
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound);
        function decimals() external view returns (uint8);

        event Swap(address indexed sender, address indexed recipient, int256 amount0, int256 amount1, uint160 sqrtPriceX96, uint128 liquidity, int24 tick);
    }
}

/// Something that can produce a token's USD price on demand
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn token(&self) -> TokenSymbol;

    fn name(&self) -> &'static str;

    /// Unvalidated USD price
    async fn fetch(&self) -> FetchResult<f64>;
}

pub(crate) fn decode_err(e: alloy_sol_types::Error) -> FetchError {
    FetchError::Decode(e.to_string())
}

/// Spot price from a Uniswap V3 pool's `slot0`
pub struct UniswapV3Source {
    token: TokenSymbol,
    chain: ChainId,
    pool: Address,
    token0_decimals: u8,
    token1_decimals: u8,
    invert: bool,
    rpc: Arc<dyn ChainRpc>,
}

impl UniswapV3Source {
    pub fn new(
        token: TokenSymbol,
        chain: ChainId,
        pool: Address,
        token0_decimals: u8,
        token1_decimals: u8,
        invert: bool,
        rpc: Arc<dyn ChainRpc>,
    ) -> Self {
        Self {
            token,
            chain,
            pool,
            token0_decimals,
            token1_decimals,
            invert,
            rpc,
        }
    }
}

#[async_trait]
impl PriceSource for UniswapV3Source {
    fn token(&self) -> TokenSymbol {
        self.token
    }

    fn name(&self) -> &'static str {
        "uniswap-v3"
    }

    async fn fetch(&self) -> FetchResult<f64> {
        let calldata = Bytes::from(abi::slot0Call {}.abi_encode());
        let raw = self.rpc.call_contract(self.chain, self.pool, calldata).await?;
        let slot0 = abi::slot0Call::abi_decode_returns(&raw, true).map_err(decode_err)?;

        let sqrt_price_x96 = U256::from(slot0.sqrtPriceX96);
        debug!("{} slot0 sqrtPriceX96={}", self.pool, sqrt_price_x96);

        Ok(Slot0 { sqrt_price_x96 }.price(self.token0_decimals, self.token1_decimals, self.invert))
    }
}

/// Chainlink aggregator `latestRoundData` answer
pub struct ChainlinkSource {
    token: TokenSymbol,
    chain: ChainId,
    feed: Address,
    rpc: Arc<dyn ChainRpc>,
    decimals: Mutex<Option<u8>>,
}

impl ChainlinkSource {
    pub fn new(token: TokenSymbol, chain: ChainId, feed: Address, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            token,
            chain,
            feed,
            rpc,
            decimals: Mutex::new(None),
        }
    }

    /// Feed decimals never change, so they are read once
    async fn decimals(&self) -> FetchResult<u8> {
        let cached = *self.decimals.lock();
        if let Some(decimals) = cached {
            return Ok(decimals);
        }

        let calldata = Bytes::from(abi::decimalsCall {}.abi_encode());
        let raw = self.rpc.call_contract(self.chain, self.feed, calldata).await?;
        let decimals = abi::decimalsCall::abi_decode_returns(&raw, true)
            .map_err(decode_err)?
            ._0;

        *self.decimals.lock() = Some(decimals);
        Ok(decimals)
    }
}

#[async_trait]
impl PriceSource for ChainlinkSource {
    fn token(&self) -> TokenSymbol {
        self.token
    }

    fn name(&self) -> &'static str {
        "chainlink"
    }

    async fn fetch(&self) -> FetchResult<f64> {
        let decimals = self.decimals().await?;

        let calldata = Bytes::from(abi::latestRoundDataCall {}.abi_encode());
        let raw = self.rpc.call_contract(self.chain, self.feed, calldata).await?;
        let round = abi::latestRoundDataCall::abi_decode_returns(&raw, true).map_err(decode_err)?;

        Ok(scale_answer(round.answer, decimals))
    }
}

/// Build the source described by a feed config
pub fn source_for(config: &PriceFeedConfig, rpc: Arc<dyn ChainRpc>) -> Arc<dyn PriceSource> {
    match config.source {
        OracleSource::UniswapV3 {
            pool,
            token0_decimals,
            token1_decimals,
            invert,
        } => Arc::new(UniswapV3Source::new(
            config.token,
            config.network,
            pool,
            token0_decimals,
            token1_decimals,
            invert,
            rpc,
        )),
        OracleSource::Chainlink { feed } => {
            Arc::new(ChainlinkSource::new(config.token, config.network, feed, rpc))
        }
    }
}

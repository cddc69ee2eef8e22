//! Event-driven Uniswap V3 prices
//!
//! Every `Swap` a pool emits carries the post-swap sqrtPriceX96, so the token price
//! follows trading as it happens. The `slot0` timer keeps running alongside for pools
//! that go quiet.

use alloy_primitives::{LogData, U256};
use alloy_sol_types::SolEvent;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gastrack_core::{now_ms, ChainId, FetchResult, OracleSource, Slot0, TokenSymbol};
use gastrack_rpc::ChainRpc;

use crate::feeds::{abi, decode_err};
use crate::poller::PriceFeedPoller;

/// Price implied by a pool `Swap` log
pub fn decode_swap_price(
    log: &LogData,
    token0_decimals: u8,
    token1_decimals: u8,
    invert: bool,
) -> FetchResult<f64> {
    let swap = abi::Swap::decode_raw_log(log.topics().iter().copied(), &log.data, true).map_err(decode_err)?;
    let sqrt_price_x96 = U256::from(swap.sqrtPriceX96);
    Ok(Slot0 { sqrt_price_x96 }.price(token0_decimals, token1_decimals, invert))
}

/// Follow `token`'s pool swaps until the log stream ends. Returns immediately when the
/// token is not priced from a Uniswap V3 pool or the subscription cannot be opened.
pub async fn watch_swaps(poller: Arc<PriceFeedPoller>, rpc: Arc<dyn ChainRpc>, token: TokenSymbol) {
    let Some(config) = poller.config(token).cloned() else {
        return;
    };
    let OracleSource::UniswapV3 {
        pool,
        token0_decimals,
        token1_decimals,
        invert,
    } = config.source
    else {
        return;
    };

    let mut logs = match rpc
        .subscribe_logs(config.network, pool, abi::Swap::SIGNATURE_HASH)
        .await
    {
        Ok(logs) => logs,
        Err(e) => {
            warn!("{} swap events unavailable, polling only: {}", token, e);
            return;
        }
    };
    info!("Following {} swaps on pool {}", token, pool);

    while let Some(log) = logs.next().await {
        let observed_at_ms = now_ms();
        match decode_swap_price(&log, token0_decimals, token1_decimals, invert) {
            Ok(value) => {
                poller.record(token, value, observed_at_ms);
            }
            Err(e) => warn!("Skipping {} swap log: {}", token, e),
        }
    }

    debug!("{} swap stream ended", token);
}

/// One swap watcher per Uniswap V3 priced token whose pool lives on `chain`
pub fn spawn_for_network(
    poller: &Arc<PriceFeedPoller>,
    rpc: &Arc<dyn ChainRpc>,
    chain: ChainId,
) -> Vec<JoinHandle<()>> {
    poller
        .tokens_on(chain)
        .into_iter()
        .filter(|token| {
            poller
                .config(*token)
                .map(|c| matches!(c.source, OracleSource::UniswapV3 { .. }))
                .unwrap_or(false)
        })
        .map(|token| tokio::spawn(watch_swaps(Arc::clone(poller), Arc::clone(rpc), token)))
        .collect()
}

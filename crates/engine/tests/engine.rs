use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{LogData, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use tokio::sync::broadcast;

use gastrack_core::{
    ChainId, ConnectionError, ConnectionStatus, EngineConfig, PriceOrigin, Timeframe, TokenSymbol,
    CHAINLINK_MATIC_USD_FEED, TRANSFER_GAS_LIMIT, UNISWAP_V3_USDC_WETH_POOL,
};
use gastrack_engine::Engine;
use gastrack_price_feed::feeds::abi::{decimalsCall, latestRoundDataCall, slot0Call, Swap};
use gastrack_price_feed::RefreshOutcome;
use gastrack_rpc::{abi_words, BlockHeader, MockChainRpc};
use gastrack_state::{ChangeKind, Slice, StateChange};

/// Start of a 15 minute bucket, in unix seconds
const BUCKET_START: u64 = 1_700_000_100;

fn set_eth_sqrt_price(rpc: &MockChainRpc, sqrt_price: u64) {
    let mut words = vec![U256::from(sqrt_price) << 96];
    words.extend([U256::ZERO; 6]);
    rpc.set_reply(UNISWAP_V3_USDC_WETH_POOL, slot0Call::SELECTOR, Ok(abi_words(&words)));
}

fn mock_oracles(rpc: &MockChainRpc) {
    // sqrt 20_000 prices ETH at 2500
    set_eth_sqrt_price(rpc, 20_000);
    rpc.set_reply(
        CHAINLINK_MATIC_USD_FEED,
        decimalsCall::SELECTOR,
        Ok(abi_words(&[U256::from(8u64)])),
    );
    rpc.set_reply(
        CHAINLINK_MATIC_USD_FEED,
        latestRoundDataCall::SELECTOR,
        Ok(abi_words(&[
            U256::from(1u64),
            U256::from(72_000_000u64),
            U256::ZERO,
            U256::ZERO,
            U256::from(1u64),
        ])),
    );
}

fn set_header(rpc: &MockChainRpc, chain: ChainId, number: u64, timestamp: u64, base_fee_gwei: u128) {
    rpc.set_header(
        chain,
        BlockHeader {
            number,
            timestamp,
            base_fee_per_gas: Some(base_fee_gwei * 1_000_000_000),
        },
    );
}

fn engine_with(config: EngineConfig) -> (Arc<MockChainRpc>, Engine) {
    let rpc = Arc::new(MockChainRpc::new());
    mock_oracles(&rpc);
    let engine = Engine::new(config, rpc.clone()).unwrap();
    (rpc, engine)
}

async fn wait_for(rx: &mut broadcast::Receiver<StateChange>, kind: ChangeKind, count: usize) {
    let mut seen = 0;
    while seen < count {
        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change within 5s")
            .expect("channel closed");
        if change.kind == kind {
            seen += 1;
        }
    }
}

#[tokio::test]
async fn test_heads_become_a_candle() {
    let (rpc, engine) = engine_with(EngineConfig::default());
    set_header(&rpc, ChainId::Ethereum, 1, BUCKET_START, 8);
    set_header(&rpc, ChainId::Ethereum, 2, BUCKET_START + 12, 10);
    set_header(&rpc, ChainId::Ethereum, 3, BUCKET_START + 24, 7);

    engine.connect(ChainId::Ethereum).await.unwrap();
    let mut changes = engine.subscribe(Slice::Network(ChainId::Ethereum));

    for height in 1..=3 {
        assert!(rpc.push_head(ChainId::Ethereum, height));
    }
    wait_for(&mut changes, ChangeKind::Observation, 3).await;

    let candles = engine.candles(ChainId::Ethereum, Timeframe::Min15).unwrap();
    assert_eq!(candles.len(), 1);
    let candle = candles[0];
    assert_eq!(candle.bucket_start_ms, BUCKET_START * 1000);
    assert_eq!((candle.open, candle.high, candle.low, candle.close), (10.0, 12.0, 9.0, 9.0));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_connect_fetches_prices_immediately() {
    let (_rpc, engine) = engine_with(EngineConfig::default());
    let mut eth = engine.subscribe(Slice::Token(TokenSymbol::Eth));
    let mut matic = engine.subscribe(Slice::Token(TokenSymbol::Matic));

    engine.connect(ChainId::Ethereum).await.unwrap();
    wait_for(&mut eth, ChangeKind::Price, 1).await;
    wait_for(&mut matic, ChangeKind::Price, 1).await;

    let state = engine.state();
    let eth = state.token_price(TokenSymbol::Eth).unwrap();
    assert_eq!(eth.origin, PriceOrigin::Oracle);
    assert!((eth.value - 2500.0).abs() < 1e-6);
    assert!((state.token_price(TokenSymbol::Matic).unwrap().value - 0.72).abs() < 1e-9);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_out_of_range_price_is_not_written() {
    let (rpc, engine) = engine_with(EngineConfig::default());

    assert!(engine.refresh_price(TokenSymbol::Eth).await.is_update());

    // sqrt 5_000 prices ETH at 40_000
    set_eth_sqrt_price(&rpc, 5_000);
    let outcome = engine.refresh_price(TokenSymbol::Eth).await;
    assert!(matches!(outcome, RefreshOutcome::Retained { .. }));

    let price = engine.state().token_price(TokenSymbol::Eth).unwrap();
    assert!((price.value - 2500.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_refresh_prices_falls_back_when_oracle_down() {
    let rpc = Arc::new(MockChainRpc::new());
    let engine = Engine::new(EngineConfig::default(), rpc.clone()).unwrap();

    let outcomes = engine.refresh_prices().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|(_, o)| matches!(o, RefreshOutcome::FallbackApplied { .. })));

    let state = engine.state();
    assert_eq!(state.token_price(TokenSymbol::Eth).unwrap().value, 2500.0);
    assert_eq!(state.token_price(TokenSymbol::Matic).unwrap().value, 0.85);
}

#[tokio::test]
async fn test_network_failure_is_isolated() {
    let (rpc, engine) = engine_with(EngineConfig::default());
    rpc.fail_subscribe(ChainId::Polygon, "connection refused");

    let results = engine.connect_all().await;
    assert_eq!(results.len(), 3);
    for (chain, result) in &results {
        match chain {
            ChainId::Polygon => assert!(matches!(result, Err(ConnectionError::SubscribeFailed { .. }))),
            _ => assert!(result.is_ok()),
        }
    }

    assert_eq!(engine.status(ChainId::Polygon), ConnectionStatus::Failed);
    assert_eq!(engine.status(ChainId::Ethereum), ConnectionStatus::Connected);
    assert_eq!(engine.status(ChainId::Arbitrum), ConnectionStatus::Connected);
    assert!(engine.last_error(ChainId::Polygon).is_some());

    set_header(&rpc, ChainId::Arbitrum, 50, BUCKET_START, 0);
    let mut changes = engine.subscribe(Slice::Network(ChainId::Arbitrum));
    assert!(rpc.push_head(ChainId::Arbitrum, 50));
    wait_for(&mut changes, ChangeKind::Observation, 1).await;

    engine.shutdown().await;
}

#[tokio::test]
async fn test_history_is_bounded() {
    let config = EngineConfig {
        history_capacity: 3,
        ..EngineConfig::default()
    };
    let (rpc, engine) = engine_with(config);
    for n in 1..=4u64 {
        set_header(&rpc, ChainId::Polygon, n, BUCKET_START + n * 2, n as u128);
    }

    engine.connect(ChainId::Polygon).await.unwrap();
    let mut changes = engine.subscribe(Slice::Network(ChainId::Polygon));
    for n in 1..=4 {
        rpc.push_head(ChainId::Polygon, n);
    }
    wait_for(&mut changes, ChangeKind::Observation, 4).await;

    let history = engine.state().history(ChainId::Polygon).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].base_fee(), 2.0);
    assert!(history.iter().all(|o| o.total_fee() == o.base_fee() + 30.0));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_cost_simulation_picks_cheapest() {
    let (rpc, engine) = engine_with(EngineConfig::default());
    set_header(&rpc, ChainId::Ethereum, 1, BUCKET_START, 18);
    set_header(&rpc, ChainId::Polygon, 1, BUCKET_START, 70);

    let mut eth_fees = engine.subscribe(Slice::Network(ChainId::Ethereum));
    let mut polygon_fees = engine.subscribe(Slice::Network(ChainId::Polygon));
    let mut matic = engine.subscribe(Slice::Token(TokenSymbol::Matic));

    engine.connect(ChainId::Ethereum).await.unwrap();
    engine.connect(ChainId::Polygon).await.unwrap();
    wait_for(&mut matic, ChangeKind::Price, 1).await;

    rpc.push_head(ChainId::Ethereum, 1);
    rpc.push_head(ChainId::Polygon, 1);
    wait_for(&mut eth_fees, ChangeKind::Observation, 1).await;
    wait_for(&mut polygon_fees, ChangeKind::Observation, 1).await;
    engine.refresh_price(TokenSymbol::Eth).await;

    let costs = engine.simulate_costs(TRANSFER_GAS_LIMIT, 0.0);
    // Arbitrum has no fee data yet
    assert_eq!(costs.len(), 2);

    let eth = costs.iter().find(|c| c.chain == ChainId::Ethereum).unwrap();
    // 20 gwei * 21000 = 0.00042 ETH at $2500
    assert!((eth.gas_cost_usd - 1.05).abs() < 1e-6);

    let polygon = costs.iter().find(|c| c.chain == ChainId::Polygon).unwrap();
    // 100 gwei * 21000 = 0.0021 MATIC at $0.72
    assert!((polygon.gas_cost_usd - 0.001512).abs() < 1e-9);

    let cheapest = engine.cheapest_network(TRANSFER_GAS_LIMIT, 0.0).unwrap();
    assert_eq!(cheapest.chain, ChainId::Polygon);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_twice_stops_everything() {
    let (rpc, engine) = engine_with(EngineConfig::default());
    engine.connect_all().await;

    // Immediate fetches: slot0 once, decimals and round data for MATIC
    tokio::time::sleep(Duration::from_millis(10)).await;
    let calls = rpc.call_count();
    assert_eq!(calls, 3);

    engine.shutdown().await;
    engine.shutdown().await;

    for chain in ChainId::ALL {
        assert_eq!(engine.status(chain), ConnectionStatus::Disconnected);
        assert!(!rpc.is_subscribed(chain));
    }

    // Timers were cancelled
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(rpc.call_count(), calls);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let (rpc, engine) = engine_with(EngineConfig::default());

    engine.connect(ChainId::Arbitrum).await.unwrap();
    engine.disconnect(ChainId::Arbitrum).await;
    assert_eq!(engine.status(ChainId::Arbitrum), ConnectionStatus::Disconnected);

    engine.connect(ChainId::Arbitrum).await.unwrap();
    assert_eq!(engine.status(ChainId::Arbitrum), ConnectionStatus::Connected);
    assert_eq!(rpc.subscribe_count(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_engines_do_not_share_state() {
    let (rpc_a, engine_a) = engine_with(EngineConfig::default());
    let (_rpc_b, engine_b) = engine_with(EngineConfig::default());
    set_header(&rpc_a, ChainId::Ethereum, 1, BUCKET_START, 5);

    engine_a.connect(ChainId::Ethereum).await.unwrap();
    let mut changes = engine_a.subscribe(Slice::Network(ChainId::Ethereum));
    rpc_a.push_head(ChainId::Ethereum, 1);
    wait_for(&mut changes, ChangeKind::Observation, 1).await;

    assert!(engine_a.snapshot().has_data());
    assert!(!engine_b.snapshot().has_data());

    engine_a.shutdown().await;
}

#[tokio::test]
async fn test_pool_swaps_update_eth_between_polls() {
    let (rpc, engine) = engine_with(EngineConfig::default());
    let mut eth = engine.subscribe(Slice::Token(TokenSymbol::Eth));

    engine.connect(ChainId::Ethereum).await.unwrap();
    wait_for(&mut eth, ChangeKind::Price, 1).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(rpc.has_log_subscriber(ChainId::Ethereum, UNISWAP_V3_USDC_WETH_POOL));

    // sqrt 25_000 prices ETH at 1600
    let swap = LogData::new_unchecked(
        vec![Swap::SIGNATURE_HASH, B256::ZERO, B256::ZERO],
        abi_words(&[U256::ZERO, U256::ZERO, U256::from(25_000u64) << 96, U256::from(1u64), U256::ZERO]),
    );
    assert!(rpc.push_log(ChainId::Ethereum, UNISWAP_V3_USDC_WETH_POOL, swap));
    wait_for(&mut eth, ChangeKind::Price, 1).await;

    let price = engine.state().token_price(TokenSymbol::Eth).unwrap();
    assert!((price.value - 1600.0).abs() < 1e-6);

    // The watcher goes with the connection
    engine.disconnect(ChainId::Ethereum).await;
    assert!(!rpc.has_log_subscriber(ChainId::Ethereum, UNISWAP_V3_USDC_WETH_POOL));
}

//! Engine composition root
//!
//! Builds one `AggregateState` and hands it to every component. Nothing here holds
//! process-wide state; two engines in one process are fully independent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

use gastrack_core::{
    cheapest, Candle, ChainId, ConnectionError, ConnectionResult, ConnectionStatus, CoreResult,
    CostEstimate, EngineConfig, Timeframe, TokenSymbol,
};
use gastrack_ingest::{ConnectionManager, ConnectionStats};
use gastrack_price_feed::{swaps, PriceFeedPoller, RefreshOutcome};
use gastrack_rpc::ChainRpc;
use gastrack_state::{AggregateState, Slice, StateChange, StateSnapshot, StateStats};

/// Engine stats
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub uptime: Duration,
    pub state: StateStats,
    pub connections: ConnectionStats,
}

/// Multi-chain gas fee engine
pub struct Engine {
    config: EngineConfig,
    state: Arc<AggregateState>,
    connections: ConnectionManager,
    poller: Arc<PriceFeedPoller>,
    rpc: Arc<dyn ChainRpc>,
    start_time: Instant,
    shut_down: AtomicBool,
}

impl Engine {
    pub fn new(config: EngineConfig, rpc: Arc<dyn ChainRpc>) -> anyhow::Result<Self> {
        config.validate()?;

        let state = Arc::new(AggregateState::from_config(&config));
        let connections = ConnectionManager::new(&config, Arc::clone(&rpc), Arc::clone(&state));
        let poller = Arc::new(PriceFeedPoller::new(
            Arc::clone(&state),
            Arc::clone(&rpc),
            &config.price_feeds,
            config.fetch_timeout(),
        ));

        info!(
            "Engine ready: {} networks, {} price feeds, history capacity {}",
            config.networks.len(),
            config.price_feeds.len(),
            config.history_capacity
        );

        Ok(Self {
            config,
            state,
            connections,
            poller,
            rpc,
            start_time: Instant::now(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Get shared state reference
    pub fn state(&self) -> Arc<AggregateState> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connect to the configured endpoint and start the price timers and swap
    /// watchers whose oracle lives on this network
    pub async fn connect(&self, chain: ChainId) -> ConnectionResult<()> {
        let endpoint = self
            .config
            .get_network_config(chain)
            .map(|n| n.ws_url.clone())
            .ok_or(ConnectionError::NotConfigured(chain))?;
        self.connect_to(chain, &endpoint).await
    }

    /// Connect to an explicit endpoint
    pub async fn connect_to(&self, chain: ChainId, endpoint: &str) -> ConnectionResult<()> {
        self.shut_down.store(false, Ordering::SeqCst);

        if self.connections.connect(chain, endpoint).await? {
            let timers = self.poller.spawn_for_network(chain);
            let watchers = swaps::spawn_for_network(&self.poller, &self.rpc, chain);
            for task in timers.into_iter().chain(watchers) {
                self.connections.attach(chain, task);
            }
        }
        Ok(())
    }

    /// Connect every configured network concurrently; one failure does not stop the rest
    pub async fn connect_all(&self) -> Vec<(ChainId, ConnectionResult<()>)> {
        let chains = self.config.chains();
        let results = futures::future::join_all(chains.iter().map(|c| self.connect(*c))).await;

        let connected = results.iter().filter(|r| r.is_ok()).count();
        info!("Connected {}/{} networks", connected, chains.len());

        chains.into_iter().zip(results).collect()
    }

    pub async fn disconnect(&self, chain: ChainId) {
        self.connections.disconnect(chain).await;
    }

    pub fn status(&self, chain: ChainId) -> ConnectionStatus {
        self.connections.status(chain)
    }

    pub fn last_error(&self, chain: ChainId) -> Option<ConnectionError> {
        self.connections.last_error(chain)
    }

    /// Out-of-band fetch of one token
    pub async fn refresh_price(&self, token: TokenSymbol) -> RefreshOutcome {
        self.poller.refresh(token).await
    }

    /// Out-of-band fetch of every tracked token
    pub async fn refresh_prices(&self) -> Vec<(TokenSymbol, RefreshOutcome)> {
        self.poller.refresh_all().await
    }

    /// Candles over a network's retained history
    pub fn candles(&self, chain: ChainId, timeframe: Timeframe) -> CoreResult<Vec<Candle>> {
        self.state.candles(chain, timeframe.millis())
    }

    /// Cost of one transaction on every network that has both a current fee and a
    /// price for its native token
    pub fn simulate_costs(&self, gas_limit: u64, value_token: f64) -> Vec<CostEstimate> {
        self.state
            .chains()
            .into_iter()
            .filter_map(|chain| {
                let network = self.state.network(chain)?;
                if network.history.is_empty() {
                    return None;
                }
                let price = self.state.token_price(chain.native_token())?;
                if !price.is_set() {
                    return None;
                }
                Some(CostEstimate::new(
                    chain,
                    network.total_fee(),
                    price.value,
                    gas_limit,
                    value_token,
                ))
            })
            .collect()
    }

    /// Cheapest network for a transaction, by USD gas cost
    pub fn cheapest_network(&self, gas_limit: u64, value_token: f64) -> Option<CostEstimate> {
        cheapest(&self.simulate_costs(gas_limit, value_token)).copied()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    pub fn subscribe(&self, slice: Slice) -> broadcast::Receiver<StateChange> {
        self.state.subscribe(slice)
    }

    /// Release every subscription, timer and change channel. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Engine already shut down");
        } else {
            info!("Shutting down engine");
        }

        self.connections.shutdown().await;
        self.state.close_subscriptions();
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            uptime: self.start_time.elapsed(),
            state: self.state.stats(),
            connections: self.connections.stats(),
        }
    }
}

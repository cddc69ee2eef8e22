//! Aggregate engine state
//!
//! The only place fee history, current fees, token prices and connectivity are
//! mutated. Each network's fee state sits behind an `Arc` and is copied on write, so a
//! snapshot handed to a consumer never changes underneath it and a new `Arc` (plus a
//! bumped slice version) tells the consumer exactly which slice moved.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

use gastrack_core::{
    aggregate, now_ms, Candle, ChainId, ConnectionStatus, CoreError, CoreResult, EngineConfig,
    Observation, PriceOrigin, TokenPrice, TokenSymbol,
};

use crate::hub::{ChangeKind, Slice, SliceHub, StateChange};
use crate::store::{AppendOutcome, TimeSeriesStore};

/// Fee state of one network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkState {
    pub base_fee: f64,
    pub priority_fee: f64,
    pub history: TimeSeriesStore,
    pub last_update_ms: u64,
}

impl NetworkState {
    pub fn new(capacity: usize) -> Self {
        Self {
            base_fee: 0.0,
            priority_fee: 0.0,
            history: TimeSeriesStore::new(capacity),
            last_update_ms: 0,
        }
    }

    pub fn total_fee(&self) -> f64 {
        self.base_fee + self.priority_fee
    }
}

/// Outcome of a token price write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceWrite {
    Accepted,
    /// Older than the active oracle price, or a fallback over a real value
    Superseded,
    UnknownToken,
}

#[derive(Debug)]
struct NetworkSlot {
    state: Arc<NetworkState>,
    status: ConnectionStatus,
    version: u64,
}

#[derive(Debug)]
struct TokenSlot {
    price: TokenPrice,
    version: u64,
}

/// Network entry of a whole-state snapshot
#[derive(Debug, Clone, Serialize)]
pub struct NetworkView {
    pub state: NetworkState,
    pub status: ConnectionStatus,
    pub version: u64,
}

/// Read-only copy of everything
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub networks: BTreeMap<ChainId, NetworkView>,
    pub prices: BTreeMap<TokenSymbol, TokenPrice>,
    pub taken_at_ms: u64,
}

impl StateSnapshot {
    /// True once any network has recorded an observation
    pub fn has_data(&self) -> bool {
        self.networks.values().any(|n| !n.state.history.is_empty())
    }
}

/// Shared, dependency-injected engine state
#[derive(Debug)]
pub struct AggregateState {
    capacity: usize,
    networks: DashMap<ChainId, NetworkSlot>,
    prices: DashMap<TokenSymbol, TokenSlot>,
    hub: SliceHub,

    /// Stats
    update_count: AtomicU64,
    last_update: RwLock<Instant>,
}

impl AggregateState {
    pub fn new(
        chains: impl IntoIterator<Item = ChainId>,
        tokens: impl IntoIterator<Item = TokenSymbol>,
        capacity: usize,
    ) -> Self {
        let networks = DashMap::new();
        for chain in chains {
            networks.insert(
                chain,
                NetworkSlot {
                    state: Arc::new(NetworkState::new(capacity)),
                    status: ConnectionStatus::Disconnected,
                    version: 0,
                },
            );
        }

        let prices = DashMap::new();
        for token in tokens {
            prices.insert(
                token,
                TokenSlot {
                    price: TokenPrice::default(),
                    version: 0,
                },
            );
        }

        Self {
            capacity,
            networks,
            prices,
            hub: SliceHub::new(),
            update_count: AtomicU64::new(0),
            last_update: RwLock::new(Instant::now()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.chains(), config.tokens(), config.history_capacity)
    }

    /// Overwrite the current fee of a network without touching its history
    pub fn set_network_fee(&self, chain: ChainId, base_fee: f64, priority_fee: f64) -> bool {
        let version = {
            let Some(mut slot) = self.networks.get_mut(&chain) else {
                return false;
            };
            let state = Arc::make_mut(&mut slot.state);
            state.base_fee = base_fee;
            state.priority_fee = priority_fee;
            state.last_update_ms = now_ms();
            slot.version += 1;
            slot.version
        };

        self.committed(Slice::Network(chain), ChangeKind::Fee, version);
        true
    }

    /// Append to a network's history and adopt the observation's fees as current.
    /// Returns `None` for a network the state does not track.
    pub fn append_observation(&self, chain: ChainId, obs: Observation) -> Option<AppendOutcome> {
        let (outcome, version) = {
            let mut slot = self.networks.get_mut(&chain)?;

            // Checked before `make_mut` so a rejected point never clones a shared snapshot
            if let Some(rejected) = slot.state.history.rejects(&obs) {
                debug!(
                    "Dropping out-of-order {} observation at {} ({:?})",
                    chain,
                    obs.timestamp_ms(),
                    rejected
                );
                return Some(rejected);
            }

            let state = Arc::make_mut(&mut slot.state);
            let outcome = state.history.append(obs);
            state.base_fee = obs.base_fee();
            state.priority_fee = obs.priority_fee();
            state.last_update_ms = now_ms();
            slot.version += 1;
            (outcome, slot.version)
        };

        self.committed(Slice::Network(chain), ChangeKind::Observation, version);
        Some(outcome)
    }

    /// Write a token price.
    ///
    /// Oracle prices replace anything not newer than themselves, so among concurrent
    /// fetches the one with the latest timestamp wins regardless of completion order.
    /// A fallback is only taken while no price has been accepted yet.
    pub fn set_token_price(&self, token: TokenSymbol, price: TokenPrice) -> PriceWrite {
        let version = {
            let Some(mut slot) = self.prices.get_mut(&token) else {
                return PriceWrite::UnknownToken;
            };

            let current = slot.price;
            let accept = match price.origin {
                PriceOrigin::Oracle => {
                    current.origin != PriceOrigin::Oracle
                        || price.last_updated_ms >= current.last_updated_ms
                }
                PriceOrigin::Fallback => current.origin == PriceOrigin::Unset,
                PriceOrigin::Unset => false,
            };
            if !accept {
                return PriceWrite::Superseded;
            }

            slot.price = price;
            slot.version += 1;
            slot.version
        };

        self.committed(Slice::Token(token), ChangeKind::Price, version);
        PriceWrite::Accepted
    }

    /// Record a network's connection status; no notification when unchanged
    pub fn set_connectivity(&self, chain: ChainId, status: ConnectionStatus) -> bool {
        let version = {
            let Some(mut slot) = self.networks.get_mut(&chain) else {
                return false;
            };
            if slot.status == status {
                return true;
            }
            slot.status = status;
            slot.version += 1;
            slot.version
        };

        self.committed(Slice::Network(chain), ChangeKind::Connectivity, version);
        true
    }

    fn committed(&self, slice: Slice, kind: ChangeKind, version: u64) {
        self.update_count.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Instant::now();
        self.hub.publish(StateChange { slice, kind, version });
    }

    /// Shared immutable snapshot of a network's fee state
    pub fn network(&self, chain: ChainId) -> Option<Arc<NetworkState>> {
        self.networks.get(&chain).map(|slot| Arc::clone(&slot.state))
    }

    /// Owned copy of a network's history, oldest first
    pub fn history(&self, chain: ChainId) -> Option<Vec<Observation>> {
        self.networks
            .get(&chain)
            .map(|slot| slot.state.history.iter().copied().collect())
    }

    pub fn token_price(&self, token: TokenSymbol) -> Option<TokenPrice> {
        self.prices.get(&token).map(|slot| slot.price)
    }

    pub fn connectivity(&self, chain: ChainId) -> Option<ConnectionStatus> {
        self.networks.get(&chain).map(|slot| slot.status)
    }

    pub fn version(&self, slice: Slice) -> Option<u64> {
        match slice {
            Slice::Network(chain) => self.networks.get(&chain).map(|s| s.version),
            Slice::Token(token) => self.prices.get(&token).map(|s| s.version),
        }
    }

    /// Candles for a network, recomputed from its current history
    pub fn candles(&self, chain: ChainId, interval_ms: u64) -> CoreResult<Vec<Candle>> {
        let state = self
            .network(chain)
            .ok_or(CoreError::ChainNotConfigured(chain))?;
        aggregate(state.history.iter(), interval_ms)
    }

    /// Subscribe to changes of one slice
    pub fn subscribe(&self, slice: Slice) -> broadcast::Receiver<StateChange> {
        self.hub.subscribe(slice)
    }

    /// Close every subscriber channel
    pub fn close_subscriptions(&self) {
        self.hub.close_all();
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let networks = self
            .networks
            .iter()
            .map(|e| {
                let slot = e.value();
                (
                    *e.key(),
                    NetworkView {
                        state: (*slot.state).clone(),
                        status: slot.status,
                        version: slot.version,
                    },
                )
            })
            .collect();

        let prices = self
            .prices
            .iter()
            .map(|e| (*e.key(), e.value().price))
            .collect();

        StateSnapshot {
            networks,
            prices,
            taken_at_ms: now_ms(),
        }
    }

    pub fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.networks.iter().map(|e| *e.key()).collect();
        chains.sort();
        chains
    }

    pub fn tokens(&self) -> Vec<TokenSymbol> {
        let mut tokens: Vec<TokenSymbol> = self.prices.iter().map(|e| *e.key()).collect();
        tokens.sort();
        tokens
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stats
    pub fn stats(&self) -> StateStats {
        StateStats {
            network_count: self.networks.len(),
            token_count: self.prices.len(),
            update_count: self.update_count.load(Ordering::Relaxed),
            last_update_age: self.last_update.read().elapsed(),
        }
    }
}

/// Statistics about aggregate state
#[derive(Debug, Clone)]
pub struct StateStats {
    pub network_count: usize,
    pub token_count: usize,
    pub update_count: u64,
    pub last_update_age: Duration,
}

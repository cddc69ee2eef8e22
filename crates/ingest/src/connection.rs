//! Per-network head subscriptions
//!
//! Each connected network owns a record holding every task spawned on its behalf:
//! the pump that moves head notifications from the RPC stream into a bounded queue,
//! the ingestion worker draining that queue, and any timers attached by callers.
//! Only `ConnectionManager` creates or releases records.

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gastrack_core::{
    ChainId, ConnectionError, ConnectionResult, ConnectionStatus, EngineConfig, NetworkConfig,
};
use gastrack_rpc::{ChainRpc, HeadStream, HeadSubscription, SubscriptionId};
use gastrack_state::AggregateState;

use crate::ingestor::BlockIngestor;

/// Tasks owned by one connected network
struct ConnectionRecord {
    endpoint: String,
    subscription: SubscriptionId,
    pump: JoinHandle<()>,
    worker: JoinHandle<u64>,
    attached: Vec<JoinHandle<()>>,
}

impl ConnectionRecord {
    /// Abort every task; returns the subscription still to be released on the RPC side
    fn release(self) -> SubscriptionId {
        self.pump.abort();
        self.worker.abort();
        for handle in self.attached {
            handle.abort();
        }
        self.subscription
    }
}

#[derive(Default)]
struct Records {
    live: HashMap<ChainId, ConnectionRecord>,
    /// Bumped by every connect attempt and disconnect; a connect whose epoch moved
    /// while it was subscribing was cancelled. Connectivity is only written while
    /// this lock is held.
    epochs: HashMap<ChainId, u64>,
}

impl Records {
    fn bump(&mut self, chain: ChainId) -> u64 {
        let epoch = self.epochs.entry(chain).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn current(&self, chain: ChainId) -> u64 {
        self.epochs.get(&chain).copied().unwrap_or(0)
    }
}

/// Connection stats
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub connected: usize,
    pub failed: usize,
    pub attached_tasks: usize,
}

/// Owns every network's subscription and the tasks hanging off it
pub struct ConnectionManager {
    rpc: Arc<dyn ChainRpc>,
    state: Arc<AggregateState>,
    networks: HashMap<ChainId, NetworkConfig>,
    fetch_timeout: Duration,
    connect_timeout: Duration,
    queue_depth: usize,
    records: Arc<Mutex<Records>>,
    errors: Arc<DashMap<ChainId, ConnectionError>>,
}

impl ConnectionManager {
    pub fn new(config: &EngineConfig, rpc: Arc<dyn ChainRpc>, state: Arc<AggregateState>) -> Self {
        Self {
            rpc,
            state,
            networks: config.networks.iter().map(|n| (n.chain, n.clone())).collect(),
            fetch_timeout: config.fetch_timeout(),
            connect_timeout: config.connect_timeout(),
            queue_depth: config.ingest_queue_depth.max(1),
            records: Arc::new(Mutex::new(Records::default())),
            errors: Arc::new(DashMap::new()),
        }
    }

    pub fn status(&self, chain: ChainId) -> ConnectionStatus {
        self.state.connectivity(chain).unwrap_or_default()
    }

    /// Reason behind the most recent failure, cleared by a successful connect
    pub fn last_error(&self, chain: ChainId) -> Option<ConnectionError> {
        self.errors.get(&chain).map(|e| e.value().clone())
    }

    /// Endpoint of a live subscription
    pub fn endpoint(&self, chain: ChainId) -> Option<String> {
        self.records.lock().live.get(&chain).map(|r| r.endpoint.clone())
    }

    /// Subscribe to `chain`'s heads at `endpoint` and start ingesting them.
    ///
    /// No-op returning `false` while the network is already connecting or connected;
    /// `true` means a new subscription was established. On failure the status becomes
    /// `Failed` and the reason is returned; nothing retries.
    pub async fn connect(&self, chain: ChainId, endpoint: &str) -> ConnectionResult<bool> {
        let Some(network) = self.networks.get(&chain).cloned() else {
            return Err(ConnectionError::NotConfigured(chain));
        };

        let (epoch, stale) = {
            let mut records = self.records.lock();
            if self.status(chain).is_active() {
                debug!("{} already {}", chain, self.status(chain));
                return Ok(false);
            }
            let stale = records.live.remove(&chain).map(ConnectionRecord::release);
            let epoch = records.bump(chain);
            self.state.set_connectivity(chain, ConnectionStatus::Connecting);
            (epoch, stale)
        };

        if let Some(id) = stale {
            self.rpc.unsubscribe(chain, id).await;
        }

        info!("Connecting {} to {}", chain, endpoint);

        let subscribed = match tokio::time::timeout(self.connect_timeout, self.rpc.subscribe_heads(chain, endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                chain,
                after_ms: self.connect_timeout.as_millis() as u64,
            }),
        };

        let subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                let records = self.records.lock();
                if records.current(chain) != epoch {
                    info!("Connect to {} cancelled", chain);
                    return Err(ConnectionError::Cancelled(chain));
                }
                self.state.set_connectivity(chain, ConnectionStatus::Failed);
                self.errors.insert(chain, e.clone());
                error!("Failed to connect {}: {}", chain, e);
                return Err(e);
            }
        };

        let subscription_id = subscription.id;
        let installed = {
            let mut records = self.records.lock();
            if records.current(chain) == epoch {
                self.install(&mut records, chain, endpoint, &network, epoch, subscription);
                true
            } else {
                false
            }
        };

        if !installed {
            // Only this attempt's subscription; a newer connect may own the network now
            self.rpc.unsubscribe(chain, subscription_id).await;
            info!("Connect to {} cancelled", chain);
            return Err(ConnectionError::Cancelled(chain));
        }

        info!("Connected to {}", chain);
        Ok(true)
    }

    /// Start the pump and worker for a fresh subscription. Caller holds the records lock.
    fn install(
        &self,
        records: &mut Records,
        chain: ChainId,
        endpoint: &str,
        network: &NetworkConfig,
        epoch: u64,
        subscription: HeadSubscription,
    ) {
        self.errors.remove(&chain);
        self.state.set_connectivity(chain, ConnectionStatus::Connected);

        let (tx, rx) = mpsc::channel(self.queue_depth);

        let ingestor = BlockIngestor::new(
            network,
            Arc::clone(&self.rpc),
            Arc::clone(&self.state),
            self.fetch_timeout,
        );
        let worker = tokio::spawn(async move { ingestor.run(rx).await });

        let pump = tokio::spawn(pump_heads(
            chain,
            epoch,
            subscription.id,
            subscription.heads,
            tx,
            Arc::clone(&self.rpc),
            Arc::clone(&self.state),
            Arc::clone(&self.records),
            Arc::clone(&self.errors),
        ));

        records.live.insert(
            chain,
            ConnectionRecord {
                endpoint: endpoint.to_string(),
                subscription: subscription.id,
                pump,
                worker,
                attached: Vec::new(),
            },
        );
    }

    /// Connect using the configured endpoint
    pub async fn connect_configured(&self, chain: ChainId) -> ConnectionResult<bool> {
        let endpoint = self
            .networks
            .get(&chain)
            .map(|n| n.ws_url.clone())
            .ok_or(ConnectionError::NotConfigured(chain))?;
        self.connect(chain, &endpoint).await
    }

    /// Tie a task's lifetime to `chain`'s connection. Returns false, after aborting
    /// the task, when the network has no live connection.
    pub fn attach(&self, chain: ChainId, handle: JoinHandle<()>) -> bool {
        let mut records = self.records.lock();
        match records.live.get_mut(&chain) {
            Some(record) => {
                record.attached.push(handle);
                true
            }
            None => {
                handle.abort();
                false
            }
        }
    }

    /// Tear down `chain`'s subscription and every task attached to it.
    /// Also cancels a connect still in flight.
    pub async fn disconnect(&self, chain: ChainId) {
        let (released, was) = {
            let mut records = self.records.lock();
            records.bump(chain);
            let was = self.status(chain);
            self.state.set_connectivity(chain, ConnectionStatus::Disconnected);
            (records.live.remove(&chain).map(ConnectionRecord::release), was)
        };

        if let Some(id) = released {
            self.rpc.unsubscribe(chain, id).await;
        }

        if released.is_some() || was != ConnectionStatus::Disconnected {
            info!("Disconnected from {}", chain);
        }
    }

    /// Disconnect every network. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let chains = self.state.chains();
        info!("Shutting down {} network connections", chains.len());

        for chain in chains {
            self.disconnect(chain).await;
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        let records = self.records.lock();
        let failed = self
            .state
            .chains()
            .into_iter()
            .filter(|c| self.status(*c) == ConnectionStatus::Failed)
            .count();

        ConnectionStats {
            connected: records.live.len(),
            failed,
            attached_tasks: records.live.values().map(|r| r.attached.len()).sum(),
        }
    }
}

/// Forward head notifications into the ingestion queue.
///
/// A full queue drops the newest height rather than stalling the subscription. When
/// the stream ends on its own the subscription is considered lost.
#[allow(clippy::too_many_arguments)]
async fn pump_heads(
    chain: ChainId,
    epoch: u64,
    subscription: SubscriptionId,
    mut heads: HeadStream,
    tx: mpsc::Sender<u64>,
    rpc: Arc<dyn ChainRpc>,
    state: Arc<AggregateState>,
    records: Arc<Mutex<Records>>,
    errors: Arc<DashMap<ChainId, ConnectionError>>,
) {
    while let Some(height) = heads.next().await {
        match tx.try_send(height) {
            Ok(()) => {}
            Err(TrySendError::Full(height)) => {
                warn!("{} ingestion queue full, dropping block {}", chain, height);
            }
            Err(TrySendError::Closed(_)) => return,
        }
    }

    let lost = ConnectionError::Lost {
        chain,
        reason: "head stream closed".into(),
    };

    {
        let mut records = records.lock();
        if records.current(chain) != epoch {
            return;
        }
        // Queued heads still drain; the worker exits once this sender drops
        if let Some(record) = records.live.remove(&chain) {
            for handle in record.attached {
                handle.abort();
            }
        }
        state.set_connectivity(chain, ConnectionStatus::Failed);
        errors.insert(chain, lost.clone());
    }

    error!("{}", lost);
    rpc.unsubscribe(chain, subscription).await;
}

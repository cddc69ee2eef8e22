//! Block head ingestion
//!
//! Turns a head notification into an `Observation` on that network's history.
//! This is the only path that writes a network's fee history.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gastrack_core::{ChainId, FetchError, FetchResult, NetworkConfig, Observation};
use gastrack_rpc::{BlockHeader, ChainRpc};
use gastrack_state::{AggregateState, AppendOutcome};

/// Per-network ingestion worker
pub struct BlockIngestor {
    chain: ChainId,
    priority_fee_gwei: f64,
    rpc: Arc<dyn ChainRpc>,
    state: Arc<AggregateState>,
    fetch_timeout: Duration,
}

impl BlockIngestor {
    pub fn new(
        config: &NetworkConfig,
        rpc: Arc<dyn ChainRpc>,
        state: Arc<AggregateState>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            chain: config.chain,
            priority_fee_gwei: config.priority_fee_gwei,
            rpc,
            state,
            fetch_timeout,
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    async fn fetch_header(&self, height: u64) -> FetchResult<BlockHeader> {
        match tokio::time::timeout(self.fetch_timeout, self.rpc.get_block_header(self.chain, height)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                what: format!("{} block {} header", self.chain, height),
                after_ms: self.fetch_timeout.as_millis() as u64,
            }),
        }
    }

    /// Ingest one notified height. A failed fetch is logged and skipped.
    pub async fn ingest(&self, height: u64) -> Option<Observation> {
        let header = match self.fetch_header(height).await {
            Ok(header) => header,
            Err(e) => {
                warn!("Skipping {} block {}: {}", self.chain, height, e);
                return None;
            }
        };

        let obs = Observation::new(header.timestamp_ms(), header.base_fee_gwei(), self.priority_fee_gwei);

        match self.state.append_observation(self.chain, obs)? {
            AppendOutcome::RejectedOutOfOrder { .. } => None,
            outcome => {
                debug!(
                    "{} block {}: base {:.3} gwei, total {:.3} gwei{}",
                    self.chain,
                    height,
                    obs.base_fee(),
                    obs.total_fee(),
                    if matches!(outcome, AppendOutcome::Evicted(_)) { " (evicted oldest)" } else { "" }
                );
                Some(obs)
            }
        }
    }

    /// Consume heads in arrival order until the sender side closes
    pub async fn run(&self, mut heads: mpsc::Receiver<u64>) -> u64 {
        let mut ingested = 0;

        while let Some(height) = heads.recv().await {
            if self.ingest(height).await.is_some() {
                ingested += 1;
            }
        }

        debug!("{} ingestion stopped after {} observations", self.chain, ingested);
        ingested
    }
}

//! Chain access capability used by the engine

use alloy_primitives::{Address, Bytes, LogData, B256};
use async_trait::async_trait;
use futures::stream::BoxStream;

use gastrack_core::{ChainId, ConnectionResult, FetchResult};

const WEI_PER_GWEI: f64 = 1e9;

/// Stream of new block heights, in arrival order
pub type HeadStream = BoxStream<'static, u64>;

/// Stream of raw event logs matching one filter
pub type LogStream = BoxStream<'static, LogData>;

/// Issued per `subscribe_heads` call, increasing; never reused by one `ChainRpc`
pub type SubscriptionId = u64;

/// A head subscription and the id that releases it
pub struct HeadSubscription {
    pub id: SubscriptionId,
    pub heads: HeadStream,
}

/// The parts of a block header the engine reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
    /// Wei; absent on pre-London blocks and some L2s
    pub base_fee_per_gas: Option<u128>,
}

impl BlockHeader {
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp.saturating_mul(1000)
    }

    /// Base fee in gwei, 0 when the header carries none
    pub fn base_fee_gwei(&self) -> f64 {
        self.base_fee_per_gas
            .map(|wei| wei as f64 / WEI_PER_GWEI)
            .unwrap_or(0.0)
    }
}

/// Opaque RPC layer: head and log subscriptions, header reads and contract calls.
///
/// A network has at most one open transport. When two `subscribe_heads` calls for
/// the same network overlap, the one issued later owns the transport.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Open a transport to `endpoint` and subscribe to new heads on it
    async fn subscribe_heads(&self, chain: ChainId, endpoint: &str) -> ConnectionResult<HeadSubscription>;

    /// Release the transport opened by subscription `id`. No-op when `id` no longer
    /// owns `chain`'s transport.
    async fn unsubscribe(&self, chain: ChainId, id: SubscriptionId);

    /// Logs emitted by `address` whose first topic is `topic0`, over the open transport
    async fn subscribe_logs(&self, chain: ChainId, address: Address, topic0: B256) -> FetchResult<LogStream>;

    async fn get_block_header(&self, chain: ChainId, height: u64) -> FetchResult<BlockHeader>;

    /// `eth_call` against the latest block; `calldata` is selector plus encoded args
    async fn call_contract(&self, chain: ChainId, address: Address, calldata: Bytes) -> FetchResult<Bytes>;
}

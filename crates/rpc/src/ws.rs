//! WebSocket RPC client backed by alloy
//!
//! One pubsub provider per network. The provider is created by `subscribe_heads` and
//! reused for header reads, log subscriptions and contract calls on that network until
//! the subscription that opened it is released.

use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::eth::{Filter, TransactionRequest};
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{future, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use gastrack_core::{ChainId, ConnectionError, ConnectionResult, FetchError, FetchResult};

use crate::client::{BlockHeader, ChainRpc, HeadSubscription, LogStream, SubscriptionId};

struct Transport {
    id: SubscriptionId,
    provider: RootProvider<PubSubFrontend>,
}

/// Live RPC access over WebSocket endpoints
#[derive(Default)]
pub struct WsChainRpc {
    transports: DashMap<ChainId, Transport>,
    next_id: AtomicU64,
}

impl WsChainRpc {
    pub fn new() -> Self {
        Self::default()
    }

    fn provider(&self, chain: ChainId) -> Option<RootProvider<PubSubFrontend>> {
        self.transports.get(&chain).map(|t| t.provider.clone())
    }

    pub fn is_open(&self, chain: ChainId) -> bool {
        self.transports.contains_key(&chain)
    }
}

#[async_trait]
impl ChainRpc for WsChainRpc {
    async fn subscribe_heads(&self, chain: ChainId, endpoint: &str) -> ConnectionResult<HeadSubscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Connecting to {} at {} (subscription {})", chain, endpoint, id);

        let subscribe_failed = |reason: String| ConnectionError::SubscribeFailed {
            chain,
            endpoint: endpoint.to_string(),
            reason,
        };

        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(endpoint))
            .await
            .map_err(|e| subscribe_failed(e.to_string()))?;

        let remote_id = provider
            .get_chain_id()
            .await
            .map_err(|e| subscribe_failed(e.to_string()))?;
        if remote_id != chain.chain_id() {
            return Err(subscribe_failed(format!(
                "endpoint serves chain id {}, expected {}",
                remote_id,
                chain.chain_id()
            )));
        }

        let subscription = provider
            .subscribe_blocks()
            .await
            .map_err(|e| subscribe_failed(e.to_string()))?;

        // Pending headers carry no number; skip them
        let heads = subscription
            .into_stream()
            .filter_map(|block| future::ready(block.header.number))
            .boxed();

        match self.transports.entry(chain) {
            Entry::Occupied(existing) if existing.get().id > id => {
                debug!("{} subscription {} superseded by {}", chain, id, existing.get().id);
            }
            Entry::Occupied(mut existing) => {
                existing.insert(Transport { id, provider });
            }
            Entry::Vacant(slot) => {
                slot.insert(Transport { id, provider });
            }
        }
        info!("Subscribed to {} heads", chain);

        Ok(HeadSubscription { id, heads })
    }

    async fn unsubscribe(&self, chain: ChainId, id: SubscriptionId) {
        if self.transports.remove_if(&chain, |_, t| t.id == id).is_some() {
            debug!("Released {} transport (subscription {})", chain, id);
        }
    }

    async fn subscribe_logs(&self, chain: ChainId, address: Address, topic0: B256) -> FetchResult<LogStream> {
        let provider = self.provider(chain).ok_or(FetchError::NotConnected(chain))?;

        let filter = Filter::new().address(address).event_signature(topic0);
        let subscription = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| FetchError::LogSubscription {
                chain,
                address,
                reason: e.to_string(),
            })?;

        debug!("Subscribed to {} logs on {}", address, chain);
        Ok(subscription.into_stream().map(|log| log.inner.data).boxed())
    }

    async fn get_block_header(&self, chain: ChainId, height: u64) -> FetchResult<BlockHeader> {
        let provider = self.provider(chain).ok_or(FetchError::NotConnected(chain))?;

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Number(height), false)
            .await
            .map_err(|e| FetchError::BlockHeader {
                chain,
                height,
                reason: e.to_string(),
            })?
            .ok_or(FetchError::MissingBlock { chain, height })?;

        Ok(BlockHeader {
            number: block.header.number.unwrap_or(height),
            timestamp: block.header.timestamp,
            base_fee_per_gas: block.header.base_fee_per_gas,
        })
    }

    async fn call_contract(&self, chain: ChainId, address: Address, calldata: Bytes) -> FetchResult<Bytes> {
        let provider = self.provider(chain).ok_or(FetchError::NotConnected(chain))?;

        let tx = TransactionRequest::default()
            .with_to(address)
            .with_input(calldata);

        provider
            .call(&tx)
            .await
            .map_err(|e| FetchError::ContractCall {
                chain,
                address,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_require_open_transport() {
        let rpc = WsChainRpc::new();
        assert!(!rpc.is_open(ChainId::Ethereum));

        let err = rpc.get_block_header(ChainId::Ethereum, 1).await.unwrap_err();
        assert!(matches!(err, FetchError::NotConnected(ChainId::Ethereum)));

        let err = rpc
            .call_contract(ChainId::Polygon, Address::ZERO, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotConnected(ChainId::Polygon)));

        let err = rpc
            .subscribe_logs(ChainId::Ethereum, Address::ZERO, B256::ZERO)
            .await
            .err();
        assert!(matches!(err, Some(FetchError::NotConnected(ChainId::Ethereum))));

        // No-op when nothing is open
        rpc.unsubscribe(ChainId::Arbitrum, 1).await;
    }
}

//! In-memory `ChainRpc` for tests

use alloy_primitives::{Address, Bytes, LogData, B256, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use gastrack_core::{ChainId, ConnectionError, ConnectionResult, FetchError, FetchResult};

use crate::client::{BlockHeader, ChainRpc, HeadSubscription, LogStream, SubscriptionId};

struct HeadSink {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<u64>,
}

/// Scripted chain: tests push heads and logs and register headers and call replies
#[derive(Default)]
pub struct MockChainRpc {
    heads: DashMap<ChainId, HeadSink>,
    logs: DashMap<(ChainId, Address, B256), mpsc::UnboundedSender<LogData>>,
    next_id: AtomicU64,
    headers: DashMap<(ChainId, u64), BlockHeader>,
    header_errors: DashMap<(ChainId, u64), String>,
    replies: DashMap<(Address, [u8; 4]), Result<Bytes, String>>,
    subscribe_errors: DashMap<ChainId, String>,
    subscribe_delay: Mutex<Option<Duration>>,
    header_delay: Mutex<Option<Duration>>,
    call_delay: Mutex<Option<Duration>>,
    subscribe_count: AtomicUsize,
    call_count: AtomicUsize,
}

impl MockChainRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a head notification; false when nobody is subscribed
    pub fn push_head(&self, chain: ChainId, height: u64) -> bool {
        self.heads
            .get(&chain)
            .map(|sink| sink.tx.send(height).is_ok())
            .unwrap_or(false)
    }

    /// Deliver a log to the subscriber of `address`/`topic0`; false when there is none
    pub fn push_log(&self, chain: ChainId, address: Address, log: LogData) -> bool {
        let Some(topic0) = log.topics().first().copied() else {
            return false;
        };
        self.logs
            .get(&(chain, address, topic0))
            .map(|tx| tx.send(log).is_ok())
            .unwrap_or(false)
    }

    /// End the head and log streams as if the socket dropped
    pub fn drop_stream(&self, chain: ChainId) {
        self.heads.remove(&chain);
        self.logs.retain(|(c, _, _), _| *c != chain);
    }

    pub fn is_subscribed(&self, chain: ChainId) -> bool {
        self.heads.contains_key(&chain)
    }

    /// Id of the subscription owning `chain`'s transport
    pub fn subscription_id(&self, chain: ChainId) -> Option<SubscriptionId> {
        self.heads.get(&chain).map(|sink| sink.id)
    }

    pub fn has_log_subscriber(&self, chain: ChainId, address: Address) -> bool {
        self.logs
            .iter()
            .any(|entry| entry.key().0 == chain && entry.key().1 == address && !entry.value().is_closed())
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn set_header(&self, chain: ChainId, header: BlockHeader) {
        self.headers.insert((chain, header.number), header);
    }

    pub fn fail_header(&self, chain: ChainId, height: u64, reason: &str) {
        self.header_errors.insert((chain, height), reason.to_string());
    }

    pub fn fail_subscribe(&self, chain: ChainId, reason: &str) {
        self.subscribe_errors.insert(chain, reason.to_string());
    }

    pub fn clear_subscribe_failure(&self, chain: ChainId) {
        self.subscribe_errors.remove(&chain);
    }

    /// Reply for calls to `address` whose calldata starts with `selector`
    pub fn set_reply(&self, address: Address, selector: [u8; 4], reply: Result<Bytes, String>) {
        self.replies.insert((address, selector), reply);
    }

    pub fn set_subscribe_delay(&self, delay: Option<Duration>) {
        *self.subscribe_delay.lock() = delay;
    }

    pub fn set_header_delay(&self, delay: Option<Duration>) {
        *self.header_delay.lock() = delay;
    }

    pub fn set_call_delay(&self, delay: Option<Duration>) {
        *self.call_delay.lock() = delay;
    }
}

async fn pause(delay: &Mutex<Option<Duration>>) {
    let delay = *delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn subscribe_heads(&self, chain: ChainId, endpoint: &str) -> ConnectionResult<HeadSubscription> {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        pause(&self.subscribe_delay).await;

        if let Some(reason) = self.subscribe_errors.get(&chain) {
            return Err(ConnectionError::SubscribeFailed {
                chain,
                endpoint: endpoint.to_string(),
                reason: reason.value().clone(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let superseded = self
            .heads
            .get(&chain)
            .map(|sink| sink.id > id)
            .unwrap_or(false);
        if !superseded {
            self.heads.insert(chain, HeadSink { id, tx });
        }

        Ok(HeadSubscription {
            id,
            heads: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn unsubscribe(&self, chain: ChainId, id: SubscriptionId) {
        if self.heads.remove_if(&chain, |_, sink| sink.id == id).is_some() {
            self.logs.retain(|(c, _, _), _| *c != chain);
        }
    }

    async fn subscribe_logs(&self, chain: ChainId, address: Address, topic0: B256) -> FetchResult<LogStream> {
        if !self.is_subscribed(chain) {
            return Err(FetchError::NotConnected(chain));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.logs.insert((chain, address, topic0), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn get_block_header(&self, chain: ChainId, height: u64) -> FetchResult<BlockHeader> {
        pause(&self.header_delay).await;

        if let Some(reason) = self.header_errors.get(&(chain, height)) {
            return Err(FetchError::BlockHeader {
                chain,
                height,
                reason: reason.value().clone(),
            });
        }

        self.headers
            .get(&(chain, height))
            .map(|h| *h.value())
            .ok_or(FetchError::MissingBlock { chain, height })
    }

    async fn call_contract(&self, chain: ChainId, address: Address, calldata: Bytes) -> FetchResult<Bytes> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        pause(&self.call_delay).await;

        let selector: [u8; 4] = calldata
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| FetchError::Decode("calldata shorter than a selector".into()))?;

        match self.replies.get(&(address, selector)).map(|r| r.value().clone()) {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(reason)) => Err(FetchError::ContractCall { chain, address, reason }),
            None => Err(FetchError::ContractCall {
                chain,
                address,
                reason: "execution reverted".into(),
            }),
        }
    }
}

/// ABI-encode a static return tuple, one 32-byte word per value
pub fn abi_words(words: &[U256]) -> Bytes {
    let mut out = Vec::with_capacity(words.len() * 32);
    for word in words {
        out.extend_from_slice(&word.to_be_bytes::<32>());
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_heads_flow_until_dropped() {
        let rpc = MockChainRpc::new();
        let mut heads = rpc.subscribe_heads(ChainId::Ethereum, "mock://eth").await.unwrap().heads;

        assert!(rpc.push_head(ChainId::Ethereum, 7));
        assert_eq!(heads.next().await, Some(7));

        rpc.drop_stream(ChainId::Ethereum);
        assert_eq!(heads.next().await, None);
        assert!(!rpc.push_head(ChainId::Ethereum, 8));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let rpc = MockChainRpc::new();
        rpc.fail_subscribe(ChainId::Polygon, "refused");
        assert!(rpc.subscribe_heads(ChainId::Polygon, "mock://poly").await.is_err());

        assert!(matches!(
            rpc.get_block_header(ChainId::Polygon, 1).await,
            Err(FetchError::MissingBlock { height: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_reply_by_selector() {
        let rpc = MockChainRpc::new();
        let addr = Address::repeat_byte(9);
        rpc.set_reply(addr, [1, 2, 3, 4], Ok(abi_words(&[U256::from(5u64)])));

        let reply = rpc
            .call_contract(ChainId::Ethereum, addr, Bytes::from(vec![1, 2, 3, 4, 0xff]))
            .await
            .unwrap();
        assert_eq!(reply.len(), 32);
        assert_eq!(reply[31], 5);

        assert!(rpc
            .call_contract(ChainId::Ethereum, addr, Bytes::from(vec![9, 9, 9, 9]))
            .await
            .is_err());
        assert_eq!(rpc.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscription_does_not_replace_newer() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.set_subscribe_delay(Some(Duration::from_secs(5)));

        let slow = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move { rpc.subscribe_heads(ChainId::Ethereum, "mock://a").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        rpc.set_subscribe_delay(None);
        let fast = rpc.subscribe_heads(ChainId::Ethereum, "mock://b").await.unwrap();
        let slow = slow.await.unwrap().unwrap();
        assert!(slow.id < fast.id);
        assert_eq!(rpc.subscription_id(ChainId::Ethereum), Some(fast.id));

        // Releasing the stale id leaves the newer transport alone
        rpc.unsubscribe(ChainId::Ethereum, slow.id).await;
        assert_eq!(rpc.subscription_id(ChainId::Ethereum), Some(fast.id));

        rpc.unsubscribe(ChainId::Ethereum, fast.id).await;
        assert!(!rpc.is_subscribed(ChainId::Ethereum));
    }

    #[tokio::test]
    async fn test_logs_follow_the_transport() {
        let rpc = MockChainRpc::new();
        let pool = Address::repeat_byte(7);
        let topic = B256::repeat_byte(1);

        assert!(rpc.subscribe_logs(ChainId::Ethereum, pool, topic).await.is_err());

        let sub = rpc.subscribe_heads(ChainId::Ethereum, "mock://eth").await.unwrap();
        let mut logs = rpc.subscribe_logs(ChainId::Ethereum, pool, topic).await.unwrap();

        let log = LogData::new_unchecked(vec![topic], Bytes::from(vec![0xab]));
        assert!(rpc.push_log(ChainId::Ethereum, pool, log.clone()));
        assert_eq!(logs.next().await, Some(log));

        rpc.unsubscribe(ChainId::Ethereum, sub.id).await;
        assert_eq!(logs.next().await, None);
        assert!(!rpc.has_log_subscriber(ChainId::Ethereum, pool));
    }
}

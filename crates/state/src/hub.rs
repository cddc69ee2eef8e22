//! Per-slice change notifications
//!
//! Each slice (one network or one token) has its own broadcast channel, so a
//! subscriber watching ETH price never wakes up for a Polygon fee update.

use dashmap::DashMap;
use tokio::sync::broadcast;

use gastrack_core::{ChainId, TokenSymbol};

const CHANNEL_CAPACITY: usize = 64;

/// Independently observable part of the aggregate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    Network(ChainId),
    Token(TokenSymbol),
}

/// What changed inside a slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Fee,
    Observation,
    Connectivity,
    Price,
}

/// Notification sent after a slice mutation has been committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub slice: Slice,
    pub kind: ChangeKind,
    /// Slice version after the change
    pub version: u64,
}

/// Broadcast hub keyed by slice. Channels are created lazily on first subscribe.
#[derive(Debug, Default)]
pub struct SliceHub {
    channels: DashMap<Slice, broadcast::Sender<StateChange>>,
}

impl SliceHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, slice: Slice) -> broadcast::Receiver<StateChange> {
        self.channels
            .entry(slice)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Returns the receiver count; 0 when nobody watches the slice
    pub fn publish(&self, change: StateChange) -> usize {
        match self.channels.get(&change.slice) {
            Some(tx) => tx.send(change).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop every channel, closing all receivers
    pub fn close_all(&self) {
        self.channels.clear();
    }
}

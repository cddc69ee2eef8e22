//! Bounded, time-ordered fee history for one network

use serde::Serialize;
use std::collections::VecDeque;

use gastrack_core::Observation;

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppendOutcome {
    Appended,
    /// Appended after dropping the oldest entry
    Evicted(Observation),
    /// Older than the newest stored observation; not stored
    RejectedOutOfOrder { last_ms: u64 },
}

impl AppendOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, AppendOutcome::RejectedOutOfOrder { .. })
    }
}

/// FIFO ring of observations, oldest first.
///
/// Timestamps never decrease from front to back: an observation older than the tail is
/// refused rather than inserted out of place. Equal timestamps are accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesStore {
    capacity: usize,
    points: VecDeque<Observation>,
}

impl TimeSeriesStore {
    /// `capacity` is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// `RejectedOutOfOrder` when `obs` is older than the newest stored point.
    /// Equal timestamps are accepted.
    pub fn rejects(&self, obs: &Observation) -> Option<AppendOutcome> {
        self.points
            .back()
            .filter(|last| obs.timestamp_ms() < last.timestamp_ms())
            .map(|last| AppendOutcome::RejectedOutOfOrder {
                last_ms: last.timestamp_ms(),
            })
    }

    pub fn append(&mut self, obs: Observation) -> AppendOutcome {
        if let Some(rejected) = self.rejects(&obs) {
            return rejected;
        }

        let evicted = if self.points.len() >= self.capacity {
            self.points.pop_front()
        } else {
            None
        };
        self.points.push_back(obs);

        match evicted {
            Some(old) => AppendOutcome::Evicted(old),
            None => AppendOutcome::Appended,
        }
    }

    /// Owned copy of the full history, oldest first
    pub fn snapshot(&self) -> VecDeque<Observation> {
        self.points.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.points.iter()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obs(ts: u64) -> Observation {
        Observation::new(ts, ts as f64, 1.0)
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut store = TimeSeriesStore::new(96);
        for i in 0..96 {
            assert_eq!(store.append(obs(i * 1_000)), AppendOutcome::Appended);
        }

        let outcome = store.append(obs(96_000));
        assert_eq!(outcome, AppendOutcome::Evicted(obs(0)));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 96);
        assert_eq!(snapshot.front().unwrap().timestamp_ms(), 1_000);
        assert_eq!(snapshot.back().unwrap().timestamp_ms(), 96_000);
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut store = TimeSeriesStore::new(4);
        store.append(obs(5_000));
        assert_eq!(
            store.append(obs(4_000)),
            AppendOutcome::RejectedOutOfOrder { last_ms: 5_000 }
        );
        assert_eq!(store.len(), 1);

        // Same-second blocks are common on fast chains
        assert!(store.append(obs(5_000)).is_stored());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut store = TimeSeriesStore::new(2);
        store.append(obs(1));
        let snapshot = store.snapshot();
        store.append(obs(2));
        store.append(obs(3));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].timestamp_ms(), 1);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut store = TimeSeriesStore::new(0);
        store.append(obs(1));
        store.append(obs(2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.last().unwrap().timestamp_ms(), 2);
    }

    proptest! {
        #[test]
        fn prop_bounded_and_ordered(
            capacity in 1usize..128,
            timestamps in prop::collection::vec(0u64..1_000_000, 0..400),
        ) {
            let mut store = TimeSeriesStore::new(capacity);
            for ts in timestamps {
                store.append(obs(ts));
                prop_assert!(store.len() <= capacity);
            }
            let points: Vec<_> = store.iter().collect();
            prop_assert!(points.windows(2).all(|w| w[0].timestamp_ms() <= w[1].timestamp_ms()));
            prop_assert!(points.iter().all(|o| o.total_fee() == o.base_fee() + o.priority_fee()));
        }
    }
}

//! Bounded, time-ascending candle series
//!
//! The store only ever appends, replaces its last element, or drops from the
//! front. Existing entries are never reordered, so the ascending-time invariant
//! holds by construction once a snapshot has been validated.

use std::collections::VecDeque;

use itertools::Itertools;
use tracing::warn;

use crate::error::StoreError;
use crate::types::Candle;

/// What an accepted update did to the series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new bar was pushed (possibly evicting the oldest)
    Appended,
    /// The in-progress bar was revised in place
    Revised,
    /// Revision arrived before any bar existed; nothing changed
    Ignored,
}

/// Ring buffer holding the most recent `limit` candles for one subscription
#[derive(Debug, Clone)]
pub struct SeriesStore {
    candles: VecDeque<Candle>,
    limit: usize,
}

impl SeriesStore {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            candles: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Replace the whole series with a snapshot
    ///
    /// The snapshot may arrive unsorted; it is rejected only if two candles
    /// share a timestamp. Only the newest `limit` candles are kept.
    pub fn replace_all(&mut self, mut candles: Vec<Candle>) -> Result<(), StoreError> {
        candles.sort_by_key(|candle| candle.time);

        if let Some((duplicate, _)) = candles
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.time == b.time)
        {
            return Err(StoreError::InvalidSnapshot(format!(
                "duplicate candle time {}",
                duplicate.time
            )));
        }

        let excess = candles.len().saturating_sub(self.limit);
        self.candles = candles.into_iter().skip(excess).collect();
        Ok(())
    }

    /// Apply a single-candle update from the stream
    pub fn apply_update(
        &mut self,
        candle: Candle,
        is_new_bar: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        if is_new_bar {
            if let Some(last) = self.candles.back() {
                if candle.time <= last.time {
                    return Err(StoreError::OrderingViolation {
                        last: last.time,
                        received: candle.time,
                    });
                }
            }
            if self.candles.len() >= self.limit {
                self.candles.pop_front();
            }
            self.candles.push_back(candle);
            return Ok(UpdateOutcome::Appended);
        }

        let len = self.candles.len();
        if len == 0 {
            warn!(time = candle.time, "in-progress bar revision received with empty series, ignoring");
            return Ok(UpdateOutcome::Ignored);
        }

        if len >= 2 {
            let previous = &self.candles[len - 2];
            if candle.time <= previous.time {
                return Err(StoreError::OrderingViolation {
                    last: previous.time,
                    received: candle.time,
                });
            }
        }

        if let Some(last) = self.candles.back_mut() {
            *last = candle;
        }
        Ok(UpdateOutcome::Revised)
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// Get last N candles as references
    pub fn last_n(&self, n: usize) -> Vec<&Candle> {
        let start = self.candles.len().saturating_sub(n);
        self.candles.range(start..).collect()
    }

    /// Owned copy of the series for renderers
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64, close: f64) -> Candle {
        Candle::new(time, close, close, close, close, 1.0)
    }

    fn times(store: &SeriesStore) -> Vec<i64> {
        store.iter().map(|c| c.time).collect()
    }

    #[test]
    fn test_replace_all_sorts_and_truncates() {
        let mut store = SeriesStore::new(3);
        store
            .replace_all(vec![candle(30, 3.0), candle(10, 1.0), candle(40, 4.0), candle(20, 2.0)])
            .unwrap();

        assert_eq!(times(&store), vec![20, 30, 40]);
    }

    #[test]
    fn test_replace_all_rejects_duplicates_and_keeps_previous() {
        let mut store = SeriesStore::new(10);
        store.replace_all(vec![candle(1, 1.0)]).unwrap();

        let result = store.replace_all(vec![candle(5, 1.0), candle(2, 1.0), candle(5, 2.0)]);
        assert!(matches!(result, Err(StoreError::InvalidSnapshot(_))));
        assert_eq!(times(&store), vec![1]);
    }

    #[test]
    fn test_new_bars_never_exceed_limit() {
        let mut store = SeriesStore::new(5);

        for i in 0..50 {
            store.apply_update(candle(i * 60, i as f64), true).unwrap();
            assert!(store.len() <= 5);
            let t = times(&store);
            assert!(t.windows(2).all(|w| w[0] < w[1]));
        }

        assert_eq!(times(&store), vec![2700, 2760, 2820, 2880, 2940]);
    }

    #[test]
    fn test_out_of_order_new_bar_is_rejected() {
        let mut store = SeriesStore::new(10);
        store.replace_all(vec![candle(50, 1.0), candle(100, 2.0)]).unwrap();
        let before = store.snapshot();

        let result = store.apply_update(candle(90, 9.0), true);
        assert_eq!(
            result,
            Err(StoreError::OrderingViolation {
                last: 100,
                received: 90
            })
        );
        assert_eq!(store.snapshot(), before);

        // equal timestamps are not new bars either
        assert!(store.apply_update(candle(100, 9.0), true).is_err());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_revision_replaces_last_in_place() {
        let mut store = SeriesStore::new(10);
        store.replace_all(vec![candle(400, 1.0), candle(500, 2.0)]).unwrap();

        let outcome = store.apply_update(candle(500, 7.5), false).unwrap();
        assert_eq!(outcome, UpdateOutcome::Revised);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last().map(|c| c.close), Some(7.5));
        assert_eq!(store.last().map(|c| c.time), Some(500));
    }

    #[test]
    fn test_revision_on_empty_store_is_noop() {
        let mut store = SeriesStore::new(10);
        let outcome = store.apply_update(candle(500, 7.5), false).unwrap();
        assert_eq!(outcome, UpdateOutcome::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn test_revision_cannot_move_behind_previous_bar() {
        let mut store = SeriesStore::new(10);
        store.replace_all(vec![candle(400, 1.0), candle(500, 2.0)]).unwrap();

        assert!(store.apply_update(candle(400, 3.0), false).is_err());
        assert_eq!(times(&store), vec![400, 500]);
        assert_eq!(store.last().map(|c| c.close), Some(2.0));
    }

    #[test]
    fn test_last_n() {
        let mut store = SeriesStore::new(10);
        store
            .replace_all((1..=4).map(|i| candle(i, i as f64)).collect())
            .unwrap();

        let last: Vec<i64> = store.last_n(2).iter().map(|c| c.time).collect();
        assert_eq!(last, vec![3, 4]);
        assert_eq!(store.last_n(10).len(), 4);
    }
}

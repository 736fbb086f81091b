//! Shared series state with generation-guarded writers
//!
//! The controller owns one [`SyncShared`] for its lifetime. Each activation
//! bumps the generation and hands the new transport a [`SeriesWriter`] tagged
//! with it; every write re-checks the tag under the lock, so a transport that
//! has been replaced can never touch the store again.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::series::{SeriesStore, UpdateOutcome};
use crate::types::{Candle, ConnectionState, SubscriptionKey};

/// Connection status snapshot for observers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub connection_state: ConnectionState,
    pub last_error: Option<String>,
}

/// Result of a write attempted through a [`SeriesWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Rejected by the store; logged and dropped
    Rejected(StoreError),
    /// The writer belongs to a superseded activation; nothing was written
    Stale,
}

impl WriteOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, WriteOutcome::Stale)
    }
}

#[derive(Debug)]
struct SyncInner {
    generation: u64,
    key: Option<SubscriptionKey>,
    series: SeriesStore,
    status: SyncStatus,
}

#[derive(Debug)]
pub(crate) struct SyncShared {
    inner: RwLock<SyncInner>,
    revision: watch::Sender<u64>,
}

impl SyncShared {
    pub(crate) fn new() -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            inner: RwLock::new(SyncInner {
                generation: 0,
                key: None,
                series: SeriesStore::new(1),
                status: SyncStatus::default(),
            }),
            revision,
        })
    }

    /// Start a new generation for `key`, resetting the series, and return its writer
    pub(crate) fn rebind(self: &Arc<Self>, key: SubscriptionKey) -> SeriesWriter {
        let generation = {
            let mut inner = self.inner.write();
            inner.generation += 1;
            inner.series = SeriesStore::new(key.limit);
            inner.key = Some(key);
            inner.status = SyncStatus {
                connection_state: ConnectionState::Connecting,
                last_error: None,
            };
            inner.generation
        };
        self.bump_revision();

        SeriesWriter {
            shared: Arc::clone(self),
            generation,
        }
    }

    /// Invalidate every outstanding writer and mark the series disconnected
    ///
    /// Candles and key stay readable so renderers keep showing stale data.
    pub(crate) fn detach(&self) {
        {
            let mut inner = self.inner.write();
            inner.generation += 1;
            inner.status.connection_state = ConnectionState::Disconnected;
        }
        self.bump_revision();
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Read-only handle to the synchronised series
#[derive(Debug, Clone)]
pub struct SeriesReader {
    shared: Arc<SyncShared>,
}

impl SeriesReader {
    pub(crate) fn new(shared: Arc<SyncShared>) -> Self {
        Self { shared }
    }

    pub fn snapshot(&self) -> Vec<Candle> {
        self.shared.inner.read().series.snapshot()
    }

    /// Newest `n` candles, oldest first
    pub fn tail(&self, n: usize) -> Vec<Candle> {
        self.shared
            .inner
            .read()
            .series
            .last_n(n)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<Candle> {
        self.shared.inner.read().series.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.inner.read().series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> SyncStatus {
        self.shared.inner.read().status.clone()
    }

    pub fn key(&self) -> Option<SubscriptionKey> {
        self.shared.inner.read().key.clone()
    }

    /// Receiver that changes whenever the series or status changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }
}

/// Write handle owned by exactly one transport instance
#[derive(Debug, Clone)]
pub(crate) struct SeriesWriter {
    shared: Arc<SyncShared>,
    generation: u64,
}

impl SeriesWriter {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn replace_all(&self, candles: Vec<Candle>) -> WriteOutcome {
        let count = candles.len();
        self.write(|inner| match inner.series.replace_all(candles) {
            Ok(()) => {
                debug!(count, "series replaced from snapshot");
                WriteOutcome::Applied
            }
            Err(error) => {
                warn!(%error, "dropping snapshot");
                WriteOutcome::Rejected(error)
            }
        })
    }

    pub(crate) fn apply_update(&self, candle: Candle, is_new_bar: bool) -> WriteOutcome {
        self.write(|inner| match inner.series.apply_update(candle, is_new_bar) {
            Ok(UpdateOutcome::Ignored) => {
                debug!("revision ignored, series empty");
                WriteOutcome::Applied
            }
            Ok(_) => WriteOutcome::Applied,
            Err(error) => {
                warn!(%error, "dropping candle update");
                WriteOutcome::Rejected(error)
            }
        })
    }

    pub(crate) fn set_state(&self, state: ConnectionState) -> WriteOutcome {
        self.write(|inner| {
            inner.status.connection_state = state;
            WriteOutcome::Applied
        })
    }

    /// Mark the transport healthy and clear any previous error
    pub(crate) fn connected(&self) -> WriteOutcome {
        self.write(|inner| {
            inner.status = SyncStatus {
                connection_state: ConnectionState::Connected,
                last_error: None,
            };
            WriteOutcome::Applied
        })
    }

    /// Record an error and move to `state`
    pub(crate) fn fail(&self, state: ConnectionState, error: impl Into<String>) -> WriteOutcome {
        let error = error.into();
        self.write(|inner| {
            inner.status = SyncStatus {
                connection_state: state,
                last_error: Some(error),
            };
            WriteOutcome::Applied
        })
    }

    /// Surface an error without touching the connection state
    pub(crate) fn report_error(&self, error: impl Into<String>) -> WriteOutcome {
        let error = error.into();
        self.write(|inner| {
            inner.status.last_error = Some(error);
            WriteOutcome::Applied
        })
    }

    fn write(&self, apply: impl FnOnce(&mut SyncInner) -> WriteOutcome) -> WriteOutcome {
        let outcome = {
            let mut inner = self.shared.inner.write();
            if inner.generation != self.generation {
                debug!(
                    writer = self.generation,
                    current = inner.generation,
                    "discarding write from superseded transport"
                );
                return WriteOutcome::Stale;
            }
            apply(&mut inner)
        };

        if outcome == WriteOutcome::Applied {
            self.shared.bump_revision();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time: i64) -> Candle {
        Candle::new(time, 1.0, 1.0, 1.0, 1.0, 1.0)
    }

    #[test]
    fn test_rebind_resets_series_and_status() {
        let shared = SyncShared::new();
        let reader = SeriesReader::new(Arc::clone(&shared));

        let writer = shared.rebind(SubscriptionKey::new("BTCUSDT", "1m", 10));
        writer.replace_all(vec![candle(1), candle(2)]);
        writer.fail(ConnectionState::Error, "boom");
        assert_eq!(reader.len(), 2);

        shared.rebind(SubscriptionKey::new("ETHUSDT", "1m", 10));
        assert!(reader.is_empty());
        assert_eq!(
            reader.status(),
            SyncStatus {
                connection_state: ConnectionState::Connecting,
                last_error: None
            }
        );
        assert_eq!(reader.key().map(|k| k.symbol.to_string()), Some("ETHUSDT".to_string()));
    }

    #[test]
    fn test_stale_writer_is_discarded() {
        let shared = SyncShared::new();
        let reader = SeriesReader::new(Arc::clone(&shared));

        let stale = shared.rebind(SubscriptionKey::new("BTCUSDT", "1m", 10));
        let current = shared.rebind(SubscriptionKey::new("BTCUSDT", "5m", 10));
        current.replace_all(vec![candle(100)]);

        assert!(stale.apply_update(candle(200), true).is_stale());
        assert!(stale.replace_all(vec![candle(1)]).is_stale());
        assert!(stale.fail(ConnectionState::Error, "late").is_stale());

        assert_eq!(reader.snapshot(), vec![candle(100)]);
        assert_eq!(reader.status().last_error, None);
    }

    #[test]
    fn test_detach_keeps_data_but_blocks_writer() {
        let shared = SyncShared::new();
        let reader = SeriesReader::new(Arc::clone(&shared));

        let writer = shared.rebind(SubscriptionKey::new("BTCUSDT", "1m", 10));
        writer.replace_all(vec![candle(1)]);
        writer.connected();

        shared.detach();
        assert!(writer.apply_update(candle(2), true).is_stale());
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.status().connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_revision_advances_on_applied_writes() {
        let shared = SyncShared::new();
        let reader = SeriesReader::new(Arc::clone(&shared));
        let revisions = reader.subscribe();

        let writer = shared.rebind(SubscriptionKey::new("BTCUSDT", "1m", 10));
        let after_rebind = *revisions.borrow();
        writer.apply_update(candle(5), true);
        assert!(*revisions.borrow() > after_rebind);

        let after_update = *revisions.borrow();
        // rejected write leaves the revision alone
        writer.apply_update(candle(4), true);
        assert_eq!(*revisions.borrow(), after_update);
    }
}

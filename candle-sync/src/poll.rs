//! Pull transport: periodic full-series refresh
//!
//! Used when the push stream is disabled or the API host cannot hold a
//! websocket. Every tick fetches the whole window and replaces the series, so
//! a failed tick costs nothing but freshness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::shared::{SeriesWriter, WriteOutcome};
use crate::source::CandleSource;
use crate::task::{shutdown_requested, TaskHandle};
use crate::types::{ConnectionState, SubscriptionKey};

/// Period used for intervals missing from the table
pub const FALLBACK_POLL_PERIOD: Duration = Duration::from_secs(10);

const DEFAULT_CADENCE_MS: [(&str, u64); 15] = [
    ("1m", 2_000),
    ("3m", 3_000),
    ("5m", 5_000),
    ("15m", 8_000),
    ("30m", 12_000),
    ("1h", 15_000),
    ("2h", 20_000),
    ("4h", 30_000),
    ("6h", 45_000),
    ("8h", 60_000),
    ("12h", 90_000),
    ("1d", 120_000),
    ("3d", 180_000),
    ("1w", 240_000),
    ("1M", 300_000),
];

/// Poll period per candle interval; shorter intervals refresh faster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCadence {
    periods: HashMap<String, Duration>,
    fallback: Duration,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self {
            periods: DEFAULT_CADENCE_MS
                .iter()
                .map(|(interval, ms)| (interval.to_string(), Duration::from_millis(*ms)))
                .collect(),
            fallback: FALLBACK_POLL_PERIOD,
        }
    }
}

impl PollCadence {
    pub fn set(&mut self, interval: impl Into<String>, period: Duration) {
        self.periods.insert(interval.into(), period);
    }

    /// Apply `interval=millis` overrides, e.g. `"1m=1000,5m=4000"`
    ///
    /// Malformed or zero entries are skipped with a warning.
    pub fn with_overrides(mut self, overrides: &str) -> Self {
        for entry in overrides.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parsed = entry
                .split_once('=')
                .and_then(|(interval, ms)| Some((interval.trim(), ms.trim().parse::<u64>().ok()?)));

            match parsed {
                Some((interval, ms)) if !interval.is_empty() && ms > 0 => {
                    self.set(interval, Duration::from_millis(ms));
                }
                _ => warn!(entry, "ignoring malformed poll cadence override"),
            }
        }
        self
    }

    pub fn period_for(&self, interval: &str) -> Duration {
        self.periods.get(interval).copied().unwrap_or(self.fallback)
    }
}

/// Owns at most one running poll task
#[derive(Debug)]
pub struct PollLoop {
    cadence: PollCadence,
    task: Option<TaskHandle>,
}

impl PollLoop {
    pub fn new(cadence: PollCadence) -> Self {
        Self {
            cadence,
            task: None,
        }
    }

    /// Start polling `key`, stopping any previous run first
    ///
    /// The first fetch happens immediately; later ones follow the interval's cadence.
    pub(crate) fn start(
        &mut self,
        key: SubscriptionKey,
        source: Arc<dyn CandleSource>,
        writer: SeriesWriter,
    ) {
        self.stop();

        let period = self.cadence.period_for(key.interval.as_str());
        info!(%key, period_ms = period.as_millis() as u64, "starting poll loop");

        self.task = Some(TaskHandle::spawn(move |mut shutdown| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {}
                }

                let outcome = match source.fetch_candles(&key).await {
                    Ok(candles) => {
                        debug!(%key, count = candles.len(), "poll tick fetched candles");
                        match writer.replace_all(candles) {
                            WriteOutcome::Stale => WriteOutcome::Stale,
                            _ => writer.connected(),
                        }
                    }
                    Err(error) => {
                        warn!(%key, %error, "poll tick failed");
                        writer.fail(ConnectionState::Error, error.to_string())
                    }
                };

                if outcome.is_stale() {
                    debug!(%key, "poll loop superseded, exiting");
                    break;
                }
            }
        }));
    }

    /// Stop polling; safe to call when already stopped
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("stopping poll loop");
            task.cancel(Duration::ZERO);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

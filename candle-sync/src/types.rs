/// Core data types for the candle synchronisation client
///
/// Candles match the JSON shape served by the chart backend on both the
/// `/api/data` pull endpoint and the `/ws/data` push stream.
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One OHLCV bucket, optionally annotated with indicator values
///
/// Any field the backend sends beyond OHLCV (e.g. `rsi`, `macd`, `bb_upper`)
/// is kept verbatim in `indicators` and handed to renderers untouched.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    /// Bucket open time in epoch milliseconds
    #[serde(alias = "open_time")]
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    /// Pass-through indicator fields keyed by name
    #[serde(flatten)]
    pub indicators: BTreeMap<String, serde_json::Value>,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
            indicators: BTreeMap::new(),
        }
    }

    /// Attach an indicator value
    pub fn with_indicator(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.indicators.insert(name.into(), value);
        self
    }

    /// Bucket open time as a UTC timestamp, if representable
    pub fn time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
    }

    pub fn indicator(&self, name: &str) -> Option<&serde_json::Value> {
        self.indicators.get(name).filter(|value| !value.is_null())
    }
}

/// Candle interval as understood by the backend (e.g. "1m", "4h", "1M")
///
/// Kept as an open string: unknown intervals are legal and simply fall back
/// to the default poll cadence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Interval(SmolStr);

impl Interval {
    /// Intervals offered by the backend, shortest first
    pub const KNOWN: [&'static str; 15] = [
        "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
        "1M",
    ];

    pub fn new(interval: impl Into<SmolStr>) -> Self {
        Self(interval.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_known(&self) -> bool {
        Self::KNOWN.contains(&self.as_str())
    }
}

impl From<&str> for Interval {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator selection carried on a subscription
///
/// Each variant serialises to the query parameters the backend expects; the
/// indicator math itself happens server side.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Indicator {
    Volumes,
    Rsi { period: u32 },
    Sma { periods: Vec<u32> },
    Ema { periods: Vec<u32> },
    Macd,
    BollingerBands,
    Stochastic,
    Supertrend,
    Psar,
    KeltnerChannel,
    Cci,
}

impl Indicator {
    pub const DEFAULT_RSI_PERIOD: u32 = 12;

    /// Parse a display name (case-insensitive) into an indicator with default parameters
    pub fn from_name(name: &str) -> Option<Self> {
        let indicator = match name.trim().to_lowercase().as_str() {
            "volumes" | "volume" => Indicator::Volumes,
            "rsi" => Indicator::Rsi {
                period: Self::DEFAULT_RSI_PERIOD,
            },
            "sma" => Indicator::Sma {
                periods: vec![20, 50],
            },
            "ema" => Indicator::Ema {
                periods: vec![20, 50],
            },
            "macd" => Indicator::Macd,
            "bollinger bands" | "bb" => Indicator::BollingerBands,
            "stochastic" | "stoch" => Indicator::Stochastic,
            "supertrend" => Indicator::Supertrend,
            "psar" => Indicator::Psar,
            "keltner channel" | "kc" => Indicator::KeltnerChannel,
            "cci" => Indicator::Cci,
            _ => return None,
        };
        Some(indicator)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Indicator::Volumes => "Volumes",
            Indicator::Rsi { .. } => "RSI",
            Indicator::Sma { .. } => "SMA",
            Indicator::Ema { .. } => "EMA",
            Indicator::Macd => "MACD",
            Indicator::BollingerBands => "Bollinger Bands",
            Indicator::Stochastic => "Stochastic",
            Indicator::Supertrend => "Supertrend",
            Indicator::Psar => "PSAR",
            Indicator::KeltnerChannel => "Keltner Channel",
            Indicator::Cci => "CCI",
        }
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let join = |periods: &[u32]| {
            periods
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };

        match self {
            Indicator::Volumes => vec![("volumes", "true".into())],
            Indicator::Rsi { period } => vec![
                ("include_rsi", "true".into()),
                ("rsi_periods", period.to_string()),
            ],
            Indicator::Sma { periods } => {
                vec![("include_sma", "true".into()), ("sma_periods", join(periods))]
            }
            Indicator::Ema { periods } => {
                vec![("include_ema", "true".into()), ("ema_periods", join(periods))]
            }
            Indicator::Macd => vec![("include_macd", "true".into()), ("macd", "12,26,9".into())],
            Indicator::BollingerBands => {
                vec![("include_bb", "true".into()), ("bb", "20,2".into())]
            }
            Indicator::Stochastic => {
                vec![("include_stoch", "true".into()), ("stoch", "14,3,3".into())]
            }
            Indicator::Supertrend => vec![
                ("include_supertrend", "true".into()),
                ("supertrend", "10,3.0".into()),
            ],
            Indicator::Psar => vec![("include_psar", "true".into()), ("psar", "0.02,0.2".into())],
            Indicator::KeltnerChannel => {
                vec![("include_kc", "true".into()), ("kc", "20,2.0".into())]
            }
            Indicator::Cci => vec![("include_cci", "true".into()), ("cci", "20".into())],
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Rsi { period } => write!(f, "RSI({period})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Identity of the series being tracked
///
/// Any change to any field invalidates the active transport and the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub symbol: SmolStr,
    pub interval: Interval,
    pub limit: usize,
    pub indicators: BTreeSet<Indicator>,
}

impl SubscriptionKey {
    pub fn new(symbol: impl Into<SmolStr>, interval: impl Into<Interval>, limit: usize) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            limit,
            indicators: BTreeSet::new(),
        }
    }

    pub fn with_indicator(mut self, indicator: Indicator) -> Self {
        self.indicators.insert(indicator);
        self
    }

    pub fn with_indicators(mut self, indicators: impl IntoIterator<Item = Indicator>) -> Self {
        self.indicators.extend(indicators);
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.symbol.trim().is_empty() {
            return Err(SyncError::InvalidKey("symbol is empty".to_string()));
        }
        if self.interval.as_str().trim().is_empty() {
            return Err(SyncError::InvalidKey("interval is empty".to_string()));
        }
        if self.limit == 0 {
            return Err(SyncError::InvalidKey("limit must be positive".to_string()));
        }
        Ok(())
    }

    /// Query parameters shared by the pull and push endpoints
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("interval", self.interval.to_string()),
            ("symbol", self.symbol.to_string()),
            ("limit", self.limit.to_string()),
        ];
        pairs.extend(self.indicators.iter().flat_map(Indicator::query_pairs));
        pairs
    }

    pub fn to_query(&self) -> Result<String, SyncError> {
        serde_urlencoded::to_string(self.query_pairs())
            .map_err(|error| SyncError::InvalidKey(format!("query encoding failed: {error}")))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} x{}", self.symbol, self.interval, self.limit)?;
        if !self.indicators.is_empty() {
            let names = self
                .indicators
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " [{names}]")?;
        }
        Ok(())
    }
}

/// Connection state exposed to observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How candles reach the store for one activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Stream,
    Poll,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Stream => f.write_str("stream"),
            TransportMode::Poll => f.write_str("poll"),
        }
    }
}

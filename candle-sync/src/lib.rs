/// Candle Sync - realtime candle series for chart dashboards
///
/// Keeps one bounded, time-ascending candle series in step with a chart
/// backend, over a websocket push stream where the host supports it and by
/// periodic REST polling where it does not.
///
/// The library includes:
/// - Series store with ordering guarantees and generation-guarded writers
/// - Transport selection, push stream client and poll loop
/// - Sync controller owning the activation lifecycle
/// - Symbol catalog and REST client for the backend's auxiliary endpoints
/// - Zoomable price window over liquidation datasets
pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod poll;
pub mod selector;
pub mod series;
pub mod source;
pub mod stream;
pub mod types;
pub mod window;

mod shared;
mod task;

// Re-export commonly used types for convenience
pub use catalog::SymbolCatalog;
pub use config::SyncConfig;
pub use controller::{DebugInfo, SyncController};
pub use error::{FetchError, StoreError, SyncError, WindowError};
pub use poll::PollCadence;
pub use selector::{HostCapability, IncapableHosts, TransportSelector};
pub use series::{SeriesStore, UpdateOutcome};
pub use shared::{SeriesReader, SyncStatus, WriteOutcome};
pub use source::{ApiClient, CandleSource, Timeframe};
pub use stream::{ReconnectPolicy, StreamConfig, StreamMessage};
pub use types::{Candle, ConnectionState, Indicator, Interval, SubscriptionKey, TransportMode};
pub use window::{
    LiquidationLevel, LiquidationSnapshot, PriceBounds, PriceWindow, WheelDirection, ZoomRange,
};

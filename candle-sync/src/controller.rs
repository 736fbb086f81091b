//! Activation lifecycle for the candle series
//!
//! [`SyncController`] is the only owner of transports. Each `activate` tears
//! the previous transport down, resets the series for the new key and starts
//! exactly one stream or poll transport.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::poll::PollLoop;
use crate::selector::{HostCapability, TransportSelector};
use crate::shared::{SeriesReader, SyncShared, SyncStatus};
use crate::source::{ApiClient, CandleSource};
use crate::stream::StreamClient;
use crate::types::{ConnectionState, SubscriptionKey, TransportMode};

/// Snapshot of the controller for debug panels
#[derive(Debug, Clone, PartialEq)]
pub struct DebugInfo {
    pub api_base: Url,
    pub connection_state: ConnectionState,
    pub last_error: Option<String>,
    pub candle_count: usize,
    pub subscription_key: Option<SubscriptionKey>,
    pub transport_mode: Option<TransportMode>,
}

#[derive(Debug)]
enum ActiveTransport {
    Stream(StreamClient),
    Poll(PollLoop),
}

impl ActiveTransport {
    fn mode(&self) -> TransportMode {
        match self {
            ActiveTransport::Stream(_) => TransportMode::Stream,
            ActiveTransport::Poll(_) => TransportMode::Poll,
        }
    }

    fn shutdown(self) {
        match self {
            ActiveTransport::Stream(mut client) => client.disconnect(),
            ActiveTransport::Poll(mut poll) => poll.stop(),
        }
    }
}

/// Owns the active transport and the series it feeds
///
/// Must be used from within a tokio runtime: activation spawns the transport task.
pub struct SyncController {
    config: SyncConfig,
    selector: TransportSelector,
    source: Arc<dyn CandleSource>,
    shared: Arc<SyncShared>,
    active: Option<ActiveTransport>,
}

impl SyncController {
    /// Controller pulling through `source`
    pub fn new(config: SyncConfig, source: Arc<dyn CandleSource>) -> Self {
        let selector = config.selector();
        Self {
            config,
            selector,
            source,
            shared: SyncShared::new(),
            active: None,
        }
    }

    /// Controller pulling through an [`ApiClient`] built from `config`
    pub fn from_config(config: SyncConfig) -> Self {
        let client = Arc::new(ApiClient::from_config(&config));
        Self::new(config, client)
    }

    /// Replace the host capability used to decide between stream and poll
    pub fn with_host_capability(mut self, capability: Arc<dyn HostCapability>) -> Self {
        self.selector = TransportSelector::new(self.config.stream_enabled, capability);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start syncing `key`, replacing whatever was active
    pub fn activate(&mut self, key: SubscriptionKey) -> Result<TransportMode, SyncError> {
        key.validate()?;
        self.teardown();

        let writer = self.shared.rebind(key.clone());
        let source = Arc::clone(&self.source);

        let mut mode = self.selector.select_mode(&self.config.api_base);
        let endpoint = match mode {
            TransportMode::Stream => match self.config.stream_endpoint(&key) {
                Ok(endpoint) => Some(endpoint),
                Err(error) => {
                    warn!(%key, %error, "stream endpoint unavailable, falling back to polling");
                    mode = TransportMode::Poll;
                    None
                }
            },
            TransportMode::Poll => None,
        };

        info!(%key, %mode, generation = writer.generation(), "activating subscription");

        let transport = match endpoint {
            Some(endpoint) => {
                let initial = self.config.stream.initial_fetch.then_some(source);
                let mut client = StreamClient::new(self.config.stream.clone());
                client.connect(key, endpoint, writer, initial);
                ActiveTransport::Stream(client)
            }
            None => {
                let mut poll = PollLoop::new(self.config.poll_cadence.clone());
                poll.start(key, source, writer);
                ActiveTransport::Poll(poll)
            }
        };

        self.active = Some(transport);
        Ok(mode)
    }

    /// Stop syncing; the last series stays readable. Safe to call repeatedly.
    pub fn deactivate(&mut self) {
        if self.active.is_some() {
            info!("deactivating subscription");
        }
        self.teardown();
    }

    pub fn status(&self) -> SyncStatus {
        self.reader().status()
    }

    pub fn reader(&self) -> SeriesReader {
        SeriesReader::new(Arc::clone(&self.shared))
    }

    pub fn active_mode(&self) -> Option<TransportMode> {
        self.active.as_ref().map(ActiveTransport::mode)
    }

    pub fn debug_info(&self) -> DebugInfo {
        let reader = self.reader();
        let status = reader.status();
        DebugInfo {
            api_base: self.config.api_base.clone(),
            connection_state: status.connection_state,
            last_error: status.last_error,
            candle_count: reader.len(),
            subscription_key: reader.key(),
            transport_mode: self.active_mode(),
        }
    }

    /// Invalidate outstanding writers first, then stop the transport
    fn teardown(&mut self) {
        self.shared.detach();
        if let Some(active) = self.active.take() {
            debug!(mode = %active.mode(), "tearing down transport");
            active.shutdown();
        }
    }
}

impl fmt::Debug for SyncController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncController")
            .field("api_base", &self.config.api_base.as_str())
            .field("selector", &self.selector)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.teardown();
    }
}

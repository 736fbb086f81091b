//! Push transport: websocket candle stream with automatic reconnection
//!
//! One [`StreamClient`] owns at most one connection task. The task keeps the
//! socket alive with pings, treats prolonged silence as a dead connection and
//! reconnects according to its [`ReconnectPolicy`] until told to stop.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SyncError;
use crate::shared::{SeriesWriter, WriteOutcome};
use crate::source::CandleSource;
use crate::task::{shutdown_requested, TaskHandle};
use crate::types::{ConnectionState, SubscriptionKey};

mod backoff;
mod message;
mod timeout;

pub use backoff::ReconnectPolicy;
pub use message::StreamMessage;
pub use timeout::{TimeoutStream, DEFAULT_READ_TIMEOUT};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default keep-alive ping interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Push stream keep-alive and reconnection settings
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Delay schedule between reconnection attempts
    pub reconnect: ReconnectPolicy,
    /// Ping interval to keep the connection alive
    pub ping_interval: Duration,
    /// Connection is considered dead after this long without a frame
    pub read_timeout: Duration,
    /// How long a disconnect waits for the close handshake
    pub close_grace: Duration,
    /// Seed the series with one pull fetch before the first connect
    pub initial_fetch: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            close_grace: Duration::from_secs(1),
            initial_fetch: true,
        }
    }
}

impl StreamConfig {
    /// Set reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set ping interval; zero is refused and leaves the current value
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!(current_secs = self.ping_interval.as_secs(), "ignoring zero ping interval");
        } else {
            self.ping_interval = interval;
        }
        self
    }

    /// Set read timeout; zero is refused and leaves the current value
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!(current_secs = self.read_timeout.as_secs(), "ignoring zero read timeout");
        } else {
            self.read_timeout = timeout;
        }
        self
    }

    /// Ping interval used by a session; a zero field falls back to the default
    fn effective_ping_interval(&self) -> Duration {
        non_zero_or(self.ping_interval, DEFAULT_PING_INTERVAL)
    }

    fn effective_read_timeout(&self) -> Duration {
        non_zero_or(self.read_timeout, DEFAULT_READ_TIMEOUT)
    }

    /// Set close handshake grace period
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Enable or disable the pull fetch made before the first connect
    pub fn with_initial_fetch(mut self, enabled: bool) -> Self {
        self.initial_fetch = enabled;
        self
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

/// Websocket client for one subscription at a time
#[derive(Debug)]
pub struct StreamClient {
    config: StreamConfig,
    task: Option<TaskHandle>,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Self {
        Self { config, task: None }
    }

    /// Open the stream for `key`, closing any previous connection first
    ///
    /// When `initial` is given the series is seeded from a pull fetch before
    /// the socket is opened, so the chart is not blank while connecting.
    pub(crate) fn connect(
        &mut self,
        key: SubscriptionKey,
        endpoint: Url,
        writer: SeriesWriter,
        initial: Option<Arc<dyn CandleSource>>,
    ) {
        self.disconnect();

        info!(%key, %endpoint, "starting candle stream");
        let config = self.config.clone();
        self.task = Some(TaskHandle::spawn(move |shutdown| {
            run_stream(config, key, endpoint, writer, initial, shutdown)
        }));
    }

    /// Close the stream; no reconnection follows. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("closing candle stream");
            task.cancel(self.config.close_grace);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Why a connected session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Superseded,
    Dropped(String),
}

async fn run_stream(
    config: StreamConfig,
    key: SubscriptionKey,
    endpoint: Url,
    writer: SeriesWriter,
    initial: Option<Arc<dyn CandleSource>>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Some(source) = initial {
        let fetched = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return,
            fetched = source.fetch_candles(&key) => fetched,
        };
        let outcome = match fetched {
            Ok(candles) => writer.replace_all(candles),
            Err(error) => {
                warn!(%key, %error, "initial candle fetch failed");
                writer.report_error(error.to_string())
            }
        };
        if outcome.is_stale() {
            return;
        }
    }

    let mut attempt: u32 = 0;
    loop {
        if writer.set_state(ConnectionState::Connecting).is_stale() {
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return,
            connected = connect_async(endpoint.as_str()) => connected,
        };

        match connected {
            Ok((socket, _)) => {
                info!(%key, "candle stream connected");
                if writer.connected().is_stale() {
                    return;
                }
                attempt = 0;

                match run_session(&config, socket, &writer, &mut shutdown).await {
                    SessionEnd::Shutdown => {
                        debug!(%key, "candle stream closed on request");
                        return;
                    }
                    SessionEnd::Superseded => {
                        debug!(%key, "candle stream superseded");
                        return;
                    }
                    SessionEnd::Dropped(reason) => {
                        warn!(%key, %reason, "candle stream dropped");
                        if writer.fail(ConnectionState::Disconnected, reason).is_stale() {
                            return;
                        }
                    }
                }
            }
            Err(error) => {
                let error = SyncError::from(error);
                warn!(%key, %error, "candle stream connect failed");
                if writer.fail(ConnectionState::Error, error.to_string()).is_stale() {
                    return;
                }
            }
        }

        let delay = config.reconnect.delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(%key, attempt, delay_ms = delay.as_millis() as u64, "reconnecting candle stream");

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session(
    config: &StreamConfig,
    socket: WsStream,
    writer: &SeriesWriter,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, read) = socket.split();
    let read_timeout = config.effective_read_timeout();
    let ping_interval = config.effective_ping_interval();
    let mut read = TimeoutStream::new(read, read_timeout);
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => {
                let _ = tokio::time::timeout(config.close_grace, write.send(Message::Close(None))).await;
                return SessionEnd::Shutdown;
            }
            _ = ping.tick() => {
                if let Err(error) = write.send(Message::Ping(Vec::new().into())).await {
                    return SessionEnd::Dropped(format!("ping failed: {error}"));
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match handle_text(text.as_str(), writer) {
                    Ok(outcome) if outcome.is_stale() => {
                        let _ = tokio::time::timeout(config.close_grace, write.send(Message::Close(None))).await;
                        return SessionEnd::Superseded;
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "dropping malformed stream message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            format!("server closed connection: {}", frame.reason)
                        }
                        _ => "server closed connection".to_string(),
                    };
                    return SessionEnd::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return SessionEnd::Dropped(SyncError::from(error).to_string()),
                None if read.timed_out() => {
                    return SessionEnd::Dropped(format!(
                        "no frames received for {}s",
                        read_timeout.as_secs()
                    ));
                }
                None => return SessionEnd::Dropped("stream ended".to_string()),
            }
        }
    }
}

/// Apply one text frame to the series
fn handle_text(text: &str, writer: &SeriesWriter) -> Result<WriteOutcome, SyncError> {
    let outcome = match StreamMessage::parse(text)? {
        StreamMessage::Snapshot { candles } => writer.replace_all(candles),
        StreamMessage::Update { candle, is_new_bar } => writer.apply_update(candle, is_new_bar),
        StreamMessage::Error { message } => {
            warn!(%message, "candle stream reported error");
            writer.report_error(message)
        }
    };
    Ok(outcome)
}

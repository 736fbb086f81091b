use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::error::SyncError;
use crate::poll::PollCadence;
use crate::selector::{IncapableHosts, TransportSelector};
use crate::stream::{ReconnectPolicy, StreamConfig};
use crate::types::SubscriptionKey;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_INCAPABLE_HOSTS: &str = "vercel.app";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const PULL_PATH: &str = "api/data";
const STREAM_PATH: &str = "ws/data";

/// Client configuration, usually derived from `CANDLE_SYNC_*` environment variables
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the chart backend (http or https)
    pub api_base: Url,
    /// Feature flag: when false every activation polls
    pub stream_enabled: bool,
    /// Host suffixes that cannot serve the push stream
    pub stream_incapable_hosts: Vec<String>,
    /// Poll period per candle interval
    pub poll_cadence: PollCadence,
    /// Push stream keep-alive and reconnection settings
    pub stream: StreamConfig,
    /// Per-request timeout for pull requests
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            stream_enabled: true,
            stream_incapable_hosts: split_list(DEFAULT_INCAPABLE_HOSTS),
            poll_cadence: PollCadence::default(),
            stream: StreamConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with a custom API base
    pub fn new(api_base: &str) -> Result<Self, SyncError> {
        Ok(Self {
            api_base: parse_api_base(api_base)?,
            ..Default::default()
        })
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    ///
    /// Malformed numeric values fall back to their defaults with a warning;
    /// only an unparseable API base is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |name: &str, default: u64| parse_or(name, var(name), default);
        let seconds = |name: &str, default: u64| {
            let value = match number(name, default) {
                0 => {
                    warn!(name, default, "zero duration is not allowed, using default");
                    default
                }
                value => value,
            };
            Duration::from_secs(value)
        };

        let api_base = match var("CANDLE_SYNC_API_BASE") {
            Some(base) => parse_api_base(&base)?,
            None => default_api_base(),
        };

        let flag = |name: &str, default: bool| {
            var(name)
                .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
                .unwrap_or(default)
        };
        let stream_enabled = flag("CANDLE_SYNC_ENABLE_WS", true);

        let stream_incapable_hosts = split_list(
            &var("CANDLE_SYNC_STREAM_INCAPABLE_HOSTS")
                .unwrap_or_else(|| DEFAULT_INCAPABLE_HOSTS.to_string()),
        );

        let mut poll_cadence = PollCadence::default();
        if let Some(overrides) = var("CANDLE_SYNC_POLL_MS") {
            poll_cadence = poll_cadence.with_overrides(&overrides);
        }

        let reconnect_ms = number("CANDLE_SYNC_RECONNECT_MS", 3_000);
        let reconnect = match var("CANDLE_SYNC_BACKOFF").as_deref() {
            Some(policy) if policy.eq_ignore_ascii_case("exponential") => {
                ReconnectPolicy::Exponential {
                    initial: Duration::from_millis(reconnect_ms),
                    max: Duration::from_millis(number("CANDLE_SYNC_BACKOFF_MAX_MS", 60_000)),
                    jitter: true,
                }
            }
            Some(policy) if !policy.eq_ignore_ascii_case("fixed") => {
                warn!(policy, "unknown CANDLE_SYNC_BACKOFF, using fixed delay");
                ReconnectPolicy::Fixed(Duration::from_millis(reconnect_ms))
            }
            _ => ReconnectPolicy::Fixed(Duration::from_millis(reconnect_ms)),
        };

        let stream = StreamConfig::default()
            .with_reconnect(reconnect)
            .with_ping_interval(seconds("CANDLE_SYNC_PING_SECS", 30))
            .with_read_timeout(seconds("CANDLE_SYNC_READ_TIMEOUT_SECS", 120))
            .with_initial_fetch(flag("CANDLE_SYNC_INITIAL_FETCH", true));

        Ok(Self {
            api_base,
            stream_enabled,
            stream_incapable_hosts,
            poll_cadence,
            stream,
            request_timeout: seconds("CANDLE_SYNC_REQUEST_TIMEOUT_SECS", 10),
        })
    }

    /// Set the streaming feature flag
    pub fn with_stream_enabled(mut self, enabled: bool) -> Self {
        self.stream_enabled = enabled;
        self
    }

    /// Set the stream-incapable host suffixes
    pub fn with_incapable_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_incapable_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set poll cadence table
    pub fn with_poll_cadence(mut self, cadence: PollCadence) -> Self {
        self.poll_cadence = cadence;
        self
    }

    /// Set stream configuration
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Set pull request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Transport selector backed by the configured host list
    pub fn selector(&self) -> TransportSelector {
        TransportSelector::new(
            self.stream_enabled,
            Arc::new(IncapableHosts::new(self.stream_incapable_hosts.clone())),
        )
    }

    /// `{api_base}/{path}`
    pub fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        join_path(&self.api_base, path)
    }

    /// Pull endpoint for `key`
    pub fn pull_endpoint(&self, key: &SubscriptionKey) -> Result<Url, SyncError> {
        let mut url = self.endpoint(PULL_PATH)?;
        url.set_query(Some(&key.to_query()?));
        Ok(url)
    }

    /// Push endpoint for `key`, with the scheme translated to its websocket equivalent
    pub fn stream_endpoint(&self, key: &SubscriptionKey) -> Result<Url, SyncError> {
        let mut url = self.endpoint(STREAM_PATH)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SyncError::InvalidEndpoint(format!(
                    "scheme {other} has no websocket equivalent"
                )))
            }
        };
        url.set_scheme(scheme).map_err(|()| {
            SyncError::InvalidEndpoint(format!("cannot switch {} to {scheme}", self.api_base))
        })?;
        url.set_query(Some(&key.to_query()?));
        Ok(url)
    }
}

pub(crate) fn join_path(base: &Url, path: &str) -> Result<Url, SyncError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&joined)?)
}

fn parse_api_base(base: &str) -> Result<Url, SyncError> {
    let url = Url::parse(base.trim())?;
    if url.cannot_be_a_base() {
        return Err(SyncError::InvalidEndpoint(format!("{base} cannot be a base URL")));
    }
    Ok(url)
}

fn default_api_base() -> Url {
    Url::parse(DEFAULT_API_BASE).expect("DEFAULT_API_BASE is a valid absolute URL")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or(name: &str, value: Option<String>, default: u64) -> u64 {
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(name, value = %raw, default, "invalid numeric setting, using default");
            default
        }),
    }
}

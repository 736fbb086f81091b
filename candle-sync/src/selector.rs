//! Stream-vs-poll transport selection
//!
//! Some hosts (serverless platforms in particular) cannot hold a websocket
//! open. Whether a host can stream is an injected capability rather than
//! something sniffed inline, so deployments can describe their own hosts.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::types::TransportMode;

/// Answers whether the API host can serve the push stream
pub trait HostCapability: Send + Sync {
    fn supports_stream(&self, api_base: &Url) -> bool;
}

impl<F> HostCapability for F
where
    F: Fn(&Url) -> bool + Send + Sync,
{
    fn supports_stream(&self, api_base: &Url) -> bool {
        self(api_base)
    }
}

/// Capability backed by a list of host suffixes known to be stream-incapable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncapableHosts {
    suffixes: Vec<String>,
}

impl IncapableHosts {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|suffix| suffix.into().trim().trim_start_matches('.').to_lowercase())
                .filter(|suffix| !suffix.is_empty())
                .collect(),
        }
    }

    fn matches(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.suffixes
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
    }
}

impl HostCapability for IncapableHosts {
    fn supports_stream(&self, api_base: &Url) -> bool {
        api_base
            .host_str()
            .map(|host| !self.matches(host))
            .unwrap_or(true)
    }
}

/// Picks the transport mode once per activation
#[derive(Clone)]
pub struct TransportSelector {
    stream_enabled: bool,
    capability: Arc<dyn HostCapability>,
}

impl TransportSelector {
    pub fn new(stream_enabled: bool, capability: Arc<dyn HostCapability>) -> Self {
        Self {
            stream_enabled,
            capability,
        }
    }

    pub fn select_mode(&self, api_base: &Url) -> TransportMode {
        let mode = if self.stream_enabled && self.capability.supports_stream(api_base) {
            TransportMode::Stream
        } else {
            TransportMode::Poll
        };

        debug!(
            %api_base,
            stream_enabled = self.stream_enabled,
            %mode,
            "selected transport mode"
        );
        mode
    }
}

impl fmt::Debug for TransportSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSelector")
            .field("stream_enabled", &self.stream_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_select_mode() {
        struct TestCase {
            stream_enabled: bool,
            api_base: &'static str,
            expected: TransportMode,
        }

        let incapable = Arc::new(IncapableHosts::new(["vercel.app"]));

        let tests = vec![
            TestCase {
                // TC0: streaming host w/ streaming enabled
                stream_enabled: true,
                api_base: "http://127.0.0.1:8000",
                expected: TransportMode::Stream,
            },
            TestCase {
                // TC1: streaming disabled by flag
                stream_enabled: false,
                api_base: "http://127.0.0.1:8000",
                expected: TransportMode::Poll,
            },
            TestCase {
                // TC2: stream-incapable host class
                stream_enabled: true,
                api_base: "https://chart-api.vercel.app",
                expected: TransportMode::Poll,
            },
            TestCase {
                // TC3: suffix must match on a label boundary
                stream_enabled: true,
                api_base: "https://notvercel.app.example.com",
                expected: TransportMode::Stream,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let selector = TransportSelector::new(test.stream_enabled, incapable.clone());
            let actual = selector.select_mode(&url(test.api_base));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_closure_capability() {
        let selector = TransportSelector::new(
            true,
            Arc::new(|api_base: &Url| api_base.port() != Some(9999)),
        );

        assert_eq!(selector.select_mode(&url("http://localhost:8000")), TransportMode::Stream);
        assert_eq!(selector.select_mode(&url("http://localhost:9999")), TransportMode::Poll);
    }
}

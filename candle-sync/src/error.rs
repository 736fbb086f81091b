use thiserror::Error;

/// All errors generated in `candle-sync`.
///
/// Nothing here is fatal to a session: store and protocol errors are dropped
/// locally, transport errors drive reconnection, fetch errors are surfaced and
/// retried on the next poll tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid subscription key: {0}")]
    InvalidKey(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<url::ParseError> for SyncError {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidEndpoint(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Rejections raised by the series store. Always recovered locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("OutOfOrderUpdate: candle time {received} does not follow last candle time {last}")]
    OrderingViolation { last: i64, received: i64 },

    #[error("InvalidSnapshot: {0}")]
    InvalidSnapshot(String),
}

/// Failures of a pull request against the chart backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response decode failed: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Network(value.to_string())
        }
    }
}

/// Rejections raised when building a price window over a liquidation dataset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("liquidation dataset has no finite prices")]
    EmptyDataset,

    #[error("liquidation dataset spans a single price ({0})")]
    DegenerateBounds(f64),

    #[error("reference price {reference} lies outside [{min}, {max}]")]
    ReferenceOutOfBounds { reference: f64, min: f64, max: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        struct TestCase {
            input: SyncError,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: store error keeps its own prefix
                input: SyncError::from(StoreError::OrderingViolation {
                    last: 100,
                    received: 90,
                }),
                expected: "OutOfOrderUpdate: candle time 90 does not follow last candle time 100",
            },
            TestCase {
                // TC1: fetch status is shown as the backend reported it
                input: SyncError::from(FetchError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                }),
                expected: "HTTP 502: bad gateway",
            },
            TestCase {
                // TC2: unparseable endpoint
                input: SyncError::from(url::ParseError::RelativeUrlWithoutBase),
                expected: "invalid endpoint: relative URL without a base",
            },
            TestCase {
                // TC3: key validation failure
                input: SyncError::InvalidKey("limit must be positive".to_string()),
                expected: "invalid subscription key: limit must be positive",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.input.to_string(), test.expected, "TC{} failed", index);
        }
    }
}

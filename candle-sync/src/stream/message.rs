use serde::Deserialize;

use crate::error::SyncError;
use crate::types::Candle;

/// Inbound push-stream message
///
/// ```json
/// {"type": "snapshot", "candles": [...]}
/// {"type": "update", "candle": {...}, "is_new_bar": true}
/// {"type": "error", "message": "unknown symbol"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Snapshot {
        candles: Vec<Candle>,
    },
    Update {
        candle: Candle,
        #[serde(default)]
        is_new_bar: bool,
    },
    Error {
        message: String,
    },
}

impl StreamMessage {
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|error| SyncError::Protocol(error.to_string()))
    }
}

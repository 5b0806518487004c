//! Decoded frame contents.

use crate::status::{Source, StatusType};
use chrono::NaiveDateTime;

/// Format used for the client timestamp and record expiry fields.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Render a local date-time as ISO-8601 without offset.
pub fn format_timestamp(t: &NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an ISO-8601 local date-time (seconds and fraction optional).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
}

/// One key/value pair. A `None` value is encoded with length -1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Option<String>,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn some(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Some(value.into()))
    }

    pub fn value_str(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Index of the username pair in client frames.
pub const CLIENT_USERNAME_IDX: usize = 0;
/// Index of the timestamp pair in client frames.
pub const CLIENT_TIMESTAMP_IDX: usize = 1;
/// Index of the key/value pair in client frames.
pub const CLIENT_PAYLOAD_IDX: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: Source,
    pub status: StatusType,
    pub pairs: Vec<KeyValue>,
}

impl Message {
    pub fn new(source: Source, status: StatusType) -> Self {
        Self {
            source,
            status,
            pairs: Vec::new(),
        }
    }

    /// Builder-style: append a pair with a present value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push(KeyValue::some(key, value));
        self
    }

    /// Builder-style: append a pair whose value may be absent.
    pub fn with_opt(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.pairs.push(KeyValue::new(key, value));
        self
    }

    pub fn push(&mut self, pair: KeyValue) {
        self.pairs.push(pair);
    }

    /// A frame carrying a single `("", text)` pair.
    pub fn text(source: Source, status: StatusType, text: impl Into<String>) -> Self {
        Self::new(source, status).with("", text)
    }

    /// A frame carrying one empty pair, as PING/PONG do.
    pub fn empty(source: Source, status: StatusType) -> Self {
        Self::new(source, status).with_opt("", None)
    }

    /// Build a client request: username, timestamp, then the payload pair.
    pub fn client(
        status: StatusType,
        username: Option<&str>,
        timestamp: Option<NaiveDateTime>,
        key: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self::new(Source::Client, status)
            .with_opt("username", username.map(str::to_string))
            .with_opt("timestamp", timestamp.as_ref().map(format_timestamp))
            .with_opt(key, value)
    }

    pub fn pair(&self, idx: usize) -> Option<&KeyValue> {
        self.pairs.get(idx)
    }

    pub fn first(&self) -> Option<&KeyValue> {
        self.pairs.first()
    }

    /// First pair whose key equals `key`.
    pub fn find(&self, key: &str) -> Option<&KeyValue> {
        self.pairs.iter().find(|kv| kv.key == key)
    }

    /// Value of the first pair named `key`, if present and non-null.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.find(key).and_then(KeyValue::value_str)
    }

    pub fn client_username(&self) -> Option<&str> {
        self.pair(CLIENT_USERNAME_IDX).and_then(KeyValue::value_str)
    }

    pub fn client_timestamp(&self) -> Option<&str> {
        self.pair(CLIENT_TIMESTAMP_IDX).and_then(KeyValue::value_str)
    }

    pub fn client_payload(&self) -> Option<&KeyValue> {
        self.pair(CLIENT_PAYLOAD_IDX)
    }
}

//! Stream entries and the envelopes decoded from them

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::ops::Deref;

/// One `[id, [field, value, ...]]` record exactly as the broker sends it.
///
/// Fields keep the broker's order. `None` marks an entry that was deleted
/// while still pending.
pub(crate) type RawEntry = (String, Option<Vec<(String, redis::Value)>>);

/// One raw entry as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Redis stream entry ID (e.g., "1234567890123-0")
    pub id: String,

    /// Field/value pairs in broker order, each value being the wire form of
    /// one envelope value
    pub fields: Vec<(String, String)>,

    /// First field whose value is not text, with the reason. Such an entry
    /// is rejected whatever the decode policy.
    pub unreadable: Option<(String, String)>,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            id: id.into(),
            fields,
            unreadable: None,
        }
    }

    /// Build an entry from a raw `XREADGROUP`/`XAUTOCLAIM` record, or
    /// `None` for a deleted one.
    pub(crate) fn from_raw((id, fields): RawEntry) -> Option<Self> {
        let fields = fields?;

        let mut entry = Self::new(id, Vec::with_capacity(fields.len()));
        for (field, value) in fields {
            match field_text(value) {
                Ok(text) => entry.fields.push((field, text)),
                Err(reason) => {
                    if entry.unreadable.is_none() {
                        entry.unreadable = Some((field, reason));
                    }
                }
            }
        }
        Some(entry)
    }

    /// When the broker appended the entry (millisecond part of the ID)
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.id
            .split('-')
            .next()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
    }

    /// How long ago the entry was appended
    pub fn age(&self) -> Option<chrono::Duration> {
        self.timestamp().map(|ts| Utc::now() - ts)
    }
}

fn field_text(value: redis::Value) -> Result<String, String> {
    match value {
        redis::Value::BulkString(bytes) => {
            String::from_utf8(bytes).map_err(|e| format!("value is not valid UTF-8: {}", e))
        }
        redis::Value::SimpleString(s) => Ok(s),
        other => Err(format!("value is not a string: {:?}", other)),
    }
}

/// The decoded payload of one entry: always a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// View the envelope as a `serde_json::Value::Object`
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Deserialize the envelope into a typed payload
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

impl Deref for Envelope {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Envelope> for Value {
    fn from(envelope: Envelope) -> Self {
        Value::Object(envelope.0)
    }
}

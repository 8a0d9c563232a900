//! Envelope codec
//!
//! On the wire an envelope is a flat field/value list where every value is
//! the JSON encoding of one top-level key of the payload:
//!
//! ```text
//! {"userId": 123, "tags": ["a"]}  <->  userId=123  tags=["a"]
//! ```
//!
//! Decoding parses every value back. A value that is not valid JSON either
//! rejects the whole entry ([`DecodePolicy::Strict`]) or is kept as a plain
//! string ([`DecodePolicy::Lenient`]). Entries are never half-decoded under
//! the strict policy. A value that is not even text (invalid UTF-8) rejects
//! the entry under both policies.

use crate::envelope::{Envelope, StreamEntry};
use crate::error::StreamError;
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

/// How to treat field values that are not valid JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DecodePolicy {
    /// Reject the whole entry
    #[default]
    Strict,
    /// Keep the raw string as a string value
    Lenient,
}

/// Result of decoding one entry
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    Rejected { field: String, reason: String },
}

/// Name of a JSON value's kind, for error messages
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Encode an object payload into its wire fields
pub fn encode(payload: &Map<String, Value>) -> Vec<(String, String)> {
    payload
        .iter()
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect()
}

/// Check that `payload` is an object, then encode it
pub fn encode_value(payload: &Value) -> Result<Vec<(String, String)>, StreamError> {
    match payload {
        Value::Object(map) => Ok(encode(map)),
        other => Err(StreamError::InvalidPayloadKind {
            kind: value_kind(other),
        }),
    }
}

/// Decode a delivered entry, rejecting it when a field was not readable
pub fn decode_entry(entry: &StreamEntry, policy: DecodePolicy) -> Decoded {
    match &entry.unreadable {
        Some((field, reason)) => Decoded::Rejected {
            field: field.clone(),
            reason: reason.clone(),
        },
        None => decode(&entry.fields, policy),
    }
}

/// Decode wire fields back into an envelope
pub fn decode(fields: &[(String, String)], policy: DecodePolicy) -> Decoded {
    let mut map = Map::with_capacity(fields.len());

    for (key, raw) in fields {
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => match policy {
                DecodePolicy::Strict => {
                    return Decoded::Rejected {
                        field: key.clone(),
                        reason: e.to_string(),
                    };
                }
                DecodePolicy::Lenient => Value::String(raw.clone()),
            },
        };
        map.insert(key.clone(), value);
    }

    Decoded::Envelope(Envelope::new(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_each_value_independently() {
        let payload = json!({
            "conversationId": "c-1",
            "count": 3,
            "meta": {"ip": "10.0.0.1"},
            "flags": [true, null]
        });

        let mut encoded = encode_value(&payload).unwrap();
        encoded.sort();

        assert_eq!(
            encoded,
            fields(&[
                ("conversationId", "\"c-1\""),
                ("count", "3"),
                ("flags", "[true,null]"),
                ("meta", "{\"ip\":\"10.0.0.1\"}"),
            ])
        );
    }

    #[test]
    fn test_encode_rejects_non_objects() {
        for (payload, kind) in [
            (json!("hello"), "string"),
            (json!(42), "number"),
            (json!(null), "null"),
            (json!([1, 2]), "array"),
            (json!(false), "boolean"),
        ] {
            match encode_value(&payload) {
                Err(StreamError::InvalidPayloadKind { kind: got }) => assert_eq!(got, kind),
                other => panic!("expected InvalidPayloadKind for {payload}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_reverses_encode() {
        let payload = json!({
            "user": {"id": 123, "profile": {"theme": "dark"}},
            "event": "login",
            "score": 1.5,
            "ok": true,
            "none": null
        });

        let decoded = decode(&encode_value(&payload).unwrap(), DecodePolicy::Strict);

        match decoded {
            Decoded::Envelope(envelope) => assert_eq!(Value::from(envelope), payload),
            Decoded::Rejected { field, reason } => panic!("rejected {field}: {reason}"),
        }
    }

    #[test]
    fn test_strict_rejects_whole_entry() {
        let decoded = decode(
            &fields(&[("ok", "1"), ("broken", "{not json")]),
            DecodePolicy::Strict,
        );

        match decoded {
            Decoded::Rejected { field, .. } => assert_eq!(field, "broken"),
            Decoded::Envelope(e) => panic!("expected rejection, got {e:?}"),
        }
    }

    #[test]
    fn test_strict_rejects_bare_words() {
        let decoded = decode(&fields(&[("name", "alice")]), DecodePolicy::Strict);
        assert!(matches!(decoded, Decoded::Rejected { .. }));
    }

    #[test]
    fn test_lenient_keeps_raw_strings() {
        let decoded = decode(
            &fields(&[("name", "alice"), ("age", "30")]),
            DecodePolicy::Lenient,
        );

        let Decoded::Envelope(envelope) = decoded else {
            panic!("lenient decode must not reject");
        };
        assert_eq!(Value::from(envelope), json!({"name": "alice", "age": 30}));
    }

    #[test]
    fn test_unreadable_entry_rejected_under_both_policies() {
        let mut entry = StreamEntry::new("9-0", fields(&[("ok", "1")]));
        entry.unreadable = Some(("name".to_string(), "value is not valid UTF-8".to_string()));

        for policy in [DecodePolicy::Strict, DecodePolicy::Lenient] {
            match decode_entry(&entry, policy) {
                Decoded::Rejected { field, .. } => assert_eq!(field, "name"),
                Decoded::Envelope(e) => panic!("expected rejection under {policy}, got {e:?}"),
            }
        }
    }

    #[test]
    fn test_decode_policy_parsing() {
        assert_eq!("strict".parse::<DecodePolicy>().unwrap(), DecodePolicy::Strict);
        assert_eq!("LENIENT".parse::<DecodePolicy>().unwrap(), DecodePolicy::Lenient);
        assert!("sometimes".parse::<DecodePolicy>().is_err());
        assert_eq!(DecodePolicy::Lenient.to_string(), "lenient");
    }
}

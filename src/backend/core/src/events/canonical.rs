//! Deterministic serialization used for hashing.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::event::{format_timestamp, Event, Metadata};

/// Serialize metadata with keys sorted at every level and no whitespace.
///
/// An empty map serializes to `""` rather than `{}`.
pub fn canonical_json(metadata: &Metadata) -> String {
    if metadata.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    out.push('{');
    for (i, (key, value)) in metadata.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(&mut out, key);
        out.push(':');
        write_value(&mut out, value);
    }
    out.push('}');
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            // serde_json may preserve insertion order depending on features.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_value(out, v);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

/// SHA-256 over the hashed fields of `event`, hex encoded.
pub fn calculate_hash(event: &Event) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.prev_hash.as_bytes());
    hasher.update(event.id.as_bytes());
    hasher.update(format_timestamp(&event.timestamp).as_bytes());
    hasher.update(event.event_type.as_str().as_bytes());
    hasher.update(event.aggregate_id.as_bytes());
    hasher.update(event.actor.as_bytes());
    hasher.update(canonical_json(&event.metadata).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, NewEvent};
    use serde_json::json;

    #[test]
    fn test_empty_metadata_is_empty_string() {
        assert_eq!(canonical_json(&Metadata::new()), "");
    }

    #[test]
    fn test_order_independent() {
        let a: Metadata = [("a", json!(1)), ("b", json!(2))].into_iter().collect();
        let b: Metadata = [("b", json!(2)), ("a", json!(1))].into_iter().collect();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_nested_keys_sorted() {
        let m = Metadata::new().with(
            "outer",
            json!({"z": [ {"y": 1, "x": "s"} ], "a": null, "m": true}),
        );
        assert_eq!(
            canonical_json(&m),
            r#"{"outer":{"a":null,"m":true,"z":[{"x":"s","y":1}]}}"#
        );
    }

    #[test]
    fn test_string_escaping() {
        let m = Metadata::new().with("q\"k", "line\nbreak");
        assert_eq!(canonical_json(&m), r#"{"q\"k":"line\nbreak"}"#);
    }

    #[test]
    fn test_hash_deterministic_and_sensitive() {
        let event = NewEvent::task(EventType::TaskStarted, "task-1")
            .actor("alice")
            .seal("");
        assert_eq!(calculate_hash(&event), calculate_hash(&event));
        assert_eq!(calculate_hash(&event).len(), 64);

        let mut tampered = event.clone();
        tampered.actor = "mallory".into();
        assert_ne!(calculate_hash(&tampered), event.hash);

        let mut tampered = event.clone();
        tampered.metadata.insert("task_id", "task-2");
        assert_ne!(calculate_hash(&tampered), event.hash);

        let mut tampered = event.clone();
        tampered.prev_hash = "00".into();
        assert_ne!(calculate_hash(&tampered), event.hash);

        let mut tampered = event;
        tampered.timestamp += chrono::Duration::nanoseconds(1);
        assert_ne!(calculate_hash(&tampered), tampered.hash);
    }
}

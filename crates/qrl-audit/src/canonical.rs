//! Canonical JSON: keys sorted recursively, compact output, nested objects
//! embedded as their own sorted-key JSON strings inside the checksum
//! content. Determinism here is load-bearing — the chain checksum is a hash
//! over these bytes.

use serde_json::Value;

/// Recursively sort object keys. Arrays keep their element order.
pub fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Compact JSON with sorted keys.
pub fn canonical_string(v: &Value) -> String {
    serde_json::to_string(&sort_keys(v)).expect("json serialization must not fail")
}

/// Map a checksum-field value into its canonical content form:
/// objects become their sorted-key JSON string, everything else is kept.
/// (UUIDs and timestamps reach this function already stringified by serde.)
pub fn serialize_value(v: &Value) -> Value {
    match v {
        Value::Object(_) => Value::String(canonical_string(v)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"b": 2, "a": {"d": 4, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 4}, "b": 2});
        assert_eq!(canonical_string(&a), canonical_string(&b));
    }

    #[test]
    fn arrays_keep_order() {
        let a = json!([2, 1]);
        let b = json!([1, 2]);
        assert_ne!(canonical_string(&a), canonical_string(&b));
    }

    #[test]
    fn objects_embed_as_strings() {
        let v = json!({"y": 1, "x": 2});
        let ser = serialize_value(&v);
        assert_eq!(ser, Value::String("{\"x\":2,\"y\":1}".to_string()));
    }
}

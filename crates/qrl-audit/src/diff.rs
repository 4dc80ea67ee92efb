//! Value diffing and the size guard.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::canonical::canonical_string;
use crate::record::ValueMode;

/// Serialized values beyond this switch the row to reference mode.
pub const MAX_VALUE_SIZE_BYTES: usize = 8 * 1024;

/// Compute a flat operation-list diff between two values.
///
/// Returns `{"patch": [{op, path, value?}]}` with `add`/`remove`/`replace`
/// operations and JSON-pointer paths, or `None` when the values are
/// identical (or both absent).
pub fn compute_diff(old: Option<&Value>, new: Option<&Value>) -> Option<Value> {
    if old.is_none() && new.is_none() {
        return None;
    }
    let empty = Value::Object(Map::new());
    let old_val = old.unwrap_or(&empty);
    let new_val = new.unwrap_or(&empty);

    let mut ops: Vec<Value> = Vec::new();
    diff_values(old_val, new_val, "", &mut ops);

    if ops.is_empty() {
        None
    } else {
        Some(json!({ "patch": ops }))
    }
}

fn diff_values(old: &Value, new: &Value, path: &str, ops: &mut Vec<Value>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (k, old_v) in old_map {
                let child = format!("{path}/{}", escape_pointer(k));
                match new_map.get(k) {
                    Some(new_v) => diff_values(old_v, new_v, &child, ops),
                    None => ops.push(json!({"op": "remove", "path": child})),
                }
            }
            for (k, new_v) in new_map {
                if !old_map.contains_key(k) {
                    let child = format!("{path}/{}", escape_pointer(k));
                    ops.push(json!({"op": "add", "path": child, "value": new_v}));
                }
            }
        }
        (a, b) if a == b => {}
        (_, b) => {
            let path = if path.is_empty() { "/" } else { path };
            ops.push(json!({"op": "replace", "path": path, "value": b}));
        }
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Enforce the value size budget.
///
/// Within budget: `(Some(value), None, Diff)`. Over budget: the value is
/// dropped and only its canonical-JSON SHA-256 survives —
/// `(None, Some(hash), Reference)`.
pub fn enforce_size_limit(value: Option<&Value>) -> (Option<Value>, Option<String>, ValueMode) {
    let Some(value) = value else {
        return (None, None, ValueMode::Diff);
    };

    let serialized = canonical_string(value);
    if serialized.len() <= MAX_VALUE_SIZE_BYTES {
        (Some(value.clone()), None, ValueMode::Diff)
    } else {
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        (None, Some(hex::encode(hasher.finalize())), ValueMode::Reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_values_produce_no_diff() {
        let v = json!({"a": 1});
        assert!(compute_diff(Some(&v), Some(&v)).is_none());
        assert!(compute_diff(None, None).is_none());
    }

    #[test]
    fn changed_field_is_a_replace() {
        let old = json!({"status": "open", "qty": 50});
        let new = json!({"status": "closing", "qty": 50});
        let diff = compute_diff(Some(&old), Some(&new)).unwrap();
        let patch = diff["patch"].as_array().unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch[0]["op"], "replace");
        assert_eq!(patch[0]["path"], "/status");
        assert_eq!(patch[0]["value"], "closing");
    }

    #[test]
    fn added_and_removed_fields() {
        let old = json!({"a": 1});
        let new = json!({"b": 2});
        let diff = compute_diff(Some(&old), Some(&new)).unwrap();
        let patch = diff["patch"].as_array().unwrap();
        assert!(patch.iter().any(|op| op["op"] == "remove" && op["path"] == "/a"));
        assert!(patch.iter().any(|op| op["op"] == "add" && op["path"] == "/b"));
    }

    #[test]
    fn creation_diff_from_none() {
        let new = json!({"qty": 100});
        let diff = compute_diff(None, Some(&new)).unwrap();
        let patch = diff["patch"].as_array().unwrap();
        assert_eq!(patch[0]["op"], "add");
    }

    #[test]
    fn nested_changes_carry_full_pointer() {
        let old = json!({"limits": {"max": 10}});
        let new = json!({"limits": {"max": 20}});
        let diff = compute_diff(Some(&old), Some(&new)).unwrap();
        assert_eq!(diff["patch"][0]["path"], "/limits/max");
    }

    #[test]
    fn small_value_stays_inline() {
        let v = json!({"a": 1});
        let (value, hash, mode) = enforce_size_limit(Some(&v));
        assert_eq!(value, Some(v));
        assert!(hash.is_none());
        assert_eq!(mode, ValueMode::Diff);
    }

    #[test]
    fn oversized_value_switches_to_reference_with_matching_hash() {
        let big = json!({"blob": "x".repeat(MAX_VALUE_SIZE_BYTES + 1)});
        let (value, hash, mode) = enforce_size_limit(Some(&big));
        assert!(value.is_none());
        assert_eq!(mode, ValueMode::Reference);

        let mut hasher = Sha256::new();
        hasher.update(canonical_string(&big).as_bytes());
        assert_eq!(hash.unwrap(), hex::encode(hasher.finalize()));
    }
}

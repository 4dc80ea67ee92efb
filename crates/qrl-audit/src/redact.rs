//! Redaction of sensitive fields before audit values are persisted.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Redaction rules: resource type → sensitive field names.
/// The `"*"` key holds rules applied to every resource type.
#[derive(Debug, Clone)]
pub struct RedactionRules {
    rules: BTreeMap<String, BTreeSet<String>>,
}

impl Default for RedactionRules {
    fn default() -> Self {
        let mut rules: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        rules.insert(
            "*".to_string(),
            ["api_key", "api_secret", "password", "token", "credential"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        rules.insert(
            "account".to_string(),
            ["account_number", "tax_id"].iter().map(|s| s.to_string()).collect(),
        );
        Self { rules }
    }
}

impl RedactionRules {
    pub fn new(rules: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { rules }
    }

    /// The union of type-scoped and global field names for a resource type.
    fn sensitive_fields(&self, resource_type: &str) -> BTreeSet<&str> {
        let mut fields: BTreeSet<&str> = BTreeSet::new();
        if let Some(scoped) = self.rules.get(resource_type) {
            fields.extend(scoped.iter().map(String::as_str));
        }
        if let Some(global) = self.rules.get("*") {
            fields.extend(global.iter().map(String::as_str));
        }
        fields
    }
}

/// Mask a sensitive string: first two + last two characters survive.
/// Short strings are fully masked.
pub fn mask_string(value: &str) -> String {
    if value.chars().count() < 4 {
        "****".to_string()
    } else {
        let chars: Vec<char> = value.chars().collect();
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{head}****{tail}")
    }
}

/// Walk a value and mask every field matching the rules for `resource_type`.
/// Non-string sensitive values are fully masked.
pub fn redact_sensitive_fields(
    data: Option<&Value>,
    resource_type: &str,
    rules: &RedactionRules,
) -> Option<Value> {
    let data = data?;
    let sensitive = rules.sensitive_fields(resource_type);
    Some(redact_value(data, &sensitive, None))
}

fn redact_value(value: &Value, sensitive: &BTreeSet<&str>, key: Option<&str>) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), redact_value(v, sensitive, Some(k)));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|item| redact_value(item, sensitive, key))
                .collect(),
        ),
        other => match key {
            Some(k) if sensitive.contains(k) => match other {
                Value::String(s) => Value::String(mask_string(s)),
                _ => Value::String("****".to_string()),
            },
            _ => other.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_keep_first_and_last_two() {
        assert_eq!(mask_string("supersecret"), "su****et");
        assert_eq!(mask_string("abc"), "****");
        assert_eq!(mask_string(""), "****");
    }

    #[test]
    fn global_rules_apply_to_every_type() {
        let rules = RedactionRules::default();
        let data = json!({"api_key": "sk-12345678", "symbol": "AAPL"});
        let out = redact_sensitive_fields(Some(&data), "order", &rules).unwrap();
        assert_eq!(out["api_key"], "sk****78");
        assert_eq!(out["symbol"], "AAPL");
    }

    #[test]
    fn type_scoped_rules_are_additive() {
        let rules = RedactionRules::default();
        let data = json!({"account_number": "123456789", "cash": 100});
        let out = redact_sensitive_fields(Some(&data), "account", &rules).unwrap();
        assert_eq!(out["account_number"], "12****89");
        assert_eq!(out["cash"], 100);

        // Same field outside the scoped type passes through.
        let out = redact_sensitive_fields(Some(&data), "order", &rules).unwrap();
        assert_eq!(out["account_number"], "123456789");
    }

    #[test]
    fn non_string_sensitive_values_fully_masked() {
        let rules = RedactionRules::default();
        let data = json!({"token": 123456});
        let out = redact_sensitive_fields(Some(&data), "order", &rules).unwrap();
        assert_eq!(out["token"], "****");
    }

    #[test]
    fn nested_structures_are_walked() {
        let rules = RedactionRules::default();
        let data = json!({"broker": {"credential": "hunter2secret"}, "legs": [{"password": "pw123456"}]});
        let out = redact_sensitive_fields(Some(&data), "order", &rules).unwrap();
        assert_eq!(out["broker"]["credential"], "hu****et");
        assert_eq!(out["legs"][0]["password"], "pw****56");
    }

    #[test]
    fn none_passes_through() {
        let rules = RedactionRules::default();
        assert!(redact_sensitive_fields(None, "order", &rules).is_none());
    }
}

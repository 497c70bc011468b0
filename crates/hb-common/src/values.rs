//! Chart values: deep merge and parameter hashing

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Nested chart values, as found in `values.yaml` or request parameters
pub type ChartValues = Map<String, Value>;

/// Deep-merge `overrides` into `dest`.
///
/// - keys only present in `overrides` are added
/// - when both sides hold a map, the maps are merged key by key
/// - in every other case the override replaces the destination value
///   (a scalar overriding a map replaces the whole map)
pub fn merge_values(dest: &mut ChartValues, overrides: ChartValues) {
    for (key, value) in overrides {
        match (dest.get_mut(&key), value) {
            (Some(Value::Object(dest_map)), Value::Object(src_map)) => {
                merge_values(dest_map, src_map);
            }
            (_, value) => {
                dest.insert(key, value);
            }
        }
    }
}

/// Merge overrides on top of a copy of the defaults, leaving `defaults` intact
pub fn merged(defaults: &ChartValues, overrides: ChartValues) -> ChartValues {
    let mut out = defaults.clone();
    merge_values(&mut out, overrides);
    out
}

/// Stable hash of provisioning parameters.
///
/// Object keys are sorted recursively before hashing so that two requests with
/// the same parameters in a different key order hash identically.
pub fn params_hash(params: &ChartValues) -> String {
    let canonical = canonicalize(&Value::Object(params.clone()));
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    URL_SAFE.encode(Sha256::digest(&bytes))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> ChartValues {
        match v {
            Value::Object(m) => m,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_nested_maps_merge_key_by_key() {
        let mut dest = values(json!({"a": 1, "b": {"x": 1, "y": 2}}));
        merge_values(&mut dest, values(json!({"b": {"x": 9}, "c": 3})));
        assert_eq!(
            Value::Object(dest),
            json!({"a": 1, "b": {"x": 9, "y": 2}, "c": 3})
        );
    }

    #[test]
    fn test_scalar_override_replaces_map() {
        let mut dest = values(json!({"b": {"x": 1, "y": 2}}));
        merge_values(&mut dest, values(json!({"b": "flat"})));
        assert_eq!(Value::Object(dest), json!({"b": "flat"}));
    }

    #[test]
    fn test_map_override_replaces_scalar() {
        let mut dest = values(json!({"b": 7}));
        merge_values(&mut dest, values(json!({"b": {"x": 1}})));
        assert_eq!(Value::Object(dest), json!({"b": {"x": 1}}));
    }

    #[test]
    fn test_deep_nesting() {
        let mut dest = values(json!({"db": {"auth": {"user": "admin", "pass": "x"}, "port": 5432}}));
        merge_values(&mut dest, values(json!({"db": {"auth": {"pass": "y"}}})));
        assert_eq!(
            Value::Object(dest),
            json!({"db": {"auth": {"user": "admin", "pass": "y"}, "port": 5432}})
        );
    }

    #[test]
    fn test_merged_leaves_defaults_untouched() {
        let defaults = values(json!({"replicas": 1, "image": {"tag": "6.0"}}));
        let out = merged(&defaults, values(json!({"image": {"tag": "7.0"}})));
        assert_eq!(defaults["image"]["tag"], "6.0");
        assert_eq!(out["image"]["tag"], "7.0");
        assert_eq!(out["replicas"], 1);
    }

    #[test]
    fn test_params_hash_ignores_key_order() {
        let a = values(json!({"a": 1, "b": {"y": 2, "x": 1}}));
        let b = values(json!({"b": {"x": 1, "y": 2}, "a": 1}));
        assert_eq!(params_hash(&a), params_hash(&b));
    }

    #[test]
    fn test_params_hash_differs_on_values() {
        let a = values(json!({"a": 1}));
        let b = values(json!({"a": 2}));
        assert_ne!(params_hash(&a), params_hash(&b));
        assert_eq!(params_hash(&ChartValues::new()), params_hash(&ChartValues::new()));
    }
}

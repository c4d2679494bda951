//! Canonical JSON + HMAC-SHA-256 hashing used for both price-snapshot
//! attestation and opening-price commitment hashes.
//!
//! Canonicalization sorts object keys recursively so that two
//! semantically identical JSON values always hash the same way
//! regardless of field insertion order.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).expect("canonical json values always serialize")
}

pub fn hmac_hash(key: &str, payload: &Value) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("hmac accepts any key length");
    mac.update(canonical_json(payload).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalization_is_order_independent() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn hmac_is_deterministic() {
        let payload = json!({"pair": "BTC-USD", "price": 50000.5});
        let h1 = hmac_hash("key", &payload);
        let h2 = hmac_hash("key", &payload);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hmac_differs_on_key() {
        let payload = json!({"pair": "BTC-USD"});
        assert_ne!(hmac_hash("key1", &payload), hmac_hash("key2", &payload));
    }
}

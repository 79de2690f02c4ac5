// src/gateway/signature.rs
//
// Webhook signature scheme for providers that HMAC-sign their callbacks:
// the JSON body is canonicalized (recursive, deterministic key order),
// HMAC-SHA256'd with the shared secret and hex-encoded. Canonicalization
// is mandatory so reordering parameters cannot produce a fresh valid
// signature for tampered content.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compact JSON with object keys emitted in sorted order, recursively.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key serialization cannot fail for a plain string.
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Hex HMAC-SHA256 over the canonical form of a JSON body.
/// Returns None when the body is not valid JSON.
pub fn sign(raw_body: &[u8], secret: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(raw_body).ok()?;
    let canonical = canonical_json(&value);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(canonical.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification. Any parse or shape failure returns false;
/// this never errors into caller logic.
pub fn verify(raw_body: &[u8], provided: &str, secret: &str) -> bool {
    match sign(raw_body, secret) {
        Some(expected) => bool::from(expected.as_bytes().ct_eq(provided.as_bytes())),
        None => false,
    }
}

/// Constant-time comparison of a static callback token (providers that
/// authenticate with a shared header value instead of a body signature).
pub fn token_matches(provided: &str, expected: &str) -> bool {
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_form_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"d": 2, "c": [1, 2]}});
        let b = json!({"a": {"c": [1, 2], "d": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"c":[1,2],"d":2},"b":1}"#);
    }

    #[test]
    fn verify_accepts_reordered_payload() {
        let secret = "shared-secret";
        let body = br#"{"amount":"25.00","currency":"USD","order_id":"o1"}"#;
        let sig = sign(body, secret).unwrap();

        let reordered = br#"{"order_id":"o1","amount":"25.00","currency":"USD"}"#;
        assert!(verify(reordered, &sig, secret));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let secret = "shared-secret";
        let body = br#"{"amount":"25.00","currency":"USD"}"#;
        let sig = sign(body, secret).unwrap();

        let tampered = br#"{"amount":"2500.00","currency":"USD"}"#;
        assert!(!verify(tampered, &sig, secret));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(!verify(b"not json", "deadbeef", "secret"));
        assert!(!verify(br#"{"a":1}"#, "", "secret"));
    }
}

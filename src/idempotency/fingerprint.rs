//! Key hash and request fingerprint: both derived with SHA-256 so
//! the stored record never carries the client-supplied key in the clear.

use sha2::{Digest, Sha256};

pub fn hash_key(idempotency_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(idempotency_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of method + path + canonicalized body, used to detect two
/// different requests reusing the same Idempotency-Key.
pub fn fingerprint(method: &str, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\0");
    hasher.update(path.as_bytes());
    hasher.update(b"\0");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_hashes_identically() {
        assert_eq!(hash_key("abc"), hash_key("abc"));
    }

    #[test]
    fn different_keys_hash_differently() {
        assert_ne!(hash_key("abc"), hash_key("abd"));
    }

    #[test]
    fn fingerprint_differs_on_body_change() {
        let a = fingerprint("POST", "/v1/messages", b"{\"a\":1}");
        let b = fingerprint("POST", "/v1/messages", b"{\"a\":2}");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_path_change() {
        let a = fingerprint("POST", "/v1/messages", b"{}");
        let b = fingerprint("POST", "/v1/chat/completions", b"{}");
        assert_ne!(a, b);
    }
}

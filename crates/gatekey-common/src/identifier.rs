use sha2::{Digest, Sha256};

/// Derives the stable opaque handle used to name an upstream key everywhere
/// outside of the secret itself: logs, the DB primary key, operator output.
pub fn key_identifier(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let prefix = &hex_of(&digest)[..8];
    format!("key_sha256_{prefix}")
}

fn hex_of(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::key_identifier;

    #[test]
    fn derivation_is_deterministic_and_prefixed() {
        let a = key_identifier("sk-test-secret");
        let b = key_identifier("sk-test-secret");
        assert_eq!(a, b);
        assert!(a.starts_with("key_sha256_"));
        assert_eq!(a.len(), "key_sha256_".len() + 8);
    }

    #[test]
    fn distinct_secrets_derive_distinct_identifiers() {
        assert_ne!(key_identifier("sk-one"), key_identifier("sk-two"));
    }
}

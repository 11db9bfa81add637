//! Deterministic identities. The same request name always derives the same
//! id, which is what makes create paths idempotent across restarts.

use sha2::{Digest, Sha256};

/// Prefix of every volume id.
pub const VOLUME_ID_PREFIX: &str = "pvc-";
const HEX_LEN: usize = 16;

/// `pvc-` + first 16 hex of SHA-256 of the CSI request name.
pub fn volume_id(request_name: &str) -> String {
    format!("{VOLUME_ID_PREFIX}{}", digest16(request_name))
}

/// First 16 hex of SHA-256 of `source_volume_id + "/" + request_name`.
/// Scoping by source volume keeps equal snapshot names from colliding across
/// namespaces.
pub fn snapshot_id(source_volume_id: &str, request_name: &str) -> String {
    digest16(&format!("{source_volume_id}/{request_name}"))
}

fn digest16(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..HEX_LEN / 2])
}

/// Whether a string is a well-formed volume id.
pub fn valid_volume_id(id: &str) -> bool {
    match id.strip_prefix(VOLUME_ID_PREFIX) {
        Some(tail) => tail.len() == HEX_LEN && tail.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Whether a string is a well-formed snapshot id.
pub fn valid_snapshot_id(id: &str) -> bool {
    id.len() == HEX_LEN && id.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_ids_are_stable() {
        let id = volume_id("my-pvc");
        assert_eq!(id, volume_id("my-pvc"));
        assert_ne!(id, volume_id("other-pvc"));
        assert!(valid_volume_id(&id));
        assert_eq!(id.len(), 4 + 16);
    }

    #[test]
    fn snapshot_ids_scope_by_source_volume() {
        let a = snapshot_id("pvc-aaaaaaaaaaaaaaaa", "snap1");
        let b = snapshot_id("pvc-bbbbbbbbbbbbbbbb", "snap1");
        assert_ne!(a, b);
        assert!(valid_snapshot_id(&a));
    }

    #[test]
    fn validation_rejects_malformed_ids() {
        assert!(!valid_volume_id("pvc-short"));
        assert!(!valid_volume_id("vol-0011223344556677"));
        assert!(!valid_volume_id("pvc-00112233445566zz"));
        assert!(!valid_snapshot_id("0011"));
    }
}

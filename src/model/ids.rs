//! Group-id derivation. Every variant hashes a type-dependent tuple with
//! SHA-256 and renders the digest as lowercase hex, grounded in
//! `original_source/.../peer_to_peer_group.c::GenerateGroupId` and
//! `.../across_account_group.c::GenerateGroupId`.

use sha2::{Digest, Sha256};

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// `sha256_hex(group_name | "|" | app_id)`.
pub fn peer_to_peer_group_id(group_name: &str, app_id: &str) -> String {
    sha256_hex(&[group_name, app_id])
}

/// `sha256_hex(user_id_hash)`.
pub fn identical_account_group_id(user_id_hash: &str) -> String {
    sha256_hex(&[user_id_hash])
}

/// `sha256_hex(sorted(user_id_hash, shared_user_id_hash) joined by "|")`.
/// Sorting the pair means both sides of the relationship compute the same
/// id regardless of which one initiated it.
pub fn across_account_group_id(user_id_hash: &str, shared_user_id_hash: &str) -> String {
    let (first, second) = if user_id_hash <= shared_user_id_hash {
        (user_id_hash, shared_user_id_hash)
    } else {
        (shared_user_id_hash, user_id_hash)
    };
    sha256_hex(&[first, second])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_to_peer_matches_spec_scenario() {
        let id = peer_to_peer_group_id("livingroom", "com.huawei.devauth.test");
        let mut hasher = Sha256::new();
        hasher.update(b"livingroom|com.huawei.devauth.test");
        assert_eq!(id, hex::encode(hasher.finalize()));
    }

    #[test]
    fn across_account_is_symmetric() {
        let a = across_account_group_id("UID_AAAA", "UID_BBBB");
        let b = across_account_group_id("UID_BBBB", "UID_AAAA");
        assert_eq!(a, b);
    }

    #[test]
    fn across_account_matches_spec_scenario() {
        let id = across_account_group_id("UID_AAAA", "UID_BBBB");
        let expected = sha256_hex(&["UID_AAAA", "UID_BBBB"]);
        assert_eq!(id, expected);
    }

    #[test]
    fn identical_account_is_pure_function_of_user_id_hash() {
        assert_eq!(
            identical_account_group_id("abc"),
            identical_account_group_id("abc")
        );
        assert_ne!(
            identical_account_group_id("abc"),
            identical_account_group_id("def")
        );
    }
}

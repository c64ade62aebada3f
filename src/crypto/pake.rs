//! PIN-based bind handshake primitives (spec.md §4.5). No PAKE/SPAKE2
//! crate appears anywhere in this crate's lineage, so the exchange is
//! built from primitives that are: Argon2id stretches the PIN into a
//! base key (teacher pattern, `crypto/hashing.rs`), combined with an
//! ephemeral X25519 ECDH and HKDF-SHA256 (teacher pattern,
//! `crypto/encryption.rs::derive_root_key`) into the session key, and a
//! session-key-keyed HMAC over the handshake transcript stands in for
//! the PAKE proof-of-possession step (teacher pattern: HMAC-over-payload
//! in `network/packet.rs`, retargeted at a transcript instead of a wire
//! packet). This is a deliberate substitution, not an attempt to
//! reinvent a real PAKE — see DESIGN.md.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

use super::adapter::{CryptoAdapter, CryptoError};

const PAKE_INFO: &[u8] = b"devicetrust-pake-v1";
const ARGON2_MEM_KIB: u32 = 19_456;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;

/// Stretches a short PIN into a 32-byte PAKE base key.
pub fn stretch_pin(pin: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = Params::new(ARGON2_MEM_KIB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, Some(32))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; 32];
    argon2
        .hash_password_into(pin.as_bytes(), salt, &mut out)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(out)
}

/// Combines the PIN base key with the ECDH shared secret and binds both
/// to the handshake transcript so far.
pub fn derive_session_key(
    adapter: &dyn CryptoAdapter,
    pin_base: &[u8; 32],
    ecdh_shared: &[u8; 32],
    transcript: &[u8],
) -> Result<[u8; 32], CryptoError> {
    let mut ikm = Vec::with_capacity(64);
    ikm.extend_from_slice(pin_base);
    ikm.extend_from_slice(ecdh_shared);
    let mut okm = adapter.hkdf_sha256(&ikm, transcript, PAKE_INFO, 32)?;
    ikm.zeroize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&okm);
    okm.zeroize();
    Ok(out)
}

/// Proof-of-possession: an HMAC over the transcript, keyed by the
/// derived session key. Both sides recompute and compare to confirm
/// they landed on the same key.
pub fn commitment(adapter: &dyn CryptoAdapter, session_key: &[u8; 32], transcript: &[u8]) -> [u8; 32] {
    adapter.hmac_sha256(session_key, transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::software::SoftwareCryptoAdapter;

    #[test]
    fn same_pin_and_transcript_derive_same_session_key() {
        let adapter = SoftwareCryptoAdapter::new();
        let salt = b"fixed-salt-for-test-only";
        let base = stretch_pin("123456789012345", salt).unwrap();
        let shared = [9u8; 32];
        let transcript = b"m1||m2";
        let k1 = derive_session_key(&adapter, &base, &shared, transcript).unwrap();
        let k2 = derive_session_key(&adapter, &base, &shared, transcript).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_pin_derives_different_session_key() {
        let adapter = SoftwareCryptoAdapter::new();
        let salt = b"fixed-salt-for-test-only";
        let base1 = stretch_pin("123456789012345", salt).unwrap();
        let base2 = stretch_pin("000000000000000", salt).unwrap();
        let shared = [9u8; 32];
        let k1 = derive_session_key(&adapter, &base1, &shared, b"transcript").unwrap();
        let k2 = derive_session_key(&adapter, &base2, &shared, b"transcript").unwrap();
        assert_ne!(k1, k2);
    }
}

//! STS-style re-auth handshake primitives (spec.md §4.5): ECDH between
//! stored static X25519 keys, HKDF-derived session key, each side signs
//! the transcript with its stored Ed25519 key (teacher pattern,
//! `crypto/signing.rs`) and the peer verifies.

use super::adapter::{CryptoAdapter, CryptoError, KeyId};

const STS_INFO: &[u8] = b"devicetrust-sts-v1";

pub fn derive_session_key(adapter: &dyn CryptoAdapter, ecdh_shared: &[u8; 32], transcript: &[u8]) -> Result<[u8; 32], CryptoError> {
    let okm = adapter.hkdf_sha256(ecdh_shared, transcript, STS_INFO, 32)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&okm);
    Ok(out)
}

pub fn sign_transcript(adapter: &dyn CryptoAdapter, signing_key_id: &KeyId, transcript: &[u8]) -> Result<[u8; 64], CryptoError> {
    adapter.sign_ed25519(signing_key_id, transcript)
}

pub fn verify_transcript(
    adapter: &dyn CryptoAdapter,
    peer_public_key: &[u8; 32],
    transcript: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    adapter.verify_ed25519(peer_public_key, transcript, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::software::SoftwareCryptoAdapter;

    #[test]
    fn sign_then_verify_with_matching_public_key_succeeds() {
        let adapter = SoftwareCryptoAdapter::new();
        let public = adapter.generate_ed25519_keypair(&"dev-key".to_string()).unwrap();
        let sig = sign_transcript(&adapter, &"dev-key".to_string(), b"m1||m2").unwrap();
        assert!(verify_transcript(&adapter, &public, b"m1||m2", &sig).is_ok());
    }

    #[test]
    fn tampered_transcript_fails_verification() {
        let adapter = SoftwareCryptoAdapter::new();
        let public = adapter.generate_ed25519_keypair(&"dev-key".to_string()).unwrap();
        let sig = sign_transcript(&adapter, &"dev-key".to_string(), b"m1||m2").unwrap();
        assert!(verify_transcript(&adapter, &public, b"tampered", &sig).is_err());
    }
}

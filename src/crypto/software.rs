//! Default [`CryptoAdapter`] implementation, backed by the crates named
//! in spec.md's external-interfaces section: `x25519-dalek`,
//! `ed25519-dalek`, `sha2`, `hmac`, `hkdf`, `aes-gcm`. The opaque key
//! store is an in-process `Mutex<HashMap<KeyId, StoredKey>>` — there is
//! no real OS keystore FFI in scope, so this plays that role for
//! development and testing.

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key as AesKey, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use super::adapter::{CryptoAdapter, CryptoError, KeyId};

enum StoredKey {
    X25519(StaticSecret),
    Ed25519(SigningKey),
}

#[derive(Default)]
pub struct SoftwareCryptoAdapter {
    keys: Mutex<HashMap<KeyId, StoredKey>>,
}

impl SoftwareCryptoAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CryptoAdapter for SoftwareCryptoAdapter {
    fn generate_x25519_keypair(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        self.keys.lock().unwrap().insert(key_id.clone(), StoredKey::X25519(secret));
        Ok(public.to_bytes())
    }

    fn generate_ed25519_keypair(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key();
        self.keys.lock().unwrap().insert(key_id.clone(), StoredKey::Ed25519(signing_key));
        Ok(public.to_bytes())
    }

    fn export_x25519_public(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError> {
        match self.keys.lock().unwrap().get(key_id) {
            Some(StoredKey::X25519(secret)) => Ok(PublicKey::from(secret).to_bytes()),
            Some(_) => Err(CryptoError::InvalidKey(format!("{key_id} is not an x25519 key"))),
            None => Err(CryptoError::KeyNotFound(key_id.clone())),
        }
    }

    fn export_ed25519_public(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError> {
        match self.keys.lock().unwrap().get(key_id) {
            Some(StoredKey::Ed25519(signing_key)) => Ok(signing_key.verifying_key().to_bytes()),
            Some(_) => Err(CryptoError::InvalidKey(format!("{key_id} is not an ed25519 key"))),
            None => Err(CryptoError::KeyNotFound(key_id.clone())),
        }
    }

    fn ecdh_x25519(&self, key_id: &KeyId, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
        let keys = self.keys.lock().unwrap();
        match keys.get(key_id) {
            Some(StoredKey::X25519(secret)) => {
                let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
                Ok(shared.to_bytes())
            }
            Some(_) => Err(CryptoError::InvalidKey(format!("{key_id} is not an x25519 key"))),
            None => Err(CryptoError::KeyNotFound(key_id.clone())),
        }
    }

    fn sign_ed25519(&self, key_id: &KeyId, message: &[u8]) -> Result<[u8; 64], CryptoError> {
        let keys = self.keys.lock().unwrap();
        match keys.get(key_id) {
            Some(StoredKey::Ed25519(signing_key)) => Ok(signing_key.sign(message).to_bytes()),
            Some(_) => Err(CryptoError::InvalidKey(format!("{key_id} is not an ed25519 key"))),
            None => Err(CryptoError::KeyNotFound(key_id.clone())),
        }
    }

    fn verify_ed25519(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_bytes(public_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_bytes(signature);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerifyFailed)
    }

    fn hkdf_sha256(&self, ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut out = vec![0u8; out_len];
        hk.expand(info, &mut out)
            .map_err(|_| CryptoError::InvalidKey("hkdf output length invalid".into()))?;
        Ok(out)
    }

    fn hmac_sha256(&self, key: &[u8], message: &[u8]) -> [u8; 32] {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(message);
        let result = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }

    fn sha256(&self, message: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(message);
        hasher.finalize().into()
    }

    fn aes_gcm_seal(&self, key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));
        cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::DecryptFailed)
    }

    fn aes_gcm_open(&self, key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::DecryptFailed)
    }

    fn erase_key(&self, key_id: &KeyId) {
        self.keys.lock().unwrap().remove(key_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_ecdh_agrees_both_directions() {
        let a = SoftwareCryptoAdapter::new();
        let b = SoftwareCryptoAdapter::new();
        let a_pub = a.generate_x25519_keypair(&"a".to_string()).unwrap();
        let b_pub = b.generate_x25519_keypair(&"b".to_string()).unwrap();

        let shared_a = a.ecdh_x25519(&"a".to_string(), &b_pub).unwrap();
        let shared_b = b.ecdh_x25519(&"b".to_string(), &a_pub).unwrap();
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn ed25519_sign_then_verify_round_trips() {
        let adapter = SoftwareCryptoAdapter::new();
        let public = adapter.generate_ed25519_keypair(&"k".to_string()).unwrap();
        let sig = adapter.sign_ed25519(&"k".to_string(), b"hello").unwrap();
        assert!(adapter.verify_ed25519(&public, b"hello", &sig).is_ok());
        assert!(adapter.verify_ed25519(&public, b"tampered", &sig).is_err());
    }

    #[test]
    fn aes_gcm_round_trips_and_rejects_tamper() {
        let adapter = SoftwareCryptoAdapter::new();
        let key = [7u8; 32];
        let nonce = [1u8; 12];
        let ct = adapter.aes_gcm_seal(&key, &nonce, b"aad", b"secret message").unwrap();
        let pt = adapter.aes_gcm_open(&key, &nonce, b"aad", &ct).unwrap();
        assert_eq!(pt, b"secret message");

        let mut tampered = ct.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        assert!(adapter.aes_gcm_open(&key, &nonce, b"aad", &tampered).is_err());
    }

    #[test]
    fn erase_key_removes_stored_material() {
        let adapter = SoftwareCryptoAdapter::new();
        adapter.generate_x25519_keypair(&"k".to_string()).unwrap();
        adapter.erase_key(&"k".to_string());
        assert!(adapter.export_x25519_public(&"k".to_string()).is_err());
    }
}

//! The "opaque OS key store" collaborator (spec.md §1, §6): opaque key
//! generate/sign/verify plus SHA-256/HMAC/HKDF/AES-GCM. Modeled as a
//! trait so the subsystem never depends on a concrete keystore, matching
//! how the rest of this crate treats hardware/platform collaborators.

use thiserror::Error;

pub type KeyId = String;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("signature verification failed")]
    VerifyFailed,
    #[error("authenticated decryption failed")]
    DecryptFailed,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("random generation failed: {0}")]
    Rng(String),
}

pub trait CryptoAdapter: Send + Sync {
    /// Generates and stores an X25519 keypair under `key_id`, returning
    /// the public half.
    fn generate_x25519_keypair(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError>;

    /// Generates and stores an Ed25519 keypair under `key_id`, returning
    /// the public half.
    fn generate_ed25519_keypair(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError>;

    fn export_x25519_public(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError>;

    fn export_ed25519_public(&self, key_id: &KeyId) -> Result<[u8; 32], CryptoError>;

    fn ecdh_x25519(&self, key_id: &KeyId, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError>;

    fn sign_ed25519(&self, key_id: &KeyId, message: &[u8]) -> Result<[u8; 64], CryptoError>;

    fn verify_ed25519(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError>;

    fn hkdf_sha256(&self, ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>, CryptoError>;

    fn hmac_sha256(&self, key: &[u8], message: &[u8]) -> [u8; 32];

    fn sha256(&self, message: &[u8]) -> [u8; 32];

    fn aes_gcm_seal(&self, key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn aes_gcm_open(&self, key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Best-effort: no guarantee the key ever existed.
    fn erase_key(&self, key_id: &KeyId);
}

//! Symmetric keys and X25519 key agreement for key distribution.
//!
//! Community and channel keys are ChaCha20-Poly1305 keys. They reach members
//! wrapped under an X25519 agreement with the member's identity key, taken in
//! its Montgomery form, so no separate encryption key has to be published.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use cohort_core::{Keypair, PublicKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey as DalekPublicKey, StaticSecret};

use crate::error::{PermsError, Result};

const WRAP_CONTEXT: &str = "cohort key wrap v0";

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The agreement key of a member identity.
    pub fn from_identity(identity: &PublicKey) -> Result<Self> {
        Ok(Self(identity.to_montgomery_bytes()?))
    }

    fn to_dalek(self) -> DalekPublicKey {
        DalekPublicKey::from(self.0)
    }
}

/// An X25519 static secret.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// The agreement secret matching [`X25519PublicKey::from_identity`].
    pub fn from_identity(identity: &Keypair) -> Self {
        Self(StaticSecret::from(identity.to_x25519_scalar()))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(*DalekPublicKey::from(&self.0).as_bytes())
    }

    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        SharedKey(*self.0.diffie_hellman(&peer_public.to_dalek()).as_bytes())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive a wrapping key bound to `context`.
    pub fn derive_encryption_key(&self, context: &[u8]) -> EncryptionKey {
        let mut hasher = blake3::Hasher::new_derive_key(WRAP_CONTEXT);
        hasher.update(&self.0);
        hasher.update(context);
        EncryptionKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit ChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::EncryptionError(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| PermsError::EncryptionError(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::DecryptionError(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| PermsError::DecryptionError(e.to_string()))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; 12]);

impl EncryptionNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey(*DalekPublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the ephemeral secret.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        SharedKey(*self.secret.diffie_hellman(&peer_public.to_dalek()).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keys_agree() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let alice_secret = X25519StaticSecret::from_identity(&alice);
        let bob_secret = X25519StaticSecret::from_identity(&bob);
        let alice_public = X25519PublicKey::from_identity(&alice.public_key()).unwrap();
        let bob_public = X25519PublicKey::from_identity(&bob.public_key()).unwrap();

        assert_eq!(alice_secret.public_key(), alice_public);
        assert_eq!(
            alice_secret.diffie_hellman(&bob_public).0,
            bob_secret.diffie_hellman(&alice_public).0
        );
    }

    #[test]
    fn test_ephemeral_key_agreement() {
        let bob_secret = X25519StaticSecret::generate();
        let bob_public = bob_secret.public_key();

        let alice_ephemeral = EphemeralKeyPair::generate();
        let alice_ephemeral_public = alice_ephemeral.public_key();
        let alice_shared = alice_ephemeral.diffie_hellman(&bob_public);

        let bob_shared = bob_secret.diffie_hellman(&alice_ephemeral_public);
        assert_eq!(alice_shared.0, bob_shared.0);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = EncryptionKey::generate();
        let nonce = EncryptionNonce::generate();

        let ciphertext = key.encrypt(b"channel key", &nonce).unwrap();
        assert_ne!(ciphertext, b"channel key");
        assert_eq!(key.decrypt(&ciphertext, &nonce).unwrap(), b"channel key");
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let nonce = EncryptionNonce::generate();
        let ciphertext = EncryptionKey::generate().encrypt(b"secret", &nonce).unwrap();
        assert!(EncryptionKey::generate().decrypt(&ciphertext, &nonce).is_err());
    }

    #[test]
    fn test_key_derivation_separates_contexts() {
        let shared = SharedKey([0x42; 32]);
        assert_eq!(
            shared.derive_encryption_key(b"a").as_bytes(),
            shared.derive_encryption_key(b"a").as_bytes()
        );
        assert_ne!(
            shared.derive_encryption_key(b"a").as_bytes(),
            shared.derive_encryption_key(b"b").as_bytes()
        );
    }
}

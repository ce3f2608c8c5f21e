//! Per-recipient wrapping of community and channel keys.

use serde::{Deserialize, Serialize};

use cohort_core::{ChatId, CommunityId, KeyId, Keypair, PublicKey};

use crate::crypto::{
    EncryptionKey, EncryptionNonce, EphemeralKeyPair, X25519PublicKey, X25519StaticSecret,
};
use crate::error::{PermsError, Result};

/// Which key a wrapped key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyScope {
    Community,
    Channel(ChatId),
}

impl KeyScope {
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            KeyScope::Community => None,
            KeyScope::Channel(id) => Some(*id),
        }
    }
}

/// A symmetric key encrypted for one recipient.
///
/// The wrapping key comes from an ephemeral X25519 agreement with the
/// recipient's identity key, bound to the community, scope and key id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub community_id: CommunityId,
    pub scope: KeyScope,
    pub key_id: KeyId,
    pub recipient: PublicKey,
    pub ephemeral_public: X25519PublicKey,
    pub encrypted_key: Vec<u8>,
    pub nonce: EncryptionNonce,
}

impl WrappedKey {
    fn context(community_id: &CommunityId, scope: &KeyScope, key_id: &KeyId) -> Vec<u8> {
        let mut context = Vec::with_capacity(97);
        context.extend_from_slice(community_id.as_bytes());
        match scope {
            KeyScope::Community => context.push(0),
            KeyScope::Channel(chat) => {
                context.push(1);
                context.extend_from_slice(chat.as_bytes());
            }
        }
        context.extend_from_slice(key_id.as_bytes());
        context
    }

    /// Wrap `key` for `recipient`.
    pub fn wrap(
        community_id: CommunityId,
        scope: KeyScope,
        key_id: KeyId,
        key: &EncryptionKey,
        recipient: PublicKey,
    ) -> Result<Self> {
        let recipient_public = X25519PublicKey::from_identity(&recipient)?;
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let wrap_key = ephemeral
            .diffie_hellman(&recipient_public)
            .derive_encryption_key(&Self::context(&community_id, &scope, &key_id));

        let nonce = EncryptionNonce::generate();
        let encrypted_key = wrap_key.encrypt(key.as_bytes(), &nonce)?;
        Ok(Self {
            community_id,
            scope,
            key_id,
            recipient,
            ephemeral_public,
            encrypted_key,
            nonce,
        })
    }

    /// Recover the key with the recipient's identity.
    pub fn unwrap_with(&self, identity: &Keypair) -> Result<EncryptionKey> {
        let shared = X25519StaticSecret::from_identity(identity).diffie_hellman(&self.ephemeral_public);
        let wrap_key =
            shared.derive_encryption_key(&Self::context(&self.community_id, &self.scope, &self.key_id));
        let key_bytes = wrap_key.decrypt(&self.encrypted_key, &self.nonce)?;

        let arr: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            PermsError::DecryptionError(format!(
                "invalid key length: expected 32, got {}",
                key_bytes.len()
            ))
        })?;
        Ok(EncryptionKey::from_bytes(arr))
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community() -> CommunityId {
        CommunityId::from_key(&Keypair::generate().public_key())
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let recipient = Keypair::generate();
        let key = EncryptionKey::generate();
        let wrapped = WrappedKey::wrap(
            community(),
            KeyScope::Community,
            KeyId::random(),
            &key,
            recipient.public_key(),
        )
        .unwrap();

        assert_eq!(wrapped.unwrap_with(&recipient).unwrap(), key);
    }

    #[test]
    fn test_wrong_recipient_cannot_unwrap() {
        let recipient = Keypair::generate();
        let outsider = Keypair::generate();
        let wrapped = WrappedKey::wrap(
            community(),
            KeyScope::Channel(ChatId::random()),
            KeyId::random(),
            &EncryptionKey::generate(),
            recipient.public_key(),
        )
        .unwrap();

        assert!(wrapped.unwrap_with(&outsider).is_err());
    }

    #[test]
    fn test_rebinding_scope_breaks_unwrap() {
        let recipient = Keypair::generate();
        let mut wrapped = WrappedKey::wrap(
            community(),
            KeyScope::Community,
            KeyId::random(),
            &EncryptionKey::generate(),
            recipient.public_key(),
        )
        .unwrap();
        wrapped.scope = KeyScope::Channel(ChatId::random());

        assert!(wrapped.unwrap_with(&recipient).is_err());
    }

    #[test]
    fn test_wrapped_key_serialization() {
        let recipient = Keypair::generate();
        let wrapped = WrappedKey::wrap(
            community(),
            KeyScope::Community,
            KeyId::random(),
            &EncryptionKey::generate(),
            recipient.public_key(),
        )
        .unwrap();

        let recovered = WrappedKey::from_bytes(&wrapped.to_bytes().unwrap()).unwrap();
        assert_eq!(wrapped, recovered);
    }
}

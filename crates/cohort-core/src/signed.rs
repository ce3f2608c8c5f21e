//! Signed community descriptions as they travel between peers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_bytes, decode};
use crate::crypto::{Digest, Keypair, PublicKey, Signature};
use crate::description::Description;
use crate::error::CoreError;
use crate::types::CommunityId;

/// Signing context for community descriptions.
pub const DESCRIPTION_CONTEXT: &str = "cohort description v0";

/// Digest context for comparing replicas.
pub const DIGEST_CONTEXT: &str = "cohort description digest v0";

/// A description encoded canonically and signed with the community key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDescription {
    pub payload: Bytes,
    pub signature: Signature,
}

impl SignedDescription {
    /// Sign a description. The key must be the community key.
    pub fn sign(description: &Description, community_key: &Keypair) -> Result<Self, CoreError> {
        if CommunityId::from_key(&community_key.public_key()) != description.community_id {
            return Err(CoreError::InvalidPublicKey);
        }
        let payload = canonical_bytes(description)?;
        let signature = community_key.sign_in_context(DESCRIPTION_CONTEXT, &payload);
        Ok(Self {
            payload: Bytes::from(payload),
            signature,
        })
    }

    /// Verify against the community key and decode.
    pub fn open(&self, community: &CommunityId) -> Result<Description, CoreError> {
        community
            .public_key()
            .verify_in_context(DESCRIPTION_CONTEXT, &self.payload, &self.signature)?;
        let description: Description = decode(&self.payload)?;
        if description.community_id != *community {
            return Err(CoreError::DecodingError(format!(
                "description for {} signed as {}",
                description.community_id, community
            )));
        }
        Ok(description)
    }

    /// Decode without verifying. Only for payloads read back from local storage.
    pub fn decode_unverified(&self) -> Result<Description, CoreError> {
        decode(&self.payload)
    }

    pub fn digest(&self) -> Digest {
        Digest::derive(DIGEST_CONTEXT, &self.payload)
    }
}

/// Replica digest of a description.
pub fn description_digest(description: &Description) -> Result<Digest, CoreError> {
    Ok(Digest::derive(DIGEST_CONTEXT, &canonical_bytes(description)?))
}

/// Whether `author` may sign structural edits of `description`.
pub fn is_control_node(description: &Description, author: &PublicKey) -> bool {
    description.control_node == *author
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{AccessSettings, CommunityIdentity};

    fn community() -> (Keypair, Description) {
        let key = Keypair::generate();
        let description = Description::new(
            CommunityId::from_key(&key.public_key()),
            Keypair::generate().public_key(),
            CommunityIdentity::named("signed"),
            AccessSettings::default(),
        );
        (key, description)
    }

    #[test]
    fn test_sign_and_open() {
        let (key, description) = community();
        let signed = SignedDescription::sign(&description, &key).unwrap();
        assert_eq!(signed.open(&description.community_id).unwrap(), description);
    }

    #[test]
    fn test_open_rejects_tampered_payload() {
        let (key, description) = community();
        let mut signed = SignedDescription::sign(&description, &key).unwrap();
        let mut payload = signed.payload.to_vec();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        signed.payload = Bytes::from(payload);
        assert!(signed.open(&description.community_id).is_err());
    }

    #[test]
    fn test_sign_requires_community_key() {
        let (_, description) = community();
        let stranger = Keypair::generate();
        assert!(matches!(
            SignedDescription::sign(&description, &stranger),
            Err(CoreError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_digest_matches_for_equal_descriptions() {
        let (key, description) = community();
        let signed = SignedDescription::sign(&description, &key).unwrap();
        assert_eq!(signed.digest(), description_digest(&description.clone()).unwrap());
    }
}

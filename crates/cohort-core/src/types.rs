//! Strong identifier types for Cohort.
//!
//! All identifiers are newtypes to prevent mixing a chat id with a category
//! id or a permission id at compile time.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::PublicKey;

/// Numeric identifier of a blockchain network.
pub type ChainId = u64;

macro_rules! id32 {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Generate a fresh random identifier.
            pub fn random() -> Self {
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }
    };
}

id32!(
    /// A community identifier: the bytes of the community's Ed25519 public key.
    ///
    /// Descriptions are signed by the matching private key, so the id doubles
    /// as the verification key for every description of the community.
    CommunityId,
    "CommunityId"
);

id32!(
    /// Identifier of a channel within a community.
    ChatId,
    "ChatId"
);

id32!(
    /// Identifier of a channel category.
    CategoryId,
    "CategoryId"
);

id32!(
    /// Identifier of a token permission.
    PermissionId,
    "PermissionId"
);

id32!(
    /// Deterministic identifier of a request to join.
    ///
    /// Derived from the requester and the community, so every request cycle
    /// for the same pair shares one id.
    RequestId,
    "RequestId"
);

id32!(
    /// Identifier of a generation of a community or channel encryption key.
    KeyId,
    "KeyId"
);

impl CommunityId {
    /// The community id for a community key.
    pub fn from_key(key: &PublicKey) -> Self {
        Self(*key.as_bytes())
    }

    /// The public key that signs this community's descriptions.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.0)
    }
}

impl RequestId {
    /// Derive the request id for a requester and community.
    pub fn derive(requester: &PublicKey, community: &CommunityId) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"cohort-request-v0:");
        hasher.update(requester.as_bytes());
        hasher.update(b":");
        hasher.update(community.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

/// A 20-byte account address, used both for wallets and token contracts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The wallet address controlled by a wallet public key.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let digest = blake3::hash(key.as_bytes());
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&digest.as_bytes()[..20]);
        Self(arr)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to `0x`-prefixed hex string.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex string, with or without `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

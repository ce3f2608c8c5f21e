//! Signed wire envelope.
//!
//! Every protocol message is encoded canonically and signed by the sending
//! identity. Receivers learn the sender from the envelope, never from the
//! message body.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cohort_core::{canonical_bytes, decode, Keypair, PublicKey, Signature};

use crate::error::{Result, SyncError};
use crate::messages::{limits, ProtocolMessage, PROTOCOL_VERSION};

/// Signing context for protocol envelopes.
pub const ENVELOPE_CONTEXT: &str = "cohort envelope v0";

/// A protocol message signed by its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub version: u8,
    pub sender: PublicKey,
    pub payload: Bytes,
    pub signature: Signature,
}

fn signed_bytes(version: u8, payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(payload.len() + 1);
    msg.push(version);
    msg.extend_from_slice(payload);
    msg
}

impl SignedEnvelope {
    /// Encode and sign `message` as `signer`.
    pub fn seal(message: &ProtocolMessage, signer: &Keypair) -> Result<Self> {
        message
            .validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        let payload = canonical_bytes(message)?;
        if payload.len() > limits::MAX_MESSAGE_BYTES {
            return Err(SyncError::InvalidMessage(format!(
                "payload of {} bytes exceeds limit",
                payload.len()
            )));
        }
        let signature = signer.sign_in_context(ENVELOPE_CONTEXT, &signed_bytes(PROTOCOL_VERSION, &payload));
        Ok(Self {
            version: PROTOCOL_VERSION,
            sender: signer.public_key(),
            payload: Bytes::from(payload),
            signature,
        })
    }

    /// Verify the sender's signature and decode the message.
    pub fn open(&self) -> Result<ProtocolMessage> {
        if self.version != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: self.version,
            });
        }
        if self.payload.len() > limits::MAX_MESSAGE_BYTES {
            return Err(SyncError::InvalidMessage("payload exceeds limit".into()));
        }
        self.sender.verify_in_context(
            ENVELOPE_CONTEXT,
            &signed_bytes(self.version, &self.payload),
            &self.signature,
        )?;
        let message: ProtocolMessage = decode(&self.payload)?;
        message
            .validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::CommunityId;

    fn message() -> ProtocolMessage {
        ProtocolMessage::ShareAccountsAndRejoin {
            community_id: CommunityId::from_key(&Keypair::generate().public_key()),
            clock: 7,
        }
    }

    #[test]
    fn test_seal_and_open() {
        let sender = Keypair::generate();
        let message = message();
        let envelope = SignedEnvelope::seal(&message, &sender).unwrap();

        assert_eq!(envelope.sender, sender.public_key());
        assert_eq!(envelope.open().unwrap(), message);
    }

    #[test]
    fn test_forged_sender_rejected() {
        let mut envelope = SignedEnvelope::seal(&message(), &Keypair::generate()).unwrap();
        envelope.sender = Keypair::generate().public_key();
        assert!(matches!(envelope.open(), Err(SyncError::CoreError(_))));
    }

    #[test]
    fn test_version_mismatch() {
        let mut envelope = SignedEnvelope::seal(&message(), &Keypair::generate()).unwrap();
        envelope.version = PROTOCOL_VERSION + 1;
        assert!(matches!(envelope.open(), Err(SyncError::VersionMismatch { .. })));
    }
}

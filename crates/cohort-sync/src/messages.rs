//! Protocol message types.
//!
//! These messages travel between members of a community inside a
//! [`SignedEnvelope`](crate::envelope::SignedEnvelope).

use serde::{Deserialize, Serialize};

use cohort_core::{
    CommunityId, PublicKey, RequestId, RequestState, RequestToJoin, RevealedAccount,
    SignedDescription,
};
use cohort_perms::WrappedKey;

use crate::privileged::PrivilegedSync;

/// Peers are addressed by their identity key.
pub type NodeId = PublicKey;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits.
pub mod limits {
    /// Max encoded size of a message payload.
    pub const MAX_MESSAGE_BYTES: usize = 1 << 20;
    /// Max accounts revealed in one request or edit.
    pub const MAX_REVEALED_ACCOUNTS: usize = 20;
    /// Max chains per revealed account.
    pub const MAX_CHAIN_IDS: usize = 32;
    /// Max wrapped keys in one key message.
    pub const MAX_WRAPPED_KEYS: usize = 256;
    /// Max requests in one privileged sync.
    pub const MAX_SYNC_REQUESTS: usize = 1_000;
    /// Max ENS name length.
    pub const MAX_ENS_NAME_LEN: usize = 255;
}

/// Community protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// The control node's latest description.
    Description {
        community_id: CommunityId,
        description: SignedDescription,
    },

    /// A request to join, sent by the requester.
    RequestToJoin { request: RequestToJoin },

    /// The requester withdraws its request.
    CancelRequestToJoin {
        community_id: CommunityId,
        /// Requester clock, unix seconds.
        clock: u64,
    },

    /// A member leaves the community.
    RequestToLeave {
        community_id: CommunityId,
        /// Member clock, unix seconds. Not older than its request to join.
        clock: u64,
    },

    /// The control node's answer to a request to join.
    RequestToJoinResponse {
        community_id: CommunityId,
        request_id: RequestId,
        accepted: bool,
        clock: u64,
        /// Description including the new member, when accepted.
        description: Option<SignedDescription>,
    },

    /// A member replaces the accounts it revealed.
    EditSharedAddresses {
        community_id: CommunityId,
        /// Member clock, unix seconds.
        clock: u64,
        revealed_accounts: Vec<RevealedAccount>,
    },

    /// Community or channel keys wrapped for the recipient.
    EncryptionKeys {
        community_id: CommunityId,
        keys: Vec<WrappedKey>,
    },

    /// Requests to join replicated from the control node to privileged members.
    PrivilegedUserSync(PrivilegedSync),

    /// A TokenMaster's decision, forwarded to the control node to finalize.
    RequestToJoinDecision {
        community_id: CommunityId,
        request_id: RequestId,
        /// [`RequestState::AcceptedPending`] or [`RequestState::DeclinedPending`].
        state: RequestState,
        clock: u64,
    },

    /// Sent to members removed by a new control node: reveal accounts again.
    ShareAccountsAndRejoin {
        community_id: CommunityId,
        clock: u64,
    },
}

impl ProtocolMessage {
    /// The community the message belongs to.
    pub fn community_id(&self) -> CommunityId {
        match self {
            ProtocolMessage::Description { community_id, .. }
            | ProtocolMessage::CancelRequestToJoin { community_id, .. }
            | ProtocolMessage::RequestToLeave { community_id, .. }
            | ProtocolMessage::RequestToJoinResponse { community_id, .. }
            | ProtocolMessage::EditSharedAddresses { community_id, .. }
            | ProtocolMessage::EncryptionKeys { community_id, .. }
            | ProtocolMessage::RequestToJoinDecision { community_id, .. }
            | ProtocolMessage::ShareAccountsAndRejoin { community_id, .. } => *community_id,
            ProtocolMessage::RequestToJoin { request } => request.community_id,
            ProtocolMessage::PrivilegedUserSync(sync) => sync.community_id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::Description { .. } => "description",
            ProtocolMessage::RequestToJoin { .. } => "request_to_join",
            ProtocolMessage::CancelRequestToJoin { .. } => "cancel_request_to_join",
            ProtocolMessage::RequestToLeave { .. } => "request_to_leave",
            ProtocolMessage::RequestToJoinResponse { .. } => "request_to_join_response",
            ProtocolMessage::EditSharedAddresses { .. } => "edit_shared_addresses",
            ProtocolMessage::EncryptionKeys { .. } => "encryption_keys",
            ProtocolMessage::PrivilegedUserSync(_) => "privileged_user_sync",
            ProtocolMessage::RequestToJoinDecision { .. } => "request_to_join_decision",
            ProtocolMessage::ShareAccountsAndRejoin { .. } => "share_accounts_and_rejoin",
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            ProtocolMessage::RequestToJoin { request } => {
                check_request(request)?;
            }
            ProtocolMessage::EditSharedAddresses {
                revealed_accounts, ..
            } => {
                check_accounts(revealed_accounts)?;
            }
            ProtocolMessage::EncryptionKeys { keys, .. } => {
                if keys.len() > limits::MAX_WRAPPED_KEYS {
                    return Err("too many wrapped keys");
                }
            }
            ProtocolMessage::PrivilegedUserSync(sync) => {
                if sync.requests.len() > limits::MAX_SYNC_REQUESTS {
                    return Err("too many synced requests");
                }
                for request in &sync.requests {
                    check_request(request)?;
                }
            }
            ProtocolMessage::Description { .. }
            | ProtocolMessage::CancelRequestToJoin { .. }
            | ProtocolMessage::RequestToLeave { .. }
            | ProtocolMessage::RequestToJoinResponse { .. }
            | ProtocolMessage::RequestToJoinDecision { .. }
            | ProtocolMessage::ShareAccountsAndRejoin { .. } => {}
        }
        Ok(())
    }
}

fn check_request(request: &RequestToJoin) -> Result<(), &'static str> {
    if request
        .ens_name
        .as_ref()
        .is_some_and(|name| name.len() > limits::MAX_ENS_NAME_LEN)
    {
        return Err("ENS name too long");
    }
    check_accounts(&request.revealed_accounts)
}

fn check_accounts(accounts: &[RevealedAccount]) -> Result<(), &'static str> {
    if accounts.len() > limits::MAX_REVEALED_ACCOUNTS {
        return Err("too many revealed accounts");
    }
    if accounts
        .iter()
        .any(|account| account.chain_ids.len() > limits::MAX_CHAIN_IDS)
    {
        return Err("too many chain ids");
    }
    Ok(())
}

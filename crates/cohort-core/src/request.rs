//! Requests to join and the revealed accounts that back them.

use serde::{Deserialize, Serialize};

use crate::clock::Clocked;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::types::{Address, ChainId, CommunityId, RequestId};

/// Signing context for revealed-account ownership proofs.
pub const REVEAL_CONTEXT: &str = "cohort reveal v0";

/// Lifecycle state of a request to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Pending,
    Accepted,
    Declined,
    Canceled,
    /// Accepted by a TokenMaster, awaiting the control node.
    AcceptedPending,
    /// Declined by a TokenMaster, awaiting the control node.
    DeclinedPending,
    /// Created by a new control node for a kicked member who must re-reveal.
    AwaitingAddresses,
}

impl RequestState {
    /// Whether the control node has taken a final decision.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Accepted | RequestState::Declined | RequestState::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Accepted => "accepted",
            RequestState::Declined => "declined",
            RequestState::Canceled => "canceled",
            RequestState::AcceptedPending => "accepted_pending",
            RequestState::DeclinedPending => "declined_pending",
            RequestState::AwaitingAddresses => "awaiting_addresses",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => RequestState::Pending,
            "accepted" => RequestState::Accepted,
            "declined" => RequestState::Declined,
            "canceled" => RequestState::Canceled,
            "accepted_pending" => RequestState::AcceptedPending,
            "declined_pending" => RequestState::DeclinedPending,
            "awaiting_addresses" => RequestState::AwaitingAddresses,
            _ => return None,
        })
    }
}

/// The message a wallet signs to prove it belongs to `requester`.
pub fn reveal_message(requester: &PublicKey, community: &CommunityId) -> Vec<u8> {
    let mut msg = Vec::with_capacity(64);
    msg.extend_from_slice(requester.as_bytes());
    msg.extend_from_slice(community.as_bytes());
    msg
}

/// A wallet address disclosed to a community, with proof of control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedAccount {
    pub address: Address,
    /// The wallet key the address is derived from.
    pub wallet_key: PublicKey,
    /// Wallet signature over [`reveal_message`].
    pub signature: Signature,
    /// Chains the member wants this account checked on.
    pub chain_ids: Vec<ChainId>,
    pub is_airdrop_address: bool,
}

impl RevealedAccount {
    /// Reveal `wallet` to `community` on behalf of `requester`.
    pub fn sign(
        wallet: &Keypair,
        requester: &PublicKey,
        community: &CommunityId,
        chain_ids: Vec<ChainId>,
    ) -> Self {
        let wallet_key = wallet.public_key();
        Self {
            address: Address::from_public_key(&wallet_key),
            wallet_key,
            signature: wallet.sign_in_context(REVEAL_CONTEXT, &reveal_message(requester, community)),
            chain_ids,
            is_airdrop_address: false,
        }
    }

    /// Check that the address belongs to the wallet key and that the wallet
    /// signed on behalf of `requester`.
    pub fn verify(&self, requester: &PublicKey, community: &CommunityId) -> Result<(), CoreError> {
        if Address::from_public_key(&self.wallet_key) != self.address {
            return Err(CoreError::AddressMismatch {
                address: self.address.to_hex(),
            });
        }
        self.wallet_key.verify_in_context(
            REVEAL_CONTEXT,
            &reveal_message(requester, community),
            &self.signature,
        )
    }
}

/// A request by an identity to join a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestToJoin {
    pub id: RequestId,
    pub public_key: PublicKey,
    pub community_id: CommunityId,
    /// Requester clock, in unix seconds.
    pub clock: u64,
    pub ens_name: Option<String>,
    pub state: RequestState,
    pub revealed_accounts: Vec<RevealedAccount>,
    /// Set on the requester's own copy.
    pub our: bool,
}

impl RequestToJoin {
    pub fn new(
        public_key: PublicKey,
        community_id: CommunityId,
        clock: u64,
        revealed_accounts: Vec<RevealedAccount>,
    ) -> Self {
        Self {
            id: RequestId::derive(&public_key, &community_id),
            public_key,
            community_id,
            clock,
            ens_name: None,
            state: RequestState::Pending,
            revealed_accounts,
            our: false,
        }
    }

    /// Verify every revealed account against the requester.
    pub fn verify_accounts(&self) -> Result<(), CoreError> {
        self.revealed_accounts
            .iter()
            .try_for_each(|account| account.verify(&self.public_key, &self.community_id))
    }

    /// Whether an earlier decline still blocks a request made at `clock`.
    pub fn should_retain_declined(&self, clock: u64, cooloff_secs: u64) -> bool {
        self.state == RequestState::Declined && clock < self.clock.saturating_add(cooloff_secs)
    }

    /// The addresses disclosed with this request.
    pub fn addresses(&self) -> Vec<Address> {
        self.revealed_accounts.iter().map(|a| a.address).collect()
    }

    /// A copy with revealed accounts stripped, for non-privileged recipients.
    pub fn without_accounts(&self) -> Self {
        Self {
            revealed_accounts: Vec::new(),
            ..self.clone()
        }
    }
}

impl Clocked for RequestToJoin {
    fn clock(&self) -> u64 {
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community() -> CommunityId {
        CommunityId::from_key(&Keypair::generate().public_key())
    }

    #[test]
    fn test_revealed_account_verifies_for_requester() {
        let requester = Keypair::generate().public_key();
        let wallet = Keypair::generate();
        let community = community();

        let account = RevealedAccount::sign(&wallet, &requester, &community, vec![1]);
        assert!(account.verify(&requester, &community).is_ok());
    }

    #[test]
    fn test_revealed_account_rejects_other_requester() {
        let requester = Keypair::generate().public_key();
        let impostor = Keypair::generate().public_key();
        let wallet = Keypair::generate();
        let community = community();

        let account = RevealedAccount::sign(&wallet, &requester, &community, vec![1]);
        assert!(matches!(
            account.verify(&impostor, &community),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_revealed_account_rejects_spoofed_address() {
        let requester = Keypair::generate().public_key();
        let wallet = Keypair::generate();
        let community = community();

        let mut account = RevealedAccount::sign(&wallet, &requester, &community, vec![1]);
        account.address = Address::from_bytes([0xee; 20]);
        assert!(matches!(
            account.verify(&requester, &community),
            Err(CoreError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_request_id_matches_derivation() {
        let requester = Keypair::generate().public_key();
        let community = community();
        let request = RequestToJoin::new(requester, community, 10, vec![]);
        assert_eq!(request.id, RequestId::derive(&requester, &community));
        assert_eq!(request.state, RequestState::Pending);
    }

    #[test]
    fn test_retain_declined_within_cooloff() {
        let mut request = RequestToJoin::new(Keypair::generate().public_key(), community(), 1_000, vec![]);
        assert!(!request.should_retain_declined(1_001, 100));

        request.state = RequestState::Declined;
        assert!(request.should_retain_declined(1_050, 100));
        assert!(!request.should_retain_declined(1_100, 100));
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in [
            RequestState::Pending,
            RequestState::Accepted,
            RequestState::Declined,
            RequestState::Canceled,
            RequestState::AcceptedPending,
            RequestState::DeclinedPending,
            RequestState::AwaitingAddresses,
        ] {
            assert_eq!(RequestState::parse(state.as_str()), Some(state));
        }
    }
}

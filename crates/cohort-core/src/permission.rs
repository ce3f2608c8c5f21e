//! Token permissions and the criteria they gate on.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::clock::Clocked;
use crate::types::{Address, ChainId, ChatId, PermissionId};

/// What a satisfied token permission grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PermissionType {
    BecomeMember,
    BecomeAdmin,
    BecomeTokenMaster,
    /// Reserved for the owner token; never evaluated for members.
    BecomeOwner,
    CanViewChannel,
    CanViewAndPostChannel,
}

impl PermissionType {
    /// Whether the permission is scoped to channels rather than the community.
    pub fn is_channel_permission(&self) -> bool {
        matches!(
            self,
            PermissionType::CanViewChannel | PermissionType::CanViewAndPostChannel
        )
    }

    /// Whether the permission grants a privileged role.
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            PermissionType::BecomeAdmin
                | PermissionType::BecomeTokenMaster
                | PermissionType::BecomeOwner
        )
    }
}

/// The kind of asset a criterion checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Erc20,
    Erc721,
    Ens,
}

/// One requirement inside a token permission.
///
/// Criteria of a single permission are AND'd together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCriteria {
    pub token_type: TokenType,
    /// Contract address per chain. A criterion is satisfiable on any of them.
    pub contract_addresses: BTreeMap<ChainId, Address>,
    pub symbol: String,
    /// Human-readable amount, as entered by the community owner.
    pub amount: String,
    /// Amount in the token's smallest unit.
    pub amount_in_wei: u128,
    pub decimals: u8,
    /// Specific ERC721 token ids; empty means any token of the collection.
    pub token_ids: BTreeSet<u128>,
    /// ENS name or `*.parent` suffix pattern.
    pub ens_pattern: String,
}

impl TokenCriteria {
    /// An ERC20 balance requirement of `amount` whole tokens.
    pub fn erc20(
        chain_id: ChainId,
        contract: Address,
        symbol: &str,
        amount: u128,
        decimals: u8,
    ) -> Self {
        Self {
            token_type: TokenType::Erc20,
            contract_addresses: BTreeMap::from([(chain_id, contract)]),
            symbol: symbol.to_string(),
            amount: amount.to_string(),
            amount_in_wei: amount.saturating_mul(10u128.saturating_pow(decimals as u32)),
            decimals,
            token_ids: BTreeSet::new(),
            ens_pattern: String::new(),
        }
    }

    /// An ERC721 ownership requirement.
    pub fn erc721(chain_id: ChainId, contract: Address, symbol: &str, count: u128) -> Self {
        Self {
            token_type: TokenType::Erc721,
            contract_addresses: BTreeMap::from([(chain_id, contract)]),
            symbol: symbol.to_string(),
            amount: count.to_string(),
            amount_in_wei: count,
            decimals: 0,
            token_ids: BTreeSet::new(),
            ens_pattern: String::new(),
        }
    }

    /// An ENS ownership requirement.
    pub fn ens(pattern: &str) -> Self {
        Self {
            token_type: TokenType::Ens,
            contract_addresses: BTreeMap::new(),
            symbol: String::new(),
            amount: String::new(),
            amount_in_wei: 0,
            decimals: 0,
            token_ids: BTreeSet::new(),
            ens_pattern: pattern.to_string(),
        }
    }

    /// Restrict an ERC721 criterion to specific token ids.
    pub fn with_token_ids(mut self, ids: impl IntoIterator<Item = u128>) -> Self {
        self.token_ids = ids.into_iter().collect();
        self
    }

    /// The threshold a wallet must reach. ERC721 criteria default to one token.
    pub fn required_amount(&self) -> u128 {
        match self.token_type {
            TokenType::Erc721 if self.amount_in_wei == 0 => 1,
            _ => self.amount_in_wei,
        }
    }

    /// Whether an owned ENS name satisfies the pattern.
    ///
    /// `*.parent` matches subdomains of `parent` at a label boundary, not
    /// `parent` itself. Any other pattern matches exactly.
    pub fn matches_ens(&self, name: &str) -> bool {
        match self.ens_pattern.strip_prefix('*') {
            Some(suffix) if suffix.starts_with('.') => name.len() > suffix.len() && name.ends_with(suffix),
            _ => name == self.ens_pattern,
        }
    }
}

/// A token-gated permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPermission {
    pub id: PermissionId,
    pub permission_type: PermissionType,
    pub criteria: Vec<TokenCriteria>,
    /// Channels a channel permission applies to.
    pub chat_ids: BTreeSet<ChatId>,
    /// Hidden permissions are not advertised to non-members.
    pub is_private: bool,
    /// Description clock at which this permission last changed.
    pub clock: u64,
}

impl TokenPermission {
    pub fn new(permission_type: PermissionType, criteria: Vec<TokenCriteria>) -> Self {
        Self {
            id: PermissionId::random(),
            permission_type,
            criteria,
            chat_ids: BTreeSet::new(),
            is_private: false,
            clock: 0,
        }
    }

    /// Scope a channel permission to the given chats.
    pub fn for_chats(mut self, chats: impl IntoIterator<Item = ChatId>) -> Self {
        self.chat_ids = chats.into_iter().collect();
        self
    }

    /// All chain ids referenced by any criterion.
    pub fn chain_ids(&self) -> BTreeSet<ChainId> {
        self.criteria
            .iter()
            .flat_map(|c| c.contract_addresses.keys().copied())
            .collect()
    }
}

impl Clocked for TokenPermission {
    fn clock(&self) -> u64 {
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erc20_amount_scaled_by_decimals() {
        let criteria = TokenCriteria::erc20(1, Address::from_bytes([1; 20]), "TEST", 100, 18);
        assert_eq!(criteria.amount_in_wei, 100 * 10u128.pow(18));
        assert_eq!(criteria.required_amount(), criteria.amount_in_wei);
    }

    #[test]
    fn test_erc721_defaults_to_one_token() {
        let mut criteria = TokenCriteria::erc721(1, Address::from_bytes([2; 20]), "NFT", 0);
        assert_eq!(criteria.required_amount(), 1);
        criteria.amount_in_wei = 3;
        assert_eq!(criteria.required_amount(), 3);
    }

    #[test]
    fn test_ens_exact_and_suffix_patterns() {
        let exact = TokenCriteria::ens("alice.eth");
        assert!(exact.matches_ens("alice.eth"));
        assert!(!exact.matches_ens("bob.alice.eth"));

        let suffix = TokenCriteria::ens("*.cohort.eth");
        assert!(suffix.matches_ens("bob.cohort.eth"));
        assert!(!suffix.matches_ens("bob.other.eth"));
        assert!(suffix.matches_ens("a.b.cohort.eth"));
    }

    #[test]
    fn test_ens_suffix_respects_label_boundary() {
        let suffix = TokenCriteria::ens("*.cohort.eth");
        assert!(!suffix.matches_ens("evilcohort.eth"));
        assert!(!suffix.matches_ens("cohort.eth"));
        assert!(!suffix.matches_ens(".cohort.eth"));
    }

    #[test]
    fn test_channel_permission_classification() {
        assert!(PermissionType::CanViewChannel.is_channel_permission());
        assert!(!PermissionType::BecomeMember.is_channel_permission());
        assert!(PermissionType::BecomeTokenMaster.is_privileged());
        assert!(!PermissionType::BecomeMember.is_privileged());
    }
}

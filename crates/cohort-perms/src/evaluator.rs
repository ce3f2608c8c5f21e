//! Token criteria evaluation against a balance snapshot.
//!
//! Criteria inside one permission are AND'd. Permissions of the same type
//! are OR'd. Member roles are resolved by checking BecomeTokenMaster, then
//! BecomeAdmin, then BecomeMember; the first satisfied type wins.

use std::collections::{BTreeMap, BTreeSet};

use cohort_core::{
    Address, ChainId, ChannelRole, ChatId, Description, PermissionId, PermissionType, Privilege,
    RevealedAccount, TokenCriteria, TokenPermission, TokenType,
};
use serde::{Deserialize, Serialize};

use crate::balances::BalanceSnapshot;
use crate::error::{PermsError, Result};

/// Chain on which ENS names are resolved.
pub const ENS_CHAIN_ID: ChainId = 1;

/// How ERC20 balances of several accounts combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Erc20Aggregation {
    /// A single account must hold the full amount.
    #[default]
    PerAddress,
    /// Balances of all eligible accounts and chains are added up.
    SummedAcrossAccounts,
}

/// Evaluator tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub erc20_aggregation: Erc20Aggregation,
}

/// A wallet offered for evaluation and the chains it may be checked on.
///
/// An empty chain set means every chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountChains {
    pub address: Address,
    pub chain_ids: BTreeSet<ChainId>,
}

impl AccountChains {
    pub fn any_chain(address: Address) -> Self {
        Self {
            address,
            chain_ids: BTreeSet::new(),
        }
    }

    fn covers(&self, chain_id: ChainId) -> bool {
        self.chain_ids.is_empty() || self.chain_ids.contains(&chain_id)
    }
}

impl From<&RevealedAccount> for AccountChains {
    fn from(account: &RevealedAccount) -> Self {
        Self {
            address: account.address,
            chain_ids: account.chain_ids.iter().copied().collect(),
        }
    }
}

/// Convert revealed accounts into evaluation input.
pub fn accounts_of(revealed: &[RevealedAccount]) -> Vec<AccountChains> {
    revealed.iter().map(AccountChains::from).collect()
}

/// Result of one criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub satisfied: bool,
    pub satisfying_address: Option<Address>,
}

/// Result of a list of AND'd criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaEvaluation {
    pub satisfied: bool,
    /// The account satisfying the first criterion, when all are satisfied.
    pub satisfying_address: Option<Address>,
    pub criteria: Vec<CriterionResult>,
}

/// Result of one permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResult {
    pub permission_type: PermissionType,
    pub satisfied: bool,
    pub criteria: Vec<CriterionResult>,
}

/// Detailed outcome of checking a set of OR'd permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPermissionsResponse {
    pub satisfied: bool,
    pub permissions: BTreeMap<PermissionId, PermissionResult>,
    /// Accounts and the chains on which they contributed to a criterion.
    pub valid_combinations: BTreeMap<Address, BTreeSet<ChainId>>,
}

impl CheckPermissionsResponse {
    /// Combine two responses for OR'd permission sets.
    pub fn merge(mut self, other: CheckPermissionsResponse) -> Self {
        self.satisfied |= other.satisfied;
        self.permissions.extend(other.permissions);
        for (address, chains) in other.valid_combinations {
            self.valid_combinations.entry(address).or_default().extend(chains);
        }
        self
    }
}

/// Channel access of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPermissionsResponse {
    pub chat_id: ChatId,
    pub view_only: CheckPermissionsResponse,
    pub view_and_post: CheckPermissionsResponse,
}

impl ChannelPermissionsResponse {
    /// The role these results grant, if any.
    pub fn role(&self) -> Option<ChannelRole> {
        if self.view_and_post.satisfied {
            Some(ChannelRole::Poster)
        } else if self.view_only.satisfied {
            Some(ChannelRole::Viewer)
        } else {
            None
        }
    }
}

/// Evaluates token permissions.
#[derive(Debug, Clone, Default)]
pub struct PermissionEvaluator {
    config: EvaluatorConfig,
}

impl PermissionEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Criteria
    // ─────────────────────────────────────────────────────────────────────

    fn criterion(
        &self,
        criteria: &TokenCriteria,
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
        combinations: &mut BTreeMap<Address, BTreeSet<ChainId>>,
    ) -> CriterionResult {
        let mut satisfying = None;
        match criteria.token_type {
            TokenType::Ens => {
                for account in accounts.iter().filter(|a| a.covers(ENS_CHAIN_ID)) {
                    if snapshot.ens_names(&account.address).any(|n| criteria.matches_ens(n)) {
                        combinations.entry(account.address).or_default().insert(ENS_CHAIN_ID);
                        satisfying.get_or_insert(account.address);
                    }
                }
            }
            TokenType::Erc721 => {
                for (chain, contract) in &criteria.contract_addresses {
                    for account in accounts.iter().filter(|a| a.covers(*chain)) {
                        let held = if criteria.token_ids.is_empty() {
                            snapshot.balance(*chain, &account.address, contract) >= criteria.required_amount()
                        } else {
                            snapshot
                                .tokens(*chain, &account.address, contract)
                                .is_some_and(|owned| !owned.is_disjoint(&criteria.token_ids))
                        };
                        if held {
                            combinations.entry(account.address).or_default().insert(*chain);
                            satisfying.get_or_insert(account.address);
                        }
                    }
                }
            }
            TokenType::Erc20 => {
                let required = criteria.required_amount();
                let mut total: u128 = 0;
                for (chain, contract) in &criteria.contract_addresses {
                    for account in accounts.iter().filter(|a| a.covers(*chain)) {
                        let balance = snapshot.balance(*chain, &account.address, contract);
                        if balance == 0 {
                            continue;
                        }
                        match self.config.erc20_aggregation {
                            Erc20Aggregation::PerAddress => {
                                if balance >= required {
                                    combinations.entry(account.address).or_default().insert(*chain);
                                    satisfying.get_or_insert(account.address);
                                }
                            }
                            Erc20Aggregation::SummedAcrossAccounts => {
                                total = total.saturating_add(balance);
                                combinations.entry(account.address).or_default().insert(*chain);
                                satisfying.get_or_insert(account.address);
                            }
                        }
                    }
                }
                if self.config.erc20_aggregation == Erc20Aggregation::SummedAcrossAccounts
                    && total < required
                {
                    satisfying = None;
                }
            }
        }
        CriterionResult {
            satisfied: satisfying.is_some(),
            satisfying_address: satisfying,
        }
    }

    /// Evaluate AND'd criteria for wallets usable on every chain.
    pub fn evaluate_criteria(
        &self,
        criteria: &[TokenCriteria],
        snapshot: &BalanceSnapshot,
        wallets: &[Address],
    ) -> CriteriaEvaluation {
        let accounts: Vec<AccountChains> = wallets.iter().copied().map(AccountChains::any_chain).collect();
        let mut combinations = BTreeMap::new();
        let results: Vec<CriterionResult> = criteria
            .iter()
            .map(|c| self.criterion(c, &accounts, snapshot, &mut combinations))
            .collect();
        let satisfied = !results.is_empty() && results.iter().all(|r| r.satisfied);
        CriteriaEvaluation {
            satisfied,
            satisfying_address: satisfied.then(|| results[0].satisfying_address).flatten(),
            criteria: results,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────

    /// Check OR'd permissions. With `short_circuit`, evaluation stops at the
    /// first satisfied permission.
    pub fn check_permissions(
        &self,
        permissions: &[&TokenPermission],
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
        short_circuit: bool,
    ) -> Result<CheckPermissionsResponse> {
        let token_chains: BTreeSet<ChainId> = permissions
            .iter()
            .flat_map(|p| &p.criteria)
            .filter(|c| c.token_type != TokenType::Ens)
            .flat_map(|c| c.contract_addresses.keys().copied())
            .collect();
        let has_ens = permissions
            .iter()
            .flat_map(|p| &p.criteria)
            .any(|c| c.token_type == TokenType::Ens);
        let reachable = token_chains.iter().any(|chain| accounts.iter().any(|a| a.covers(*chain)));
        if !token_chains.is_empty() && !reachable && !has_ens {
            return Err(PermsError::NetworksNotSupported);
        }

        let mut response = CheckPermissionsResponse::default();
        for permission in permissions {
            let criteria: Vec<CriterionResult> = permission
                .criteria
                .iter()
                .map(|c| self.criterion(c, accounts, snapshot, &mut response.valid_combinations))
                .collect();
            let satisfied = !criteria.is_empty() && criteria.iter().all(|r| r.satisfied);
            response.satisfied |= satisfied;
            response.permissions.insert(
                permission.id,
                PermissionResult {
                    permission_type: permission.permission_type,
                    satisfied,
                    criteria,
                },
            );
            if short_circuit && satisfied {
                break;
            }
        }
        Ok(response)
    }

    /// Like [`check_permissions`](Self::check_permissions), but an empty set
    /// is satisfied by anyone.
    pub fn check_permissions_or_default(
        &self,
        permissions: &[&TokenPermission],
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
    ) -> Result<CheckPermissionsResponse> {
        if permissions.is_empty() {
            return Ok(CheckPermissionsResponse {
                satisfied: true,
                permissions: BTreeMap::new(),
                valid_combinations: accounts
                    .iter()
                    .map(|a| (a.address, a.chain_ids.clone()))
                    .collect(),
            });
        }
        self.check_permissions(permissions, accounts, snapshot, false)
    }

    /// Whether any permission of `permission_type` is satisfied.
    ///
    /// `None` when the description carries no permission of that type.
    pub fn satisfies_type(
        &self,
        description: &Description,
        permission_type: PermissionType,
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
    ) -> Option<bool> {
        let permissions = description.permissions_of_type(permission_type);
        if permissions.is_empty() {
            return None;
        }
        Some(
            self.check_permissions(&permissions, accounts, snapshot, true)
                .map(|r| r.satisfied)
                .unwrap_or(false),
        )
    }

    /// Whether the accounts may join `description`.
    ///
    /// Satisfying a BecomeAdmin or BecomeTokenMaster permission also grants
    /// entry.
    pub fn check_permission_to_join(
        &self,
        description: &Description,
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
    ) -> Result<CheckPermissionsResponse> {
        let member = description.permissions_of_type(PermissionType::BecomeMember);
        let mut privileged = description.permissions_of_type(PermissionType::BecomeAdmin);
        privileged.extend(description.permissions_of_type(PermissionType::BecomeTokenMaster));

        let member = self.check_permissions_or_default(&member, accounts, snapshot);
        if privileged.is_empty() {
            return member;
        }
        let privileged = self.check_permissions(&privileged, accounts, snapshot, false);
        match (member, privileged) {
            (Ok(member), Ok(privileged)) => Ok(member.merge(privileged)),
            (Ok(response), Err(_)) | (Err(_), Ok(response)) => Ok(response),
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// The role granted by token permissions alone.
    ///
    /// Returns [`Privilege::None`] when a BecomeMember gate exists and is not
    /// satisfied, and never returns [`Privilege::ControlNode`].
    pub fn evaluate_member_role(
        &self,
        description: &Description,
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
    ) -> Privilege {
        let satisfied = |permission_type| {
            self.satisfies_type(description, permission_type, accounts, snapshot)
        };
        if satisfied(PermissionType::BecomeTokenMaster) == Some(true) {
            return Privilege::TokenMaster;
        }
        if satisfied(PermissionType::BecomeAdmin) == Some(true) {
            return Privilege::Admin;
        }
        match satisfied(PermissionType::BecomeMember) {
            Some(false) => Privilege::None,
            _ => Privilege::Member,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────────────

    /// Check view and post permissions of one chat.
    ///
    /// A chat without channel permissions is open to every member.
    pub fn check_channel_permissions(
        &self,
        description: &Description,
        chat_id: &ChatId,
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
    ) -> Result<ChannelPermissionsResponse> {
        let permissions = description.channel_permissions(chat_id);
        let (view_and_post, view_only): (Vec<&TokenPermission>, Vec<&TokenPermission>) = permissions
            .into_iter()
            .partition(|p| p.permission_type == PermissionType::CanViewAndPostChannel);

        if view_only.is_empty() && view_and_post.is_empty() {
            let open = CheckPermissionsResponse {
                satisfied: true,
                ..Default::default()
            };
            return Ok(ChannelPermissionsResponse {
                chat_id: *chat_id,
                view_only: open.clone(),
                view_and_post: open,
            });
        }

        let check = |set: &[&TokenPermission]| -> Result<CheckPermissionsResponse> {
            if set.is_empty() {
                return Ok(CheckPermissionsResponse::default());
            }
            match self.check_permissions(set, accounts, snapshot, false) {
                Err(PermsError::NetworksNotSupported) => Ok(CheckPermissionsResponse::default()),
                other => other,
            }
        };
        let view_and_post = check(&view_and_post)?;
        let mut view_only = check(&view_only)?;
        view_only.satisfied |= view_and_post.satisfied;
        Ok(ChannelPermissionsResponse {
            chat_id: *chat_id,
            view_only,
            view_and_post,
        })
    }

    /// The channel role the accounts earn in one chat.
    pub fn channel_role(
        &self,
        description: &Description,
        chat_id: &ChatId,
        accounts: &[AccountChains],
        snapshot: &BalanceSnapshot,
    ) -> Option<ChannelRole> {
        self.check_channel_permissions(description, chat_id, accounts, snapshot)
            .ok()
            .and_then(|response| response.role())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{AccessSettings, Chat, CommunityId, CommunityIdentity, Keypair};
    use proptest::prelude::*;

    const DECIMALS: u8 = 18;

    fn contract() -> Address {
        Address::from_bytes([0xc0; 20])
    }

    fn wallet(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn tokens(n: u128) -> u128 {
        n * 10u128.pow(DECIMALS as u32)
    }

    fn erc20(amount: u128) -> TokenCriteria {
        TokenCriteria::erc20(1, contract(), "TEST", amount, DECIMALS)
    }

    fn description() -> Description {
        Description::new(
            CommunityId::from_key(&Keypair::generate().public_key()),
            Keypair::generate().public_key(),
            CommunityIdentity::named("eval"),
            AccessSettings::default(),
        )
    }

    fn with_permission(description: &mut Description, permission_type: PermissionType, amount: u128) -> PermissionId {
        let permission = TokenPermission::new(permission_type, vec![erc20(amount)]);
        let id = permission.id;
        description.add_token_permission(permission).unwrap();
        id
    }

    #[test]
    fn test_erc20_threshold() {
        let evaluator = PermissionEvaluator::default();
        let mut snapshot = BalanceSnapshot::new();
        snapshot.set_balance(1, wallet(1), contract(), tokens(99));

        let result = evaluator.evaluate_criteria(&[erc20(100)], &snapshot, &[wallet(1)]);
        assert!(!result.satisfied);

        snapshot.set_balance(1, wallet(1), contract(), tokens(100));
        let result = evaluator.evaluate_criteria(&[erc20(100)], &snapshot, &[wallet(1)]);
        assert!(result.satisfied);
        assert_eq!(result.satisfying_address, Some(wallet(1)));
    }

    #[test]
    fn test_criteria_are_anded() {
        let evaluator = PermissionEvaluator::default();
        let mut snapshot = BalanceSnapshot::new();
        snapshot.set_balance(1, wallet(1), contract(), tokens(100));

        let criteria = [erc20(100), TokenCriteria::ens("*.cohort.eth")];
        assert!(!evaluator.evaluate_criteria(&criteria, &snapshot, &[wallet(1)]).satisfied);

        snapshot.add_ens_name(wallet(2), "alice.cohort.eth");
        let result = evaluator.evaluate_criteria(&criteria, &snapshot, &[wallet(1), wallet(2)]);
        assert!(result.satisfied);
        assert_eq!(result.criteria[1].satisfying_address, Some(wallet(2)));
    }

    #[test]
    fn test_per_address_does_not_sum() {
        let mut snapshot = BalanceSnapshot::new();
        snapshot.set_balance(1, wallet(1), contract(), tokens(60));
        snapshot.set_balance(1, wallet(2), contract(), tokens(60));
        let wallets = [wallet(1), wallet(2)];

        let per_address = PermissionEvaluator::default();
        assert!(!per_address.evaluate_criteria(&[erc20(100)], &snapshot, &wallets).satisfied);

        let summed = PermissionEvaluator::new(EvaluatorConfig {
            erc20_aggregation: Erc20Aggregation::SummedAcrossAccounts,
        });
        assert!(summed.evaluate_criteria(&[erc20(100)], &snapshot, &wallets).satisfied);
    }

    #[test]
    fn test_erc721_specific_token_ids() {
        let evaluator = PermissionEvaluator::default();
        let criteria = TokenCriteria::erc721(1, contract(), "NFT", 1).with_token_ids([42]);
        let mut snapshot = BalanceSnapshot::new();
        snapshot.add_token(1, wallet(1), contract(), 7);
        assert!(!evaluator.evaluate_criteria(&[criteria.clone()], &snapshot, &[wallet(1)]).satisfied);

        snapshot.add_token(1, wallet(1), contract(), 42);
        assert!(evaluator.evaluate_criteria(&[criteria], &snapshot, &[wallet(1)]).satisfied);
    }

    #[test]
    fn test_account_chains_restrict_evaluation() {
        let evaluator = PermissionEvaluator::default();
        let mut description = description();
        with_permission(&mut description, PermissionType::BecomeMember, 100);

        let mut snapshot = BalanceSnapshot::new();
        snapshot.set_balance(1, wallet(1), contract(), tokens(100));

        let wrong_chain = [AccountChains {
            address: wallet(1),
            chain_ids: BTreeSet::from([10]),
        }];
        assert!(matches!(
            evaluator.check_permission_to_join(&description, &wrong_chain, &snapshot),
            Err(PermsError::NetworksNotSupported)
        ));

        let right_chain = [AccountChains {
            address: wallet(1),
            chain_ids: BTreeSet::from([1, 10]),
        }];
        let response = evaluator
            .check_permission_to_join(&description, &right_chain, &snapshot)
            .unwrap();
        assert!(response.satisfied);
        assert_eq!(response.valid_combinations[&wallet(1)], BTreeSet::from([1]));
    }

    #[test]
    fn test_join_open_without_member_gate() {
        let evaluator = PermissionEvaluator::default();
        let response = evaluator
            .check_permission_to_join(&description(), &[AccountChains::any_chain(wallet(1))], &BalanceSnapshot::new())
            .unwrap();
        assert!(response.satisfied);
    }

    #[test]
    fn test_admin_permission_grants_entry() {
        let evaluator = PermissionEvaluator::default();
        let mut description = description();
        with_permission(&mut description, PermissionType::BecomeMember, 1_000);
        with_permission(&mut description, PermissionType::BecomeAdmin, 10);

        let mut snapshot = BalanceSnapshot::new();
        snapshot.set_balance(1, wallet(1), contract(), tokens(10));
        let accounts = [AccountChains::any_chain(wallet(1))];

        let response = evaluator.check_permission_to_join(&description, &accounts, &snapshot).unwrap();
        assert!(response.satisfied);
        assert_eq!(response.permissions.len(), 2);
    }

    #[test]
    fn test_member_role_kicked_when_gate_unsatisfied() {
        let evaluator = PermissionEvaluator::default();
        let mut description = description();
        with_permission(&mut description, PermissionType::BecomeMember, 100);
        let accounts = [AccountChains::any_chain(wallet(1))];

        assert_eq!(
            evaluator.evaluate_member_role(&description, &accounts, &BalanceSnapshot::new()),
            Privilege::None
        );
    }

    #[test]
    fn test_channel_roles() {
        let evaluator = PermissionEvaluator::default();
        let mut description = description();
        let chat = Chat::new("vip");
        let chat_id = chat.id;
        description.create_chat(chat).unwrap();
        description
            .add_token_permission(
                TokenPermission::new(PermissionType::CanViewChannel, vec![erc20(10)]).for_chats([chat_id]),
            )
            .unwrap();
        description
            .add_token_permission(
                TokenPermission::new(PermissionType::CanViewAndPostChannel, vec![erc20(100)]).for_chats([chat_id]),
            )
            .unwrap();

        let accounts = [AccountChains::any_chain(wallet(1))];
        let mut snapshot = BalanceSnapshot::new();
        assert_eq!(evaluator.channel_role(&description, &chat_id, &accounts, &snapshot), None);

        snapshot.set_balance(1, wallet(1), contract(), tokens(10));
        assert_eq!(
            evaluator.channel_role(&description, &chat_id, &accounts, &snapshot),
            Some(ChannelRole::Viewer)
        );

        snapshot.set_balance(1, wallet(1), contract(), tokens(100));
        assert_eq!(
            evaluator.channel_role(&description, &chat_id, &accounts, &snapshot),
            Some(ChannelRole::Poster)
        );
    }

    proptest! {
        #[test]
        fn token_master_takes_precedence_over_member(
            member_amount in 1u128..1_000,
            master_amount in 1u128..1_000,
            extra in 0u128..1_000,
        ) {
            let evaluator = PermissionEvaluator::default();
            let mut description = description();
            with_permission(&mut description, PermissionType::BecomeMember, member_amount);
            with_permission(&mut description, PermissionType::BecomeTokenMaster, master_amount);

            let mut snapshot = BalanceSnapshot::new();
            let held = member_amount.max(master_amount) + extra;
            snapshot.set_balance(1, wallet(1), contract(), tokens(held));

            let role = evaluator.evaluate_member_role(
                &description,
                &[AccountChains::any_chain(wallet(1))],
                &snapshot,
            );
            prop_assert_eq!(role, Privilege::TokenMaster);
        }
    }
}

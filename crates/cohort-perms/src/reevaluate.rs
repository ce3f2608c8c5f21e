//! Members reevaluation.
//!
//! A [`ReevaluationPlan`] is computed from a description snapshot and a
//! balance snapshot with no lock held, then applied to whatever description
//! is current when the caller takes the community lock. Applying skips
//! members that left in between.

use std::collections::{BTreeMap, BTreeSet};

use cohort_core::{ChannelRole, ChatId, Description, MemberRole, PermissionType, PublicKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::balances::BalanceSnapshot;
use crate::evaluator::{AccountChains, PermissionEvaluator};

/// Membership delta produced by one reevaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReevaluationPlan {
    /// Members who no longer satisfy the membership gate.
    pub removals: BTreeSet<PublicKey>,
    /// Replacement role sets.
    pub role_updates: BTreeMap<PublicKey, BTreeSet<MemberRole>>,
    /// Channel seats to change. `None` removes the member from the chat.
    pub channel_updates: BTreeMap<ChatId, BTreeMap<PublicKey, Option<ChannelRole>>>,
}

impl ReevaluationPlan {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.role_updates.is_empty() && self.channel_updates.is_empty()
    }

    /// Apply to `description`. Returns whether anything changed.
    ///
    /// The caller commits with [`Description::increase_clock`].
    pub fn apply(&self, description: &mut Description) -> bool {
        let mut changed = false;
        for identity in &self.removals {
            changed |= description.remove_member(identity).is_some();
        }
        for (identity, roles) in &self.role_updates {
            if description.has_member(identity) {
                changed |= description.set_roles(identity, roles.clone()).unwrap_or(false);
            }
        }
        for (chat_id, seats) in &self.channel_updates {
            for (identity, role) in seats {
                if !description.has_member(identity) {
                    continue;
                }
                changed |= match role {
                    Some(role) => description.set_chat_member(chat_id, *identity, *role),
                    None => description.remove_chat_member(chat_id, identity),
                };
            }
        }
        changed
    }
}

/// Roles a member should hold after reevaluation, or `None` to remove it.
///
/// A role class whose permission type is absent keeps whatever the member
/// was explicitly granted.
fn reevaluated_roles(
    evaluator: &PermissionEvaluator,
    description: &Description,
    current: &BTreeSet<MemberRole>,
    accounts: &[AccountChains],
    snapshot: &BalanceSnapshot,
) -> Option<BTreeSet<MemberRole>> {
    let mut roles = current.clone();
    for (permission_type, role) in [
        (PermissionType::BecomeTokenMaster, MemberRole::TokenMaster),
        (PermissionType::BecomeAdmin, MemberRole::Admin),
    ] {
        match evaluator.satisfies_type(description, permission_type, accounts, snapshot) {
            Some(true) => {
                roles.insert(role);
            }
            Some(false) => {
                roles.remove(&role);
            }
            None => {}
        }
    }
    if roles.is_empty()
        && evaluator.satisfies_type(description, PermissionType::BecomeMember, accounts, snapshot)
            == Some(false)
    {
        return None;
    }
    Some(roles)
}

/// Reevaluate every member of `description`.
///
/// `local` and Owner members are never touched. A member without revealed
/// accounts is evaluated with none and so fails every token gate.
pub fn plan_reevaluation(
    evaluator: &PermissionEvaluator,
    description: &Description,
    local: &PublicKey,
    accounts: &BTreeMap<PublicKey, Vec<AccountChains>>,
    snapshot: &BalanceSnapshot,
) -> ReevaluationPlan {
    let mut plan = ReevaluationPlan::default();
    let no_accounts = Vec::new();

    for (identity, member) in &description.members {
        if identity == local || *identity == description.control_node || member.has_role(MemberRole::Owner) {
            continue;
        }
        let member_accounts = accounts.get(identity).unwrap_or(&no_accounts);

        let Some(roles) = reevaluated_roles(evaluator, description, &member.roles, member_accounts, snapshot)
        else {
            debug!(member = %identity, "member no longer satisfies the membership gate");
            plan.removals.insert(*identity);
            continue;
        };
        let privileged = !roles.is_empty();
        if roles != member.roles {
            plan.role_updates.insert(*identity, roles);
        }

        for (chat_id, chat) in &description.chats {
            let wanted = if privileged {
                Some(ChannelRole::Poster)
            } else {
                evaluator.channel_role(description, chat_id, member_accounts, snapshot)
            };
            if chat.members.get(identity).copied() != wanted {
                plan.channel_updates
                    .entry(*chat_id)
                    .or_default()
                    .insert(*identity, wanted);
            }
        }
    }
    plan
}

//! Members reevaluation on the control node.
//!
//! Balances are fetched and the plan computed against a snapshot with no
//! lock held. The plan is then applied to the description current at the
//! time the lock is taken.

use std::collections::BTreeMap;
use std::sync::Arc;

use cohort_core::{CommunityId, DescriptionChanges, PublicKey};
use cohort_perms::{accounts_of, plan_reevaluation, AccountChains};
use cohort_store::{Store, StoreExt};
use cohort_sync::Transport;
use tracing::{debug, info};

use crate::error::Result;
use crate::manager::{now_millis, Manager};

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    /// Reevaluate every member against the token permissions.
    ///
    /// Members that no longer qualify are removed, roles and channel seats
    /// are brought in line with holdings. Returns the committed changes, or
    /// `None` when nothing changed.
    pub async fn reevaluate_members(&self, id: &CommunityId) -> Result<Option<Arc<DescriptionChanges>>> {
        let snapshot = self.community(id)?;
        self.require_control_node(&snapshot)?;
        let description = &snapshot.description;

        let mut accounts: BTreeMap<PublicKey, Vec<AccountChains>> = BTreeMap::new();
        for member in description.members.keys() {
            let revealed = self.store.revealed_accounts(id, member).await?;
            accounts.insert(*member, accounts_of(&revealed));
        }
        let wallets: Vec<_> = accounts.values().flatten().map(|a| a.address).collect();
        let balances = self.fetch_balances(description, wallets).await?;

        let plan = plan_reevaluation(&self.evaluator, description, &self.public_key(), &accounts, &balances);
        self.store.set_last_reevaluation(id, now_millis()).await?;
        if plan.is_empty() {
            debug!(community = %id, members = description.members.len(), "reevaluation found nothing to change");
            return Ok(None);
        }

        let state = self.state(id)?;
        let _guard = state.lock.lock().await;
        let current = state.snapshot();
        let key = self.require_control_node(&current)?;
        let mut next = current.description.clone();
        if !plan.apply(&mut next) {
            return Ok(None);
        }
        let changes = self.commit(&state, &current, next, key).await?;
        info!(
            community = %id,
            removed = plan.removals.len(),
            role_updates = plan.role_updates.len(),
            channels = plan.channel_updates.len(),
            "members reevaluated"
        );
        Ok(Some(changes))
    }
}

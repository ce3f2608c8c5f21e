//! Privileged user sync.
//!
//! The control node replicates requests to join to its privileged members so
//! they can act on them. A replica never trusts a sync entry over its own
//! record: each entry is checked against the locally held request first.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cohort_core::{CommunityId, PublicKey, RequestId, RequestState, RequestToJoin, RevealedAccount};

use crate::error::{Result, SyncError};
use crate::messages::limits;

/// What a privileged sync carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivilegedSyncKind {
    /// Requests the control node accepted.
    AcceptRequest,
    /// Requests the control node declined.
    RejectRequest,
    /// Every request the control node holds.
    AllRequests,
    /// A member's revealed accounts changed.
    EditSharedAddresses,
}

/// Requests to join replicated to privileged members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedSync {
    pub community_id: CommunityId,
    /// Control node clock, unix seconds.
    pub clock: u64,
    pub kind: PrivilegedSyncKind,
    pub requests: Vec<RequestToJoin>,
}

/// Structural checks every sync must pass before any entry is looked at.
pub fn validate_privileged_sync(sync: &PrivilegedSync) -> Result<()> {
    if sync.clock == 0 {
        return Err(SyncError::InvalidMessage("privileged sync without clock".into()));
    }
    if sync.requests.is_empty() {
        return Err(SyncError::InvalidMessage(format!(
            "{:?} sync without requests",
            sync.kind
        )));
    }
    if sync.requests.len() > limits::MAX_SYNC_REQUESTS {
        return Err(SyncError::InvalidMessage("too many synced requests".into()));
    }
    if sync.kind == PrivilegedSyncKind::EditSharedAddresses && sync.requests.len() != 1 {
        return Err(SyncError::InvalidMessage(
            "shared address edit must carry exactly one request".into(),
        ));
    }

    let mut seen = BTreeSet::new();
    for request in &sync.requests {
        if request.community_id != sync.community_id {
            return Err(SyncError::InvalidMessage(format!(
                "request {} belongs to community {}",
                request.id, request.community_id
            )));
        }
        if request.id != RequestId::derive(&request.public_key, &request.community_id) {
            return Err(SyncError::InvalidMessage(format!(
                "request id {} does not match requester",
                request.id
            )));
        }
        if !seen.insert(request.id) {
            return Err(SyncError::InvalidMessage(format!(
                "duplicate request {}",
                request.id
            )));
        }
        let expected = match sync.kind {
            PrivilegedSyncKind::AcceptRequest => Some(RequestState::Accepted),
            PrivilegedSyncKind::RejectRequest => Some(RequestState::Declined),
            PrivilegedSyncKind::AllRequests | PrivilegedSyncKind::EditSharedAddresses => None,
        };
        if expected.is_some_and(|state| state != request.state) {
            return Err(SyncError::InvalidMessage(format!(
                "request {} in state {:?} inside {:?} sync",
                request.id, request.state, sync.kind
            )));
        }
    }
    Ok(())
}

/// What to do with one sync entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEntryVerdict {
    /// Store the entry.
    Apply,
    /// The local record is as new or newer. Keep it.
    Stale,
    /// The entry contradicts what can be validated locally. Keep the local record.
    Malformed(String),
}

fn same_accounts(a: &[RevealedAccount], b: &[RevealedAccount]) -> bool {
    let key = |accounts: &[RevealedAccount]| -> BTreeSet<(cohort_core::Address, PublicKey)> {
        accounts.iter().map(|x| (x.address, x.wallet_key)).collect()
    };
    key(a) == key(b)
}

/// Compare an incoming sync entry with the locally held request.
///
/// Older entries are stale. At an equal clock the entry may only move a
/// pending request forward; revealing a different account set at the same
/// clock, or trying to change a finalized request, is not accepted.
/// Accounts are verified independently against the requester.
pub fn check_sync_entry(local: Option<&RequestToJoin>, incoming: &RequestToJoin) -> SyncEntryVerdict {
    if let Err(e) = incoming.verify_accounts() {
        return SyncEntryVerdict::Malformed(format!("revealed account: {e}"));
    }
    let Some(local) = local else {
        return SyncEntryVerdict::Apply;
    };
    if local.public_key != incoming.public_key || local.community_id != incoming.community_id {
        return SyncEntryVerdict::Malformed("entry does not match the stored requester".into());
    }
    if incoming.clock < local.clock {
        return SyncEntryVerdict::Stale;
    }
    if incoming.clock > local.clock {
        return SyncEntryVerdict::Apply;
    }

    let accounts_conflict = !incoming.revealed_accounts.is_empty()
        && !local.revealed_accounts.is_empty()
        && !same_accounts(&incoming.revealed_accounts, &local.revealed_accounts);
    if accounts_conflict {
        return SyncEntryVerdict::Malformed(format!(
            "different accounts revealed at clock {}",
            incoming.clock
        ));
    }
    if incoming.state == local.state {
        let gains_accounts = local.revealed_accounts.is_empty() && !incoming.revealed_accounts.is_empty();
        return if gains_accounts {
            SyncEntryVerdict::Apply
        } else {
            SyncEntryVerdict::Stale
        };
    }
    if local.state.is_terminal() {
        return SyncEntryVerdict::Stale;
    }
    SyncEntryVerdict::Apply
}

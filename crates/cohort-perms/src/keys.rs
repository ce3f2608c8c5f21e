//! Encryption key actions.
//!
//! Compares two membership views of a community and decides, for the
//! community key and for every channel key, whether keys must be created,
//! dropped, rotated or sent to newcomers.

use std::collections::{BTreeMap, BTreeSet};

use cohort_core::{ChatId, Description, PublicKey};
use serde::{Deserialize, Serialize};

/// What to do with one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyActionType {
    #[default]
    None,
    /// Encryption turned on: create a key and send it to every member.
    Add,
    /// Encryption turned off: drop the key.
    Remove,
    /// Someone lost access: rotate and send the new key to the remaining set.
    Rekey,
    /// Someone gained access: send the current key to them only.
    SendToMembers,
}

/// Action for one key and the identities that must receive it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKeyAction {
    pub action_type: KeyActionType,
    /// Recipients of the (new or current) key.
    pub members: BTreeSet<PublicKey>,
    /// Identities that lost access.
    pub removed: BTreeSet<PublicKey>,
}

impl EncryptionKeyAction {
    pub fn is_none(&self) -> bool {
        self.action_type == KeyActionType::None
    }
}

/// Actions for the community key and every channel key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKeyActions {
    pub community: EncryptionKeyAction,
    pub channels: BTreeMap<ChatId, EncryptionKeyAction>,
}

impl EncryptionKeyActions {
    pub fn is_empty(&self) -> bool {
        self.community.is_none() && self.channels.values().all(EncryptionKeyAction::is_none)
    }
}

/// Who holds which key, as seen in one description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipView {
    pub encrypted: bool,
    pub members: BTreeSet<PublicKey>,
    pub channels: BTreeMap<ChatId, ChannelView>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelView {
    pub encrypted: bool,
    pub members: BTreeSet<PublicKey>,
}

impl MembershipView {
    pub fn of(description: &Description) -> Self {
        Self {
            encrypted: description.is_encrypted(),
            members: description.member_keys(),
            channels: description
                .chats
                .iter()
                .map(|(id, chat)| {
                    (
                        *id,
                        ChannelView {
                            encrypted: description.is_channel_encrypted(id),
                            members: chat.members.keys().copied().collect(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Decide the action for a single key.
pub fn compute_key_action(
    was_encrypted: bool,
    is_encrypted: bool,
    old_members: &BTreeSet<PublicKey>,
    new_members: &BTreeSet<PublicKey>,
) -> EncryptionKeyAction {
    let removed: BTreeSet<PublicKey> = old_members.difference(new_members).copied().collect();
    let added: BTreeSet<PublicKey> = new_members.difference(old_members).copied().collect();

    match (was_encrypted, is_encrypted) {
        (false, true) => EncryptionKeyAction {
            action_type: KeyActionType::Add,
            members: new_members.clone(),
            removed,
        },
        (true, false) => EncryptionKeyAction {
            action_type: KeyActionType::Remove,
            members: BTreeSet::new(),
            removed,
        },
        (true, true) if !removed.is_empty() => EncryptionKeyAction {
            action_type: KeyActionType::Rekey,
            members: new_members.clone(),
            removed,
        },
        (true, true) if !added.is_empty() => EncryptionKeyAction {
            action_type: KeyActionType::SendToMembers,
            members: added,
            removed,
        },
        _ => EncryptionKeyAction::default(),
    }
}

/// Compare two views of the same community.
///
/// A channel present on one side only is treated as unencrypted and empty
/// on the other.
pub fn compute_key_actions(old: &MembershipView, new: &MembershipView) -> EncryptionKeyActions {
    let community = compute_key_action(old.encrypted, new.encrypted, &old.members, &new.members);

    let empty = ChannelView::default();
    let chat_ids: BTreeSet<&ChatId> = old.channels.keys().chain(new.channels.keys()).collect();
    let channels = chat_ids
        .into_iter()
        .filter_map(|chat_id| {
            let before = old.channels.get(chat_id).unwrap_or(&empty);
            let after = new.channels.get(chat_id).unwrap_or(&empty);
            let action = compute_key_action(before.encrypted, after.encrypted, &before.members, &after.members);
            (!action.is_none()).then_some((*chat_id, action))
        })
        .collect();

    EncryptionKeyActions { community, channels }
}

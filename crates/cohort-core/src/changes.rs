//! Differences between two descriptions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::description::{Description, MemberRole};
use crate::types::{CategoryId, ChatId, PermissionId};

/// Role delta of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    pub before: BTreeSet<MemberRole>,
    pub after: BTreeSet<MemberRole>,
}

/// Channel membership delta of one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMembersChange {
    pub added: BTreeSet<PublicKey>,
    pub removed: BTreeSet<PublicKey>,
}

/// Everything that changed between two descriptions of one community.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionChanges {
    pub chats_added: BTreeSet<ChatId>,
    pub chats_removed: BTreeSet<ChatId>,
    pub chats_modified: BTreeSet<ChatId>,
    pub chat_members: BTreeMap<ChatId, ChatMembersChange>,
    pub categories_added: BTreeSet<CategoryId>,
    pub categories_removed: BTreeSet<CategoryId>,
    pub categories_modified: BTreeSet<CategoryId>,
    pub permissions_added: BTreeSet<PermissionId>,
    pub permissions_removed: BTreeSet<PermissionId>,
    pub permissions_modified: BTreeSet<PermissionId>,
    pub members_added: BTreeSet<PublicKey>,
    pub members_removed: BTreeSet<PublicKey>,
    pub role_changes: BTreeMap<PublicKey, RoleChange>,
    pub control_node_changed: Option<(PublicKey, PublicKey)>,
    pub banned: BTreeSet<PublicKey>,
    pub unbanned: BTreeSet<PublicKey>,
}

/// Split two keyed maps into added, removed and modified keys.
fn diff_maps<K: Ord + Copy, V: PartialEq>(
    old: &BTreeMap<K, V>,
    new: &BTreeMap<K, V>,
) -> (BTreeSet<K>, BTreeSet<K>, BTreeSet<K>) {
    let added = new.keys().filter(|k| !old.contains_key(k)).copied().collect();
    let removed = old.keys().filter(|k| !new.contains_key(k)).copied().collect();
    let modified = new
        .iter()
        .filter(|(k, v)| old.get(k).is_some_and(|previous| previous != *v))
        .map(|(k, _)| *k)
        .collect();
    (added, removed, modified)
}

impl DescriptionChanges {
    /// Compute the changes that turn `old` into `new`.
    pub fn between(old: &Description, new: &Description) -> Self {
        let (chats_added, chats_removed, chats_modified) = diff_maps(&old.chats, &new.chats);
        let (categories_added, categories_removed, categories_modified) =
            diff_maps(&old.categories, &new.categories);
        let (permissions_added, permissions_removed, permissions_modified) =
            diff_maps(&old.token_permissions, &new.token_permissions);
        let (members_added, members_removed, _) = diff_maps(&old.members, &new.members);

        let role_changes = new
            .members
            .iter()
            .filter_map(|(key, member)| {
                let previous = old.members.get(key)?;
                (previous.roles != member.roles).then(|| {
                    (
                        *key,
                        RoleChange {
                            before: previous.roles.clone(),
                            after: member.roles.clone(),
                        },
                    )
                })
            })
            .collect();

        let chat_members = new
            .chats
            .iter()
            .filter_map(|(id, chat)| {
                let before: BTreeSet<PublicKey> = old
                    .chats
                    .get(id)
                    .map(|c| c.members.keys().copied().collect())
                    .unwrap_or_default();
                let after: BTreeSet<PublicKey> = chat.members.keys().copied().collect();
                let change = ChatMembersChange {
                    added: after.difference(&before).copied().collect(),
                    removed: before.difference(&after).copied().collect(),
                };
                (!change.added.is_empty() || !change.removed.is_empty()).then_some((*id, change))
            })
            .collect();

        Self {
            chats_added,
            chats_removed,
            chats_modified,
            chat_members,
            categories_added,
            categories_removed,
            categories_modified,
            permissions_added,
            permissions_removed,
            permissions_modified,
            members_added,
            members_removed,
            role_changes,
            control_node_changed: (old.control_node != new.control_node)
                .then_some((old.control_node, new.control_node)),
            banned: new.banned.difference(&old.banned).copied().collect(),
            unbanned: old.banned.difference(&new.banned).copied().collect(),
        }
    }

    /// Whether any token permission changed.
    pub fn permissions_changed(&self) -> bool {
        !self.permissions_added.is_empty()
            || !self.permissions_removed.is_empty()
            || !self.permissions_modified.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

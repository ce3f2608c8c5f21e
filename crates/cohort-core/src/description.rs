//! The community description: the versioned state every peer converges on.
//!
//! A [`Description`] is authored by the community's control node and
//! carries members, roles, token permissions, chats and categories. Each
//! entity is stamped with the description clock at which it last changed,
//! which lets [`Description::merge_newer`] merge per entity instead of
//! replacing the whole state.
//!
//! Mutators stamp the entities they touch with [`Description::next_clock`]
//! but never advance the description clock themselves. The caller commits a
//! batch of edits with [`Description::increase_clock`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::channel::{Category, ChannelRole, Chat};
use crate::clock::{merge_entities, Clocked};
use crate::crypto::PublicKey;
use crate::error::DescriptionError;
use crate::permission::{PermissionType, TokenPermission, TokenType};
use crate::types::{CategoryId, ChatId, CommunityId, PermissionId};

/// A role explicitly granted to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    Owner,
    Admin,
    TokenMaster,
}

impl MemberRole {
    /// Precedence when a member holds several roles. Higher wins.
    pub fn precedence(&self) -> u8 {
        match self {
            MemberRole::Admin => 1,
            MemberRole::TokenMaster => 2,
            MemberRole::Owner => 3,
        }
    }

    /// The role granted by a satisfied privileged permission.
    pub fn from_permission(permission_type: PermissionType) -> Option<Self> {
        match permission_type {
            PermissionType::BecomeAdmin => Some(MemberRole::Admin),
            PermissionType::BecomeTokenMaster => Some(MemberRole::TokenMaster),
            PermissionType::BecomeOwner => Some(MemberRole::Owner),
            _ => None,
        }
    }
}

/// Capability of an identity within a community.
///
/// Every mutating operation consults this instead of inspecting roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Privilege {
    None,
    Member,
    Admin,
    TokenMaster,
    ControlNode,
}

impl Privilege {
    /// Admin or above.
    pub fn is_privileged(&self) -> bool {
        *self >= Privilege::Admin
    }

    /// May accept or decline requests to join.
    pub fn can_manage_requests(&self) -> bool {
        *self >= Privilege::TokenMaster
    }
}

/// Who may request to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessPolicy {
    /// Requests wait for a decision.
    OnRequest,
    /// Only the control node adds members.
    InvitationOnly,
    /// Requests satisfying the gate are accepted immediately.
    AutoAccept,
}

/// Access settings carried in the description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSettings {
    pub policy: AccessPolicy,
    /// Reject requests that carry no ENS name.
    pub ens_only: bool,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            policy: AccessPolicy::OnRequest,
            ens_only: false,
        }
    }
}

/// Display identity of a community.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityIdentity {
    pub name: String,
    pub description: String,
    pub color: String,
}

impl CommunityIdentity {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Routing topic assignment for community traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    pub cluster: u16,
    pub index: u16,
}

/// A member of a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub public_key: PublicKey,
    pub roles: BTreeSet<MemberRole>,
    /// Description clock at which this entry last changed.
    pub clock: u64,
    /// Member-scoped clock of the last revealed-address edit (unix seconds).
    pub last_update_clock: u64,
}

impl Member {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            roles: BTreeSet::new(),
            clock: 0,
            last_update_clock: 0,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = MemberRole>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    /// The role that takes precedence, if any.
    pub fn highest_role(&self) -> Option<MemberRole> {
        self.roles.iter().copied().max_by_key(MemberRole::precedence)
    }

    pub fn has_role(&self, role: MemberRole) -> bool {
        self.roles.contains(&role)
    }

    /// Whether the member holds any explicit role.
    pub fn is_privileged(&self) -> bool {
        !self.roles.is_empty()
    }
}

impl Clocked for Member {
    fn clock(&self) -> u64 {
        self.clock
    }
}

/// Signed state of a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub community_id: CommunityId,
    pub clock: u64,
    /// The single identity allowed to author structural edits.
    pub control_node: PublicKey,
    pub identity: CommunityIdentity,
    pub access: AccessSettings,
    pub shard: Option<Shard>,
    pub members: BTreeMap<PublicKey, Member>,
    pub banned: BTreeSet<PublicKey>,
    pub chats: BTreeMap<ChatId, Chat>,
    pub categories: BTreeMap<CategoryId, Category>,
    pub token_permissions: BTreeMap<PermissionId, TokenPermission>,
}

impl Description {
    /// A fresh description at clock 1 with the control node as sole owner.
    pub fn new(
        community_id: CommunityId,
        control_node: PublicKey,
        identity: CommunityIdentity,
        access: AccessSettings,
    ) -> Self {
        let mut description = Self {
            community_id,
            clock: 1,
            control_node,
            identity,
            access,
            shard: None,
            members: BTreeMap::new(),
            banned: BTreeSet::new(),
            chats: BTreeMap::new(),
            categories: BTreeMap::new(),
            token_permissions: BTreeMap::new(),
        };
        let mut owner = Member::new(control_node).with_roles([MemberRole::Owner]);
        owner.clock = 1;
        description.members.insert(control_node, owner);
        description
    }

    /// The clock the next committed edit will carry.
    pub fn next_clock(&self) -> u64 {
        self.clock + 1
    }

    /// Commit pending edits.
    pub fn increase_clock(&mut self) {
        self.clock += 1;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Privilege
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve the capability of `identity`.
    ///
    /// An Owner who is not the control node ranks as a TokenMaster: it keeps
    /// request-management rights but cannot sign structural edits.
    pub fn privilege_of(&self, identity: &PublicKey) -> Privilege {
        if *identity == self.control_node {
            return Privilege::ControlNode;
        }
        match self.members.get(identity).map(Member::highest_role) {
            None => Privilege::None,
            Some(None) => Privilege::Member,
            Some(Some(MemberRole::Admin)) => Privilege::Admin,
            Some(Some(MemberRole::TokenMaster | MemberRole::Owner)) => Privilege::TokenMaster,
        }
    }

    pub fn member(&self, identity: &PublicKey) -> Option<&Member> {
        self.members.get(identity)
    }

    pub fn has_member(&self, identity: &PublicKey) -> bool {
        self.members.contains_key(identity)
    }

    pub fn is_banned(&self, identity: &PublicKey) -> bool {
        self.banned.contains(identity)
    }

    /// Members holding any explicit role.
    pub fn privileged_members(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| m.is_privileged())
    }

    pub fn member_keys(&self) -> BTreeSet<PublicKey> {
        self.members.keys().copied().collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Members
    // ─────────────────────────────────────────────────────────────────────

    /// Add a member, seating it in every chat it may enter without a check.
    ///
    /// Privileged members join every chat as posters. Others join chats that
    /// carry no channel permission. Returns false if already a member.
    pub fn add_member(&mut self, identity: PublicKey, roles: BTreeSet<MemberRole>) -> bool {
        if self.members.contains_key(&identity) {
            return false;
        }
        let clock = self.next_clock();
        let privileged = !roles.is_empty();
        self.members.insert(
            identity,
            Member {
                public_key: identity,
                roles,
                clock,
                last_update_clock: 0,
            },
        );

        let open: Vec<ChatId> = self
            .chats
            .keys()
            .filter(|id| privileged || !self.is_channel_encrypted(id))
            .copied()
            .collect();
        for chat_id in open {
            self.set_chat_member(&chat_id, identity, ChannelRole::Poster);
        }
        true
    }

    /// Remove a member from the community and every chat.
    pub fn remove_member(&mut self, identity: &PublicKey) -> Option<Member> {
        let removed = self.members.remove(identity)?;
        let chats: Vec<ChatId> = self
            .chats
            .iter()
            .filter(|(_, chat)| chat.members.contains_key(identity))
            .map(|(id, _)| *id)
            .collect();
        for chat_id in chats {
            self.remove_chat_member(&chat_id, identity);
        }
        Some(removed)
    }

    /// Remove a member and record it in the ban list.
    pub fn ban_member(&mut self, identity: &PublicKey) -> bool {
        let removed = self.remove_member(identity).is_some();
        self.banned.insert(*identity) || removed
    }

    pub fn unban_member(&mut self, identity: &PublicKey) -> bool {
        self.banned.remove(identity)
    }

    /// Grant a role. Privileged members are seated in every chat as posters.
    pub fn add_role(&mut self, identity: &PublicKey, role: MemberRole) -> Result<bool, DescriptionError> {
        let clock = self.next_clock();
        let member = self
            .members
            .get_mut(identity)
            .ok_or(DescriptionError::MemberNotFound)?;
        if !member.roles.insert(role) {
            return Ok(false);
        }
        member.clock = clock;

        let chat_ids: Vec<ChatId> = self.chats.keys().copied().collect();
        for chat_id in chat_ids {
            self.set_chat_member(&chat_id, *identity, ChannelRole::Poster);
        }
        Ok(true)
    }

    pub fn remove_role(&mut self, identity: &PublicKey, role: MemberRole) -> Result<bool, DescriptionError> {
        let clock = self.next_clock();
        let member = self
            .members
            .get_mut(identity)
            .ok_or(DescriptionError::MemberNotFound)?;
        if !member.roles.remove(&role) {
            return Ok(false);
        }
        member.clock = clock;
        Ok(true)
    }

    /// Replace a member's roles wholesale.
    pub fn set_roles(&mut self, identity: &PublicKey, roles: BTreeSet<MemberRole>) -> Result<bool, DescriptionError> {
        let clock = self.next_clock();
        let member = self
            .members
            .get_mut(identity)
            .ok_or(DescriptionError::MemberNotFound)?;
        if member.roles == roles {
            return Ok(false);
        }
        member.roles = roles;
        member.clock = clock;
        Ok(true)
    }

    /// Record a revealed-address edit by the member.
    pub fn touch_member_addresses(&mut self, identity: &PublicKey, last_update_clock: u64) -> Result<(), DescriptionError> {
        let clock = self.next_clock();
        let member = self
            .members
            .get_mut(identity)
            .ok_or(DescriptionError::MemberNotFound)?;
        member.last_update_clock = last_update_clock;
        member.clock = clock;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Token permissions
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_token_permission(&mut self, mut permission: TokenPermission) -> Result<(), DescriptionError> {
        if self.token_permissions.contains_key(&permission.id) {
            return Err(DescriptionError::TokenPermissionAlreadyExists(permission.id));
        }
        self.check_permission(&permission)?;
        permission.clock = self.next_clock();
        self.token_permissions.insert(permission.id, permission);
        Ok(())
    }

    pub fn edit_token_permission(&mut self, mut permission: TokenPermission) -> Result<(), DescriptionError> {
        if !self.token_permissions.contains_key(&permission.id) {
            return Err(DescriptionError::TokenPermissionNotFound(permission.id));
        }
        self.check_permission(&permission)?;
        permission.clock = self.next_clock();
        self.token_permissions.insert(permission.id, permission);
        Ok(())
    }

    pub fn delete_token_permission(&mut self, id: &PermissionId) -> Result<TokenPermission, DescriptionError> {
        self.token_permissions
            .remove(id)
            .ok_or(DescriptionError::TokenPermissionNotFound(*id))
    }

    fn check_permission(&self, permission: &TokenPermission) -> Result<(), DescriptionError> {
        if permission.permission_type == PermissionType::BecomeOwner {
            return Err(DescriptionError::InvalidPermission(
                "owner permissions are not managed through descriptions".into(),
            ));
        }
        if permission.criteria.is_empty() {
            return Err(DescriptionError::InvalidPermission("no criteria".into()));
        }
        for criteria in &permission.criteria {
            match criteria.token_type {
                TokenType::Ens if criteria.ens_pattern.is_empty() => {
                    return Err(DescriptionError::InvalidPermission("empty ENS pattern".into()));
                }
                TokenType::Erc20 | TokenType::Erc721 if criteria.contract_addresses.is_empty() => {
                    return Err(DescriptionError::InvalidPermission(format!(
                        "{} criteria without contract addresses",
                        criteria.symbol
                    )));
                }
                TokenType::Erc20 if criteria.amount_in_wei == 0 => {
                    return Err(DescriptionError::InvalidPermission(format!(
                        "{} criteria with zero amount",
                        criteria.symbol
                    )));
                }
                _ => {}
            }
        }
        if permission.permission_type.is_channel_permission() {
            if permission.chat_ids.is_empty() {
                return Err(DescriptionError::InvalidPermission(
                    "channel permission without chats".into(),
                ));
            }
            if let Some(missing) = permission.chat_ids.iter().find(|id| !self.chats.contains_key(id)) {
                return Err(DescriptionError::ChatNotFound(*missing));
            }
        }
        Ok(())
    }

    /// Permissions of one type.
    pub fn permissions_of_type(&self, permission_type: PermissionType) -> Vec<&TokenPermission> {
        self.token_permissions
            .values()
            .filter(|p| p.permission_type == permission_type)
            .collect()
    }

    /// Channel permissions targeting `chat_id`.
    pub fn channel_permissions(&self, chat_id: &ChatId) -> Vec<&TokenPermission> {
        self.token_permissions
            .values()
            .filter(|p| p.permission_type.is_channel_permission() && p.chat_ids.contains(chat_id))
            .collect()
    }

    /// Membership is token-gated and the community key is in use.
    pub fn is_encrypted(&self) -> bool {
        self.token_permissions
            .values()
            .any(|p| p.permission_type == PermissionType::BecomeMember)
    }

    /// A channel is encrypted when a channel permission targets it.
    pub fn is_channel_encrypted(&self, chat_id: &ChatId) -> bool {
        self.token_permissions
            .values()
            .any(|p| p.permission_type.is_channel_permission() && p.chat_ids.contains(chat_id))
    }

    /// Current members of every encrypted channel.
    pub fn encrypted_channel_members(&self) -> BTreeMap<ChatId, BTreeSet<PublicKey>> {
        self.chats
            .iter()
            .filter(|(id, _)| self.is_channel_encrypted(id))
            .map(|(id, chat)| (*id, chat.members.keys().copied().collect()))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Merge
    // ─────────────────────────────────────────────────────────────────────

    /// Merge a newer description into this one.
    ///
    /// Scalars (control node, identity, access, ban list, categories) come
    /// from `incoming`. Members, chats and permissions merge per entity, so a
    /// local entity stamped after `incoming` was authored survives. A
    /// member's revealed-address clock never moves backwards.
    pub fn merge_newer(&self, incoming: Description) -> Description {
        let snapshot_clock = incoming.clock;
        let Description {
            community_id,
            clock,
            control_node,
            identity,
            access,
            shard,
            members,
            banned,
            chats,
            categories,
            token_permissions,
        } = incoming;

        let mut members = merge_entities(&self.members, members, snapshot_clock, |m| m.public_key);
        for (key, member) in members.iter_mut() {
            if let Some(local) = self.members.get(key) {
                member.last_update_clock = member.last_update_clock.max(local.last_update_clock);
            }
        }

        Description {
            community_id,
            clock,
            control_node,
            identity,
            access,
            shard,
            members,
            banned,
            chats: merge_entities(&self.chats, chats, snapshot_clock, |c| c.id),
            categories,
            token_permissions: merge_entities(&self.token_permissions, token_permissions, snapshot_clock, |p| p.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::permission::TokenCriteria;
    use crate::types::Address;

    fn description() -> (Keypair, Description) {
        let community = Keypair::generate();
        let owner = Keypair::generate();
        let description = Description::new(
            CommunityId::from_key(&community.public_key()),
            owner.public_key(),
            CommunityIdentity::named("test"),
            AccessSettings::default(),
        );
        (owner, description)
    }

    fn member_permission() -> TokenPermission {
        TokenPermission::new(
            PermissionType::BecomeMember,
            vec![TokenCriteria::erc20(1, Address::from_bytes([7; 20]), "TEST", 100, 18)],
        )
    }

    #[test]
    fn test_control_node_is_owner_member() {
        let (owner, description) = description();
        assert_eq!(description.privilege_of(&owner.public_key()), Privilege::ControlNode);
        assert!(description.member(&owner.public_key()).unwrap().has_role(MemberRole::Owner));
    }

    #[test]
    fn test_privilege_follows_role_precedence() {
        let (_, mut description) = description();
        let alice = Keypair::generate().public_key();
        description.add_member(alice, BTreeSet::new());
        assert_eq!(description.privilege_of(&alice), Privilege::Member);

        description.add_role(&alice, MemberRole::Admin).unwrap();
        assert_eq!(description.privilege_of(&alice), Privilege::Admin);

        description.add_role(&alice, MemberRole::TokenMaster).unwrap();
        assert_eq!(description.privilege_of(&alice), Privilege::TokenMaster);

        let stranger = Keypair::generate().public_key();
        assert_eq!(description.privilege_of(&stranger), Privilege::None);
    }

    #[test]
    fn test_non_control_owner_ranks_as_token_master() {
        let (_, mut description) = description();
        let former = Keypair::generate().public_key();
        description.add_member(former, [MemberRole::Owner].into());
        assert_eq!(description.privilege_of(&former), Privilege::TokenMaster);
    }

    #[test]
    fn test_ban_removes_from_chats_and_records() {
        let (_, mut description) = description();
        let chat = Chat::new("general");
        let chat_id = chat.id;
        description.create_chat(chat).unwrap();

        let alice = Keypair::generate().public_key();
        description.add_member(alice, BTreeSet::new());
        assert!(description.chats[&chat_id].members.contains_key(&alice));

        assert!(description.ban_member(&alice));
        assert!(!description.has_member(&alice));
        assert!(!description.chats[&chat_id].members.contains_key(&alice));
        assert!(description.is_banned(&alice));

        assert!(description.unban_member(&alice));
        assert!(!description.is_banned(&alice));
    }

    #[test]
    fn test_duplicate_permission_rejected() {
        let (_, mut description) = description();
        let permission = member_permission();
        description.add_token_permission(permission.clone()).unwrap();
        assert_eq!(
            description.add_token_permission(permission.clone()),
            Err(DescriptionError::TokenPermissionAlreadyExists(permission.id))
        );
        assert!(description.is_encrypted());
    }

    #[test]
    fn test_unknown_permission_edit_and_delete_fail() {
        let (_, mut description) = description();
        let permission = member_permission();
        assert_eq!(
            description.edit_token_permission(permission.clone()),
            Err(DescriptionError::TokenPermissionNotFound(permission.id))
        );
        assert_eq!(
            description.delete_token_permission(&permission.id),
            Err(DescriptionError::TokenPermissionNotFound(permission.id))
        );
    }

    #[test]
    fn test_channel_permission_requires_existing_chat() {
        let (_, mut description) = description();
        let missing = ChatId::random();
        let permission = TokenPermission::new(
            PermissionType::CanViewChannel,
            vec![TokenCriteria::ens("*.cohort.eth")],
        )
        .for_chats([missing]);
        assert_eq!(
            description.add_token_permission(permission),
            Err(DescriptionError::ChatNotFound(missing))
        );
    }

    #[test]
    fn test_new_member_skips_gated_channels() {
        let (_, mut description) = description();
        let open = Chat::new("open");
        let gated = Chat::new("gated");
        let (open_id, gated_id) = (open.id, gated.id);
        description.create_chat(open).unwrap();
        description.create_chat(gated).unwrap();
        description
            .add_token_permission(
                TokenPermission::new(PermissionType::CanViewChannel, vec![TokenCriteria::ens("*.eth")])
                    .for_chats([gated_id]),
            )
            .unwrap();

        let alice = Keypair::generate().public_key();
        description.add_member(alice, BTreeSet::new());
        assert!(description.chats[&open_id].members.contains_key(&alice));
        assert!(!description.chats[&gated_id].members.contains_key(&alice));

        let admin = Keypair::generate().public_key();
        description.add_member(admin, [MemberRole::Admin].into());
        assert!(description.chats[&gated_id].members.contains_key(&admin));
    }

    #[test]
    fn test_merge_keeps_locally_newer_member() {
        let (_, mut local) = description();
        let alice = Keypair::generate().public_key();

        let mut incoming = local.clone();
        incoming.increase_clock();

        local.clock = 5;
        local.add_member(alice, BTreeSet::new());
        local.increase_clock();

        let merged = local.merge_newer(incoming);
        assert!(merged.has_member(&alice));
    }

    #[test]
    fn test_merge_drops_member_removed_by_snapshot() {
        let (_, mut local) = description();
        let alice = Keypair::generate().public_key();
        local.add_member(alice, BTreeSet::new());
        local.increase_clock();

        let mut incoming = local.clone();
        incoming.remove_member(&alice);
        incoming.increase_clock();

        let merged = local.merge_newer(incoming);
        assert!(!merged.has_member(&alice));
    }

    #[test]
    fn test_merge_never_rewinds_address_clock() {
        let (_, mut local) = description();
        let alice = Keypair::generate().public_key();
        local.add_member(alice, BTreeSet::new());
        local.increase_clock();

        let mut incoming = local.clone();
        incoming.increase_clock();

        local.touch_member_addresses(&alice, 1_700_000_000).unwrap();

        let merged = local.merge_newer(incoming);
        assert_eq!(merged.member(&alice).unwrap().last_update_clock, 1_700_000_000);
    }
}

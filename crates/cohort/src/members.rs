//! Kicks, bans and role grants.

use cohort_core::{CommunityId, Description, MemberRole, Privilege, PublicKey};
use cohort_store::Store;
use cohort_sync::Transport;
use tracing::info;

use crate::error::{ManagerError, Result, RoleViolation};
use crate::manager::Manager;

fn holds_role(description: &Description, target: &PublicKey) -> bool {
    description.member(target).is_some_and(|m| m.is_privileged())
}

/// Who may remove `target`. Privileged members are never removed this way.
fn check_removal(description: &Description, actor: &PublicKey, target: &PublicKey) -> Result<()> {
    if *target == description.control_node || holds_role(description, target) {
        return Err(ManagerError::RoleConstraintViolation(RoleViolation::CannotRemoveOwnerOrAdmin));
    }
    if description.privilege_of(actor) != Privilege::ControlNode {
        return Err(ManagerError::Unauthorized(format!("{actor} may not remove members")));
    }
    if !description.has_member(target) {
        return Err(ManagerError::MemberNotFound);
    }
    Ok(())
}

/// Who may ban `target`. Owners are never banned, Admins and TokenMasters
/// only by the control node.
fn check_ban(description: &Description, actor: &PublicKey, target: &PublicKey) -> Result<()> {
    let target_member = description.member(target);
    if *target == description.control_node || target_member.is_some_and(|m| m.has_role(MemberRole::Owner)) {
        return Err(ManagerError::RoleConstraintViolation(RoleViolation::CannotBanOwnerOrAdmin));
    }
    let control_node = description.privilege_of(actor) == Privilege::ControlNode;
    if holds_role(description, target) && !control_node {
        return Err(ManagerError::RoleConstraintViolation(RoleViolation::CannotBanOwnerOrAdmin));
    }
    if !control_node {
        return Err(ManagerError::Unauthorized(format!("{actor} may not ban members")));
    }
    Ok(())
}

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    /// Remove a member from the community and every chat.
    pub async fn remove_user_from_community(&self, id: &CommunityId, member: &PublicKey) -> Result<()> {
        let community = self.community(id)?;
        check_removal(&community.description, &self.public_key(), member)?;
        let member = *member;
        self.edit_description(id, move |d| Ok(d.remove_member(&member)))
            .await?;
        info!(community = %id, %member, "member removed");
        Ok(())
    }

    /// Remove a member and keep them out.
    pub async fn ban_user_from_community(&self, id: &CommunityId, member: &PublicKey) -> Result<()> {
        let community = self.community(id)?;
        check_ban(&community.description, &self.public_key(), member)?;
        let member = *member;
        self.edit_description(id, move |d| Ok(d.ban_member(&member)))
            .await?;
        info!(community = %id, %member, "member banned");
        Ok(())
    }

    pub async fn unban_user_from_community(&self, id: &CommunityId, member: &PublicKey) -> Result<bool> {
        let member = *member;
        let unbanned = self
            .edit_description(id, move |d| Ok(d.unban_member(&member)))
            .await?;
        if unbanned {
            info!(community = %id, %member, "member unbanned");
        }
        Ok(unbanned)
    }

    /// Grant a role. The Owner role only moves with the control node.
    pub async fn add_role_to_member(&self, id: &CommunityId, member: &PublicKey, role: MemberRole) -> Result<bool> {
        if role == MemberRole::Owner {
            return Err(ManagerError::InvalidOperation("the owner role cannot be granted".into()));
        }
        let member = *member;
        let added = self
            .edit_description(id, move |d| Ok(d.add_role(&member, role)?))
            .await?;
        if added {
            info!(community = %id, %member, ?role, "role granted");
        }
        Ok(added)
    }

    pub async fn remove_role_from_member(&self, id: &CommunityId, member: &PublicKey, role: MemberRole) -> Result<bool> {
        let member = *member;
        let removed = self
            .edit_description(id, move |d| Ok(d.remove_role(&member, role)?))
            .await?;
        if removed {
            info!(community = %id, %member, ?role, "role revoked");
        }
        Ok(removed)
    }
}

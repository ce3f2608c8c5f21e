//! Community structure: creation, token permissions, chats and categories.
//!
//! Structural edits are signed by the control node only. Every token
//! permission change is followed by a forced members reevaluation.

use std::sync::Arc;

use cohort_core::{
    validate_description, AccessSettings, CategoryId, Chat, ChatId, ChatSettings, CommunityId,
    CommunityIdentity, Description, DescriptionChanges, Keypair, PermissionId, SignedDescription,
    TokenPermission,
};
use cohort_store::{Store, StoreExt};
use cohort_sync::{CommunityEvent, Transport};
use tracing::info;

use crate::community::Community;
use crate::error::Result;
use crate::manager::Manager;

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    // ─────────────────────────────────────────────────────────────────────────
    // Communities
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a community with the local identity as control node and owner.
    pub async fn create_community(&self, identity: CommunityIdentity, access: AccessSettings) -> Result<Arc<Community>> {
        let community_key = Keypair::generate();
        let id = CommunityId::from_key(&community_key.public_key());
        let description = Description::new(id, self.public_key(), identity, access);
        validate_description(&description)?;

        let community = Community {
            signed: SignedDescription::sign(&description, &community_key)?,
            description,
            joined: true,
            community_key: Some(community_key),
        };
        self.store.commit_community(&community.to_record()).await?;
        let state = self.registry.insert(community);
        let community = state.snapshot();

        info!(community = %id, name = %community.description.identity.name, "community created");
        self.events.publish(CommunityEvent::DescriptionChanged {
            community_id: id,
            clock: community.clock(),
            changes: Arc::new(DescriptionChanges::default()),
        });
        Ok(community)
    }

    /// Start following a community from a description signed by its key.
    ///
    /// A community already known is updated if the description is newer.
    pub async fn spectate_community(&self, signed: SignedDescription) -> Result<Arc<Community>> {
        let id = signed.decode_unverified()?.community_id;
        let description = signed.open(&id)?;
        validate_description(&description)?;

        if let Some(state) = self.registry.get(&id) {
            let control_node = description.control_node;
            self.apply_signed(&state, control_node, signed).await?;
            return Ok(state.snapshot());
        }

        let community = Community {
            joined: description.has_member(&self.public_key()),
            description,
            signed,
            community_key: None,
        };
        self.store.commit_community(&community.to_record()).await?;
        info!(community = %id, "spectating community");
        Ok(self.registry.insert(community).snapshot())
    }

    /// Stop participating in a community. Its history is kept.
    ///
    /// A member other than the control node also asks the control node to
    /// remove it from the description.
    pub async fn leave_community(&self, id: &CommunityId) -> Result<()> {
        let state = self.state(id)?;
        self.stop_members_reevaluation(id);
        let community = {
            let _guard = state.lock.lock().await;
            let mut community = (*state.snapshot()).clone();
            community.joined = false;
            self.store.save_community(&community.to_record()).await?;
            state.publish(community)
        };
        let me = self.public_key();
        if community.description.has_member(&me) && community.control_node() != me {
            self.send_request_to_leave(&community).await?;
        }
        self.events.close_community(id);
        info!(community = %id, "left community");
        Ok(())
    }

    /// Replace the community's name, description text and access settings.
    pub async fn edit_community(
        &self,
        id: &CommunityId,
        identity: CommunityIdentity,
        access: AccessSettings,
    ) -> Result<()> {
        self.edit_description(id, move |d| {
            d.identity = identity;
            d.access = access;
            Ok(())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Token permissions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_token_permission(&self, id: &CommunityId, permission: TokenPermission) -> Result<PermissionId> {
        let permission_id = permission.id;
        let permission_type = permission.permission_type;
        self.edit_description(id, move |d| Ok(d.add_token_permission(permission)?))
            .await?;
        info!(community = %id, permission = %permission_id, ?permission_type, "token permission created");
        self.force_members_reevaluation(id).await?;
        Ok(permission_id)
    }

    pub async fn edit_token_permission(&self, id: &CommunityId, permission: TokenPermission) -> Result<()> {
        self.edit_description(id, move |d| Ok(d.edit_token_permission(permission)?))
            .await?;
        self.force_members_reevaluation(id).await
    }

    /// Delete a token permission. Deleting the last one of a gating type opens the gate.
    pub async fn delete_token_permission(&self, id: &CommunityId, permission_id: &PermissionId) -> Result<()> {
        let permission_id = *permission_id;
        let deleted = self
            .edit_description(id, move |d| Ok(d.delete_token_permission(&permission_id)?))
            .await?;
        info!(
            community = %id,
            permission = %permission_id,
            permission_type = ?deleted.permission_type,
            "token permission deleted"
        );
        self.force_members_reevaluation(id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chats
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_chat(&self, id: &CommunityId, chat: Chat) -> Result<ChatId> {
        let chat_id = chat.id;
        self.edit_description(id, move |d| Ok(d.create_chat(chat)?)).await?;
        Ok(chat_id)
    }

    pub async fn edit_chat(&self, id: &CommunityId, chat_id: &ChatId, settings: ChatSettings) -> Result<()> {
        let chat_id = *chat_id;
        self.edit_description(id, move |d| Ok(d.edit_chat(&chat_id, settings)?))
            .await
    }

    pub async fn delete_chat(&self, id: &CommunityId, chat_id: &ChatId) -> Result<()> {
        let chat_id = *chat_id;
        self.edit_description(id, move |d| {
            d.delete_chat(&chat_id)?;
            Ok(())
        })
        .await
    }

    /// Move a chat to `position` within `category`.
    pub async fn reorder_chat(
        &self,
        id: &CommunityId,
        category: Option<CategoryId>,
        chat_id: &ChatId,
        position: u32,
    ) -> Result<()> {
        let chat_id = *chat_id;
        self.edit_description(id, move |d| Ok(d.reorder_chat(category, &chat_id, position)?))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Categories
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_category(&self, id: &CommunityId, name: &str, chat_ids: &[ChatId]) -> Result<CategoryId> {
        let category_id = CategoryId::random();
        let name = name.to_string();
        let chat_ids = chat_ids.to_vec();
        self.edit_description(id, move |d| Ok(d.create_category(category_id, &name, &chat_ids)?))
            .await?;
        Ok(category_id)
    }

    pub async fn edit_category(
        &self,
        id: &CommunityId,
        category_id: &CategoryId,
        name: &str,
        chat_ids: &[ChatId],
    ) -> Result<()> {
        let category_id = *category_id;
        let name = name.to_string();
        let chat_ids = chat_ids.to_vec();
        self.edit_description(id, move |d| Ok(d.edit_category(&category_id, &name, &chat_ids)?))
            .await
    }

    pub async fn delete_category(&self, id: &CommunityId, category_id: &CategoryId) -> Result<()> {
        let category_id = *category_id;
        self.edit_description(id, move |d| {
            d.delete_category(&category_id)?;
            Ok(())
        })
        .await
    }

    pub async fn reorder_category(&self, id: &CommunityId, category_id: &CategoryId, position: u32) -> Result<()> {
        let category_id = *category_id;
        self.edit_description(id, move |d| Ok(d.reorder_category(&category_id, position)?))
            .await
    }
}


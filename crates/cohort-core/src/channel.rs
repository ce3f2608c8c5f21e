//! Chats, categories and their positions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::Clocked;
use crate::crypto::PublicKey;
use crate::description::Description;
use crate::error::DescriptionError;
use crate::types::{CategoryId, ChatId};

/// What a chat member may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelRole {
    Viewer,
    Poster,
}

/// Editable display settings of a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub name: String,
    pub description: String,
    pub emoji: String,
    /// Hide the chat from members who do not satisfy its permissions.
    pub hide_if_permissions_not_met: bool,
}

/// A channel within a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub settings: ChatSettings,
    pub category_id: Option<CategoryId>,
    pub position: u32,
    pub members: BTreeMap<PublicKey, ChannelRole>,
    pub clock: u64,
}

impl Chat {
    pub fn new(name: &str) -> Self {
        Self {
            id: ChatId::random(),
            settings: ChatSettings {
                name: name.to_string(),
                ..Default::default()
            },
            category_id: None,
            position: 0,
            members: BTreeMap::new(),
            clock: 0,
        }
    }

    pub fn in_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn can_post(&self, identity: &PublicKey) -> bool {
        self.members.get(identity) == Some(&ChannelRole::Poster)
    }
}

impl Clocked for Chat {
    fn clock(&self) -> u64 {
        self.clock
    }
}

/// A named, positioned group of chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub position: u32,
}

fn clamp_position(position: u32, len: usize) -> u32 {
    match len {
        0 => 0,
        len => position.min(len as u32 - 1),
    }
}

impl Description {
    // ─────────────────────────────────────────────────────────────────────
    // Chats
    // ─────────────────────────────────────────────────────────────────────

    /// Add a chat at the end of its category.
    ///
    /// A chat created without members is populated with every community
    /// member as poster.
    pub fn create_chat(&mut self, mut chat: Chat) -> Result<(), DescriptionError> {
        if self.chats.contains_key(&chat.id) {
            return Err(DescriptionError::ChatAlreadyExists(chat.id));
        }
        self.check_chat_name(&chat.settings.name, None)?;
        if let Some(category) = chat.category_id {
            if !self.categories.contains_key(&category) {
                return Err(DescriptionError::CategoryNotFound(category));
            }
        }

        chat.position = self.category_chats(chat.category_id).len() as u32;
        if chat.members.is_empty() {
            chat.members = self
                .members
                .keys()
                .map(|key| (*key, ChannelRole::Poster))
                .collect();
        }
        chat.clock = self.next_clock();
        self.chats.insert(chat.id, chat);
        Ok(())
    }

    pub fn edit_chat(&mut self, id: &ChatId, settings: ChatSettings) -> Result<(), DescriptionError> {
        if !self.chats.contains_key(id) {
            return Err(DescriptionError::ChatNotFound(*id));
        }
        self.check_chat_name(&settings.name, Some(id))?;
        let clock = self.next_clock();
        if let Some(chat) = self.chats.get_mut(id) {
            chat.settings = settings;
            chat.clock = clock;
        }
        Ok(())
    }

    /// Delete a chat and close the gap it leaves in its category.
    ///
    /// The chat is dropped from channel permissions; a channel permission
    /// left without chats is deleted.
    pub fn delete_chat(&mut self, id: &ChatId) -> Result<Chat, DescriptionError> {
        let chat = self.chats.remove(id).ok_or(DescriptionError::ChatNotFound(*id))?;
        self.sort_category_chats(chat.category_id);

        let clock = self.next_clock();
        self.token_permissions.retain(|_, permission| {
            if !permission.chat_ids.remove(id) {
                return true;
            }
            permission.clock = clock;
            !(permission.permission_type.is_channel_permission() && permission.chat_ids.is_empty())
        });
        Ok(chat)
    }

    fn check_chat_name(&self, name: &str, except: Option<&ChatId>) -> Result<(), DescriptionError> {
        let taken = self
            .chats
            .values()
            .any(|chat| Some(&chat.id) != except && chat.settings.name == name);
        if taken {
            return Err(DescriptionError::DuplicateChatName(name.to_string()));
        }
        Ok(())
    }

    /// Seat `identity` in a chat. Returns false if nothing changed.
    pub fn set_chat_member(&mut self, chat_id: &ChatId, identity: PublicKey, role: ChannelRole) -> bool {
        let clock = self.next_clock();
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return false;
        };
        if chat.members.insert(identity, role) == Some(role) {
            return false;
        }
        chat.clock = clock;
        true
    }

    pub fn remove_chat_member(&mut self, chat_id: &ChatId, identity: &PublicKey) -> bool {
        let clock = self.next_clock();
        let Some(chat) = self.chats.get_mut(chat_id) else {
            return false;
        };
        if chat.members.remove(identity).is_none() {
            return false;
        }
        chat.clock = clock;
        true
    }

    /// Chat ids in `category`, ordered by position then id.
    pub fn category_chats(&self, category: Option<CategoryId>) -> Vec<ChatId> {
        let mut chats: Vec<&Chat> = self
            .chats
            .values()
            .filter(|chat| chat.category_id == category)
            .collect();
        chats.sort_by_key(|chat| (chat.position, chat.id));
        chats.into_iter().map(|chat| chat.id).collect()
    }

    /// Renumber the chats of a category to `0..n`.
    fn sort_category_chats(&mut self, category: Option<CategoryId>) {
        let clock = self.next_clock();
        for (position, id) in self.category_chats(category).into_iter().enumerate() {
            if let Some(chat) = self.chats.get_mut(&id) {
                if chat.position != position as u32 {
                    chat.position = position as u32;
                    chat.clock = clock;
                }
            }
        }
    }

    /// Move a chat into `category` at `position`, shifting the chats behind it.
    pub fn reorder_chat(
        &mut self,
        category: Option<CategoryId>,
        chat_id: &ChatId,
        position: u32,
    ) -> Result<(), DescriptionError> {
        if let Some(category) = category {
            if !self.categories.contains_key(&category) {
                return Err(DescriptionError::CategoryNotFound(category));
            }
        }
        let previous = self
            .chats
            .get(chat_id)
            .map(|chat| chat.category_id)
            .ok_or(DescriptionError::ChatNotFound(*chat_id))?;

        let mut order: Vec<ChatId> = self
            .category_chats(category)
            .into_iter()
            .filter(|id| id != chat_id)
            .collect();
        let position = clamp_position(position, order.len() + 1) as usize;
        order.insert(position, *chat_id);

        let clock = self.next_clock();
        if let Some(chat) = self.chats.get_mut(chat_id) {
            chat.category_id = category;
            chat.clock = clock;
        }
        for (index, id) in order.into_iter().enumerate() {
            if let Some(chat) = self.chats.get_mut(&id) {
                if chat.position != index as u32 {
                    chat.position = index as u32;
                    chat.clock = clock;
                }
            }
        }
        if previous != category {
            self.sort_category_chats(previous);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Categories
    // ─────────────────────────────────────────────────────────────────────

    fn check_assignable(&self, category: &CategoryId, chat_ids: &[ChatId]) -> Result<(), DescriptionError> {
        for id in chat_ids {
            let chat = self.chats.get(id).ok_or(DescriptionError::ChatNotFound(*id))?;
            if matches!(chat.category_id, Some(other) if other != *category) {
                return Err(DescriptionError::ChatAlreadyAssigned(*id));
            }
        }
        Ok(())
    }

    fn assign_chats(&mut self, category: CategoryId, chat_ids: &[ChatId]) {
        let clock = self.next_clock();
        for (position, id) in chat_ids.iter().enumerate() {
            if let Some(chat) = self.chats.get_mut(id) {
                chat.category_id = Some(category);
                chat.position = position as u32;
                chat.clock = clock;
            }
        }
    }

    /// Create a category at the end, moving `chat_ids` into it in order.
    pub fn create_category(
        &mut self,
        id: CategoryId,
        name: &str,
        chat_ids: &[ChatId],
    ) -> Result<(), DescriptionError> {
        if self.categories.contains_key(&id) {
            return Err(DescriptionError::CategoryAlreadyExists(id));
        }
        self.check_assignable(&id, chat_ids)?;

        let position = self.categories.len() as u32;
        self.categories.insert(
            id,
            Category {
                id,
                name: name.to_string(),
                position,
            },
        );
        self.assign_chats(id, chat_ids);
        self.sort_category_chats(None);
        Ok(())
    }

    /// Rename a category and replace its chat list.
    ///
    /// Chats dropped from the list move to the end of the uncategorized chats.
    pub fn edit_category(
        &mut self,
        id: &CategoryId,
        name: &str,
        chat_ids: &[ChatId],
    ) -> Result<(), DescriptionError> {
        if !self.categories.contains_key(id) {
            return Err(DescriptionError::CategoryNotFound(*id));
        }
        self.check_assignable(id, chat_ids)?;

        self.release_chats(id, |chat| !chat_ids.contains(chat));
        if let Some(category) = self.categories.get_mut(id) {
            category.name = name.to_string();
        }
        self.assign_chats(*id, chat_ids);
        self.sort_category_chats(None);
        Ok(())
    }

    /// Delete a category; its chats become uncategorized.
    pub fn delete_category(&mut self, id: &CategoryId) -> Result<Category, DescriptionError> {
        let category = self
            .categories
            .remove(id)
            .ok_or(DescriptionError::CategoryNotFound(*id))?;
        self.release_chats(id, |_| true);
        self.sort_category_chats(None);
        self.normalize_categories(None);
        Ok(category)
    }

    fn release_chats(&mut self, category: &CategoryId, release: impl Fn(&ChatId) -> bool) {
        let mut next = self.category_chats(None).len() as u32;
        let clock = self.next_clock();
        for id in self.category_chats(Some(*category)) {
            if !release(&id) {
                continue;
            }
            if let Some(chat) = self.chats.get_mut(&id) {
                chat.category_id = None;
                chat.position = next;
                chat.clock = clock;
                next += 1;
            }
        }
    }

    /// Move a category to `position`, clamped to the category count.
    pub fn reorder_category(&mut self, id: &CategoryId, position: u32) -> Result<(), DescriptionError> {
        if !self.categories.contains_key(id) {
            return Err(DescriptionError::CategoryNotFound(*id));
        }
        let position = clamp_position(position, self.categories.len());
        self.normalize_categories(Some((*id, position)));
        Ok(())
    }

    /// Renumber categories to `0..n`, optionally pinning one at a position.
    fn normalize_categories(&mut self, pinned: Option<(CategoryId, u32)>) {
        let mut order: Vec<&Category> = self
            .categories
            .values()
            .filter(|c| Some(c.id) != pinned.map(|(id, _)| id))
            .collect();
        order.sort_by_key(|c| (c.position, c.id));
        let mut order: Vec<CategoryId> = order.into_iter().map(|c| c.id).collect();
        if let Some((id, position)) = pinned {
            order.insert((position as usize).min(order.len()), id);
        }
        for (index, id) in order.into_iter().enumerate() {
            if let Some(category) = self.categories.get_mut(&id) {
                category.position = index as u32;
            }
        }
    }

    /// Categories ordered by position.
    pub fn ordered_categories(&self) -> Vec<&Category> {
        let mut categories: Vec<&Category> = self.categories.values().collect();
        categories.sort_by_key(|c| (c.position, c.id));
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::description::{AccessSettings, CommunityIdentity};
    use crate::types::CommunityId;

    fn description() -> Description {
        Description::new(
            CommunityId::from_key(&Keypair::generate().public_key()),
            Keypair::generate().public_key(),
            CommunityIdentity::named("test"),
            AccessSettings::default(),
        )
    }

    fn add_chats(description: &mut Description, names: &[&str]) -> Vec<ChatId> {
        names
            .iter()
            .map(|name| {
                let chat = Chat::new(name);
                let id = chat.id;
                description.create_chat(chat).unwrap();
                id
            })
            .collect()
    }

    #[test]
    fn test_chat_positions_append_within_category() {
        let mut description = description();
        let ids = add_chats(&mut description, &["a", "b", "c"]);
        let positions: Vec<u32> = ids.iter().map(|id| description.chats[id].position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_create_chat_rejects_duplicates() {
        let mut description = description();
        let chat = Chat::new("general");
        description.create_chat(chat.clone()).unwrap();
        assert_eq!(
            description.create_chat(chat.clone()),
            Err(DescriptionError::ChatAlreadyExists(chat.id))
        );
        assert_eq!(
            description.create_chat(Chat::new("general")),
            Err(DescriptionError::DuplicateChatName("general".into()))
        );
    }

    #[test]
    fn test_new_chat_seats_all_members() {
        let mut description = description();
        let control = description.control_node;
        let chat = add_chats(&mut description, &["general"])[0];
        assert_eq!(description.chats[&chat].members.get(&control), Some(&ChannelRole::Poster));
    }

    #[test]
    fn test_delete_chat_resorts_category() {
        let mut description = description();
        let ids = add_chats(&mut description, &["a", "b", "c"]);
        description.delete_chat(&ids[0]).unwrap();
        assert_eq!(description.chats[&ids[1]].position, 0);
        assert_eq!(description.chats[&ids[2]].position, 1);
    }

    #[test]
    fn test_create_category_moves_chats() {
        let mut description = description();
        let ids = add_chats(&mut description, &["a", "b", "c"]);
        let category = CategoryId::random();
        description.create_category(category, "cat", &[ids[2], ids[0]]).unwrap();

        assert_eq!(description.category_chats(Some(category)), vec![ids[2], ids[0]]);
        assert_eq!(description.chats[&ids[1]].position, 0);
        assert_eq!(description.categories[&category].position, 0);
    }

    #[test]
    fn test_chat_cannot_join_two_categories() {
        let mut description = description();
        let ids = add_chats(&mut description, &["a"]);
        let first = CategoryId::random();
        description.create_category(first, "first", &ids).unwrap();
        assert_eq!(
            description.create_category(CategoryId::random(), "second", &ids),
            Err(DescriptionError::ChatAlreadyAssigned(ids[0]))
        );
    }

    #[test]
    fn test_delete_category_uncategorizes_chats() {
        let mut description = description();
        let ids = add_chats(&mut description, &["a", "b"]);
        let category = CategoryId::random();
        description.create_category(category, "cat", &[ids[1]]).unwrap();
        description.delete_category(&category).unwrap();

        assert_eq!(description.category_chats(None), vec![ids[0], ids[1]]);
        assert!(description.chats[&ids[1]].category_id.is_none());
    }

    #[test]
    fn test_edit_category_releases_dropped_chats() {
        let mut description = description();
        let ids = add_chats(&mut description, &["a", "b", "c"]);
        let category = CategoryId::random();
        description.create_category(category, "cat", &[ids[0], ids[1]]).unwrap();
        description.edit_category(&category, "renamed", &[ids[1]]).unwrap();

        assert_eq!(description.categories[&category].name, "renamed");
        assert_eq!(description.category_chats(Some(category)), vec![ids[1]]);
        assert_eq!(description.category_chats(None), vec![ids[2], ids[0]]);
    }

    #[test]
    fn test_reorder_category_clamps_position() {
        let mut description = description();
        let ids: Vec<CategoryId> = (0..3).map(|_| CategoryId::random()).collect();
        for (i, id) in ids.iter().enumerate() {
            description.create_category(*id, &format!("c{i}"), &[]).unwrap();
        }
        description.reorder_category(&ids[0], 99).unwrap();

        let order: Vec<CategoryId> = description.ordered_categories().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn test_reorder_chat_across_categories() {
        let mut description = description();
        let ids = add_chats(&mut description, &["a", "b", "c"]);
        let category = CategoryId::random();
        description.create_category(category, "cat", &[ids[0]]).unwrap();

        description.reorder_chat(Some(category), &ids[2], 0).unwrap();
        assert_eq!(description.category_chats(Some(category)), vec![ids[2], ids[0]]);
        assert_eq!(description.category_chats(None), vec![ids[1]]);
        assert_eq!(description.chats[&ids[1]].position, 0);
    }
}

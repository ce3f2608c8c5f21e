//! Structural validation of descriptions received from peers.

use crate::description::Description;
use crate::error::DescriptionError;

/// Check the internal consistency of a description.
///
/// This performs:
/// - Clock check
/// - Map keys matching the entities they index
/// - Chat category references
/// - Channel permission chat references
/// - Ban list disjoint from members
pub fn validate_description(description: &Description) -> Result<(), DescriptionError> {
    if description.clock == 0 {
        return Err(DescriptionError::Structural("clock must be positive".into()));
    }

    for (key, member) in &description.members {
        if *key != member.public_key {
            return Err(DescriptionError::Structural(format!(
                "member {} indexed under {}",
                member.public_key, key
            )));
        }
        if member.clock > description.clock {
            return Err(DescriptionError::Structural(format!(
                "member {} stamped after the description",
                key
            )));
        }
    }

    for (id, chat) in &description.chats {
        if *id != chat.id {
            return Err(DescriptionError::Structural(format!("chat {} indexed under {}", chat.id, id)));
        }
        if let Some(category) = chat.category_id {
            if !description.categories.contains_key(&category) {
                return Err(DescriptionError::CategoryNotFound(category));
            }
        }
    }

    for (id, category) in &description.categories {
        if *id != category.id {
            return Err(DescriptionError::Structural(format!(
                "category {} indexed under {}",
                category.id, id
            )));
        }
    }

    for (id, permission) in &description.token_permissions {
        if *id != permission.id {
            return Err(DescriptionError::Structural(format!(
                "permission {} indexed under {}",
                permission.id, id
            )));
        }
        if let Some(missing) = permission
            .chat_ids
            .iter()
            .find(|chat| !description.chats.contains_key(chat))
        {
            return Err(DescriptionError::ChatNotFound(*missing));
        }
    }

    if let Some(banned) = description.banned.iter().find(|key| description.members.contains_key(key)) {
        return Err(DescriptionError::Structural(format!("banned identity {} is a member", banned)));
    }

    Ok(())
}

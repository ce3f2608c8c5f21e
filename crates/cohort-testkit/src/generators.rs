//! Proptest generators for property-based testing.

use proptest::prelude::*;

use cohort_core::{
    AccessSettings, Chat, CommunityId, CommunityIdentity, Description, Keypair, PublicKey,
    SignedDescription,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a chat or community name.
pub fn name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(String::from)
}

/// One control node edit.
#[derive(Debug, Clone)]
pub enum DescriptionEdit {
    AddMember(PublicKey),
    /// Remove the n-th member other than the control node, modulo the count.
    RemoveMember(usize),
    BanMember(usize),
    Rename(String),
    AddChat(String),
}

pub fn description_edit() -> impl Strategy<Value = DescriptionEdit> {
    prop_oneof![
        3 => public_key().prop_map(DescriptionEdit::AddMember),
        1 => any::<usize>().prop_map(DescriptionEdit::RemoveMember),
        1 => any::<usize>().prop_map(DescriptionEdit::BanMember),
        1 => name().prop_map(DescriptionEdit::Rename),
        1 => name().prop_map(DescriptionEdit::AddChat),
    ]
}

fn nth_member(description: &Description, n: usize) -> Option<PublicKey> {
    let others: Vec<PublicKey> = description
        .members
        .keys()
        .filter(|key| **key != description.control_node)
        .copied()
        .collect();
    if others.is_empty() {
        None
    } else {
        Some(others[n % others.len()])
    }
}

impl DescriptionEdit {
    /// Apply to `description`. Edits that do not fit are skipped.
    pub fn apply(&self, description: &mut Description) {
        match self {
            DescriptionEdit::AddMember(key) => {
                if !description.is_banned(key) {
                    description.add_member(*key, Default::default());
                }
            }
            DescriptionEdit::RemoveMember(n) => {
                if let Some(key) = nth_member(description, *n) {
                    description.remove_member(&key);
                }
            }
            DescriptionEdit::BanMember(n) => {
                if let Some(key) = nth_member(description, *n) {
                    description.ban_member(&key);
                }
            }
            DescriptionEdit::Rename(name) => description.identity.name = name.clone(),
            DescriptionEdit::AddChat(name) => {
                let _ = description.create_chat(Chat::new(name));
            }
        }
    }
}

/// Descriptions of one community as signed by its control node, in
/// authoring order.
#[derive(Debug, Clone)]
pub struct SignedHistory {
    pub community_key: Keypair,
    pub control: Keypair,
    pub descriptions: Vec<Description>,
    pub signed: Vec<SignedDescription>,
}

impl SignedHistory {
    pub fn community_id(&self) -> CommunityId {
        CommunityId::from_key(&self.community_key.public_key())
    }

    pub fn last(&self) -> &Description {
        &self.descriptions[self.descriptions.len() - 1]
    }
}

/// Generate up to `max_edits` committed edits of a fresh community.
pub fn signed_history(max_edits: usize) -> impl Strategy<Value = SignedHistory> {
    (
        keypair(),
        keypair(),
        prop::collection::vec(description_edit(), 1..=max_edits.max(1)),
    )
        .prop_map(|(community_key, control, edits)| {
            let id = CommunityId::from_key(&community_key.public_key());
            let mut description = Description::new(
                id,
                control.public_key(),
                CommunityIdentity::named("history"),
                AccessSettings::default(),
            );
            let mut descriptions = vec![description.clone()];
            for edit in &edits {
                edit.apply(&mut description);
                description.increase_clock();
                descriptions.push(description.clone());
            }
            let signed = descriptions
                .iter()
                .map(|d| SignedDescription::sign(d, &community_key).expect("descriptions encode"))
                .collect();
            SignedHistory {
                community_key,
                control,
                descriptions,
                signed,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::validate_description;

    proptest! {
        #[test]
        fn test_history_clocks_strictly_increase(history in signed_history(8)) {
            prop_assert!(history.descriptions.windows(2).all(|w| w[0].clock < w[1].clock));
        }

        #[test]
        fn test_history_is_valid_and_opens(history in signed_history(8)) {
            let id = history.community_id();
            for (description, signed) in history.descriptions.iter().zip(&history.signed) {
                prop_assert!(validate_description(description).is_ok());
                prop_assert_eq!(&signed.open(&id).unwrap(), description);
            }
        }

        #[test]
        fn test_control_node_never_removed(history in signed_history(12)) {
            let control = history.control.public_key();
            prop_assert!(history.descriptions.iter().all(|d| d.has_member(&control)));
        }
    }
}

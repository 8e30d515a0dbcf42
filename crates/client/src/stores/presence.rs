//! Presence and typing tracker.
//!
//! Presence lives on the participant records embedded in each chat, and the
//! active chat is a separate clone of its chat-list entry, so every update
//! has to touch both the bulk list and the active instance.

use pingline_shared::{Chat, Id};

fn set_online(chat: &mut Chat, user_id: &Id, is_online: bool) {
    if let Some(participant) = chat.participants.iter_mut().find(|p| &p.id == user_id) {
        participant.is_online = is_online;
        if !is_online {
            participant.is_typing = false;
        }
    }
}

/// Mark `user_id` online in every chat containing them.
pub fn apply_user_online(chats: &mut [Chat], active: Option<&mut Chat>, user_id: &Id) {
    for chat in chats.iter_mut() {
        set_online(chat, user_id, true);
    }
    if let Some(chat) = active {
        set_online(chat, user_id, true);
    }
}

/// Mark `user_id` offline in every chat containing them.
pub fn apply_user_offline(chats: &mut [Chat], active: Option<&mut Chat>, user_id: &Id) {
    for chat in chats.iter_mut() {
        set_online(chat, user_id, false);
    }
    if let Some(chat) = active {
        set_online(chat, user_id, false);
    }
}

/// Update the typing flag for `user_id`, scoped to the chat the event names.
pub fn apply_typing(
    chats: &mut [Chat],
    active: Option<&mut Chat>,
    chat_id: &Id,
    user_id: &Id,
    is_typing: bool,
) {
    for chat in chats.iter_mut().filter(|c| &c.id == chat_id) {
        if let Some(participant) = chat.participants.iter_mut().find(|p| &p.id == user_id) {
            participant.is_typing = is_typing;
        }
    }
    if let Some(chat) = active {
        if &chat.id == chat_id {
            if let Some(participant) = chat.participants.iter_mut().find(|p| &p.id == user_id) {
                participant.is_typing = is_typing;
            }
        }
    }
}

/// Whether anyone besides the current user is online in this chat.
pub fn is_other_online(chat: &Chat, self_id: &Id) -> bool {
    chat.others(self_id).any(|p| p.is_online)
}

/// How many participants besides the current user are online.
pub fn online_count(chat: &Chat, self_id: &Id) -> usize {
    chat.others(self_id).filter(|p| p.is_online).count()
}

/// Whether anyone besides the current user is typing in this chat.
pub fn is_anyone_typing(chat: &Chat, self_id: &Id) -> bool {
    chat.others(self_id).any(|p| p.is_typing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingline_shared::User;

    fn user(id: u64) -> User {
        User {
            id: Id::from(id),
            email: format!("u{id}@example.com"),
            first_name: format!("User{id}"),
            last_name: String::new(),
            avatar: None,
            is_online: false,
            is_typing: false,
        }
    }

    fn chat(id: &str, participant_ids: &[u64]) -> Chat {
        Chat {
            id: Id::from(id),
            is_group: participant_ids.len() > 2,
            name: None,
            participants: participant_ids.iter().map(|&i| user(i)).collect(),
            last_message: None,
        }
    }

    #[test]
    fn online_update_touches_list_and_active_instance() {
        let mut chats = vec![chat("1", &[1, 2]), chat("2", &[1, 3])];
        // Active chat is a detached clone of the same chat id.
        let mut active = chats[0].clone();

        apply_user_online(&mut chats, Some(&mut active), &Id::from(2u64));

        assert!(chats[0].participants[1].is_online);
        assert!(active.participants[1].is_online);
        // User 2 is not in chat 2.
        assert!(!chats[1].participants.iter().any(|p| p.is_online));
    }

    #[test]
    fn going_offline_clears_typing() {
        let mut chats = vec![chat("1", &[1, 2])];
        apply_typing(&mut chats, None, &Id::from("1"), &Id::from(2u64), true);
        assert!(chats[0].participants[1].is_typing);

        apply_user_offline(&mut chats, None, &Id::from(2u64));
        assert!(!chats[0].participants[1].is_online);
        assert!(!chats[0].participants[1].is_typing);
    }

    #[test]
    fn typing_is_scoped_to_one_chat() {
        let mut chats = vec![chat("1", &[1, 2]), chat("2", &[1, 2])];
        apply_typing(&mut chats, None, &Id::from("2"), &Id::from(2u64), true);

        assert!(!chats[0].participants[1].is_typing);
        assert!(chats[1].participants[1].is_typing);
    }

    #[test]
    fn derived_queries_exclude_self() {
        let mut group = chat("g", &[1, 2, 3]);
        group.participants[0].is_online = true; // self
        group.participants[1].is_online = true;

        let self_id = Id::from(1u64);
        assert!(is_other_online(&group, &self_id));
        assert_eq!(online_count(&group, &self_id), 1);
        assert!(!is_anyone_typing(&group, &self_id));

        group.participants[0].is_typing = true; // self typing doesn't count
        assert!(!is_anyone_typing(&group, &self_id));
        group.participants[2].is_typing = true;
        assert!(is_anyone_typing(&group, &self_id));
    }

    #[test]
    fn ids_from_events_match_api_ids() {
        // Event payloads carry numeric ids, API responses string ids; both
        // normalize to the same canonical form.
        let mut chats = vec![chat("1", &[1, 2])];
        let event_id: Id = serde_json::from_str("2").unwrap();
        apply_user_online(&mut chats, None, &event_id);
        assert!(chats[0].participants[1].is_online);
    }
}

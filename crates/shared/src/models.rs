//! Shared data models for the pingline chat application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// --- Identity ---

/// Prefix for client-generated temporary message ids.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Canonical identifier for users, chats and messages.
///
/// The GraphQL backend returns ids as strings or numbers depending on the
/// operation, and realtime events may carry either form too. Deserialization
/// accepts both and normalizes to a string immediately, so every later
/// comparison is a plain equality check instead of a per-site coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Id(String);

impl Id {
    /// Mint a client-local temporary id for a not-yet-confirmed message.
    ///
    /// Server-assigned ids never carry the `temp-` prefix, so the two id
    /// spaces cannot collide.
    pub fn temp() -> Self {
        Id(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_temp(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id(value)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdVisitor;

        impl serde::de::Visitor<'_> for IdVisitor {
            type Value = Id;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a string or integer id")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Id, E> {
                Ok(Id(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Id, E> {
                Ok(Id(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Id, E> {
                Ok(Id(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Presence flag, scoped to the chat instance holding this record.
    #[serde(default)]
    pub is_online: bool,
    /// Typing flag, scoped to the chat instance holding this record.
    #[serde(default)]
    pub is_typing: bool,
}

impl User {
    /// Display name falling back to the email when both name parts are empty.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }
}

// --- Messaging ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Id,
    #[serde(default)]
    pub is_group: bool,
    /// Required for group chats, absent for direct chats.
    #[serde(default)]
    pub name: Option<String>,
    pub participants: Vec<User>,
    #[serde(default)]
    pub last_message: Option<Message>,
}

impl Chat {
    /// Every participant except the current user.
    ///
    /// The id is cloned into the filter so the iterator borrows only the
    /// chat, not the id argument.
    pub fn others<'a>(&'a self, self_id: &Id) -> impl Iterator<Item = &'a User> + 'a {
        let self_id = self_id.clone();
        self.participants.iter().filter(move |p| p.id != self_id)
    }

    /// The other participant of a direct chat. `None` for group chats.
    pub fn other_participant(&self, self_id: &Id) -> Option<&User> {
        if self.is_group {
            return None;
        }
        self.others(self_id).next()
    }

    /// Name shown in the chat list.
    pub fn display_name(&self, self_id: &Id) -> String {
        if self.is_group {
            return self
                .name
                .clone()
                .unwrap_or_else(|| format!("Group ({} members)", self.participants.len()));
        }
        match self.other_participant(self_id) {
            Some(user) => user.display_name(),
            None => "Unknown User".to_string(),
        }
    }
}

// --- Session ---

/// Durable hint persisted across restarts so the UI can render an
/// optimistic signed-in state before the authoritative server check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_authenticated: bool,
}

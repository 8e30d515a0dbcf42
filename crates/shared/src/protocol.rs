//! Realtime socket protocol.
//!
//! Frames are JSON objects of the form `{"event": ..., "data": {...}}`.
//! Event names match the socket server's contract, so the serde renames
//! here are wire format, not style.

use serde::{Deserialize, Serialize};

use crate::models::{Chat, Id, Message};

/// Events emitted by the client over the socket connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom { chat_id: Id },
    LeaveRoom { chat_id: Id },
    SendMessage { chat_id: Id, message: Message },
    UserOnline { user_id: Id },
    UserOffline { user_id: Id },
    UserStartTyping { chat_id: Id, user_id: Id },
    UserStopTyping { chat_id: Id, user_id: Id },
}

/// Events pushed by the socket server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage {
        chat_id: Id,
        message: Message,
    },
    UserStatusChanged {
        user_id: Id,
        is_online: bool,
    },
    UserTypingStatusChanged {
        chat_id: Id,
        user_id: Id,
        is_typing: bool,
    },
    NewChatCreated {
        chat: Chat,
    },
}

/// Discriminant used for handler registration and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReceiveMessage,
    UserStatusChanged,
    UserTypingStatusChanged,
    NewChatCreated,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::ReceiveMessage { .. } => EventKind::ReceiveMessage,
            ServerEvent::UserStatusChanged { .. } => EventKind::UserStatusChanged,
            ServerEvent::UserTypingStatusChanged { .. } => EventKind::UserTypingStatusChanged,
            ServerEvent::NewChatCreated { .. } => EventKind::NewChatCreated,
        }
    }
}

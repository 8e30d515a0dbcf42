//! Chat collection store.
//!
//! Owns the authoritative chat list, the active chat, and the active chat's
//! message list, and reconciles three asynchronous sources into them:
//! GraphQL responses, inbound socket events, and local optimistic edits.
//! State is published through a `watch` channel so any UI layer can
//! subscribe without this crate depending on a reactivity library.

use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tokio::sync::watch;

use pingline_shared::{CallError, Chat, EventKind, Id, Message, ServerEvent, User};

use crate::api::ChatBackend;
use crate::stores::presence;
use crate::stores::session::SessionReader;
use crate::ws::{HandlerId, SocketClient};

/// Observable snapshot of chat state.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    /// All chats for the current user, most recently touched first.
    pub chats: Vec<Chat>,
    /// The chat currently open in the message pane. A clone of its chat-list
    /// entry; [`ChatStore::set_active_chat`] keeps the two in sync.
    pub active_chat: Option<Chat>,
    /// Message history of the active chat, oldest first.
    pub active_messages: Vec<Message>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ChatState {
    fn is_active(&self, chat_id: &Id) -> bool {
        self.active_chat.as_ref().is_some_and(|c| &c.id == chat_id)
    }
}

/// The chat collection store. One per session, shared behind an [`Arc`].
pub struct ChatStore {
    state: watch::Sender<ChatState>,
    api: Arc<dyn ChatBackend>,
    socket: Arc<SocketClient>,
    session: Arc<dyn SessionReader>,
    bindings: Mutex<Vec<(EventKind, HandlerId)>>,
    /// Back-reference handed to socket handlers.
    weak_self: Weak<ChatStore>,
}

impl ChatStore {
    pub fn new(
        api: Arc<dyn ChatBackend>,
        socket: Arc<SocketClient>,
        session: Arc<dyn SessionReader>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ChatState::default());
        Arc::new_cyclic(|weak| Self {
            state,
            api,
            socket,
            session,
            bindings: Mutex::new(Vec::new()),
            weak_self: weak.clone(),
        })
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    /// One-shot copy of the current state.
    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    fn modify(&self, f: impl FnOnce(&mut ChatState)) {
        self.state.send_modify(f);
    }

    // --- Loading ---

    /// Load the full chat list, replacing local state wholesale, then join
    /// every chat's room for realtime updates.
    ///
    /// Failures are recorded in the `error` field and leave the prior list
    /// untouched; a transient load failure must not blank the UI.
    pub async fn load_user_chats(&self) {
        self.modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
        match self.api.get_user_chats().await {
            Ok(chats) => {
                self.modify(|s| {
                    s.chats = chats;
                    s.is_loading = false;
                });
                self.join_all_rooms();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load chats");
                self.modify(|s| {
                    s.error = Some(e.to_string());
                    s.is_loading = false;
                });
            }
        }
    }

    fn join_all_rooms(&self) {
        if !self.socket.is_connected() {
            tracing::warn!("socket not connected when joining chat rooms");
            return;
        }
        for chat in self.state.borrow().chats.iter() {
            self.socket.join_room(chat.id.clone());
        }
    }

    /// Fetch the message history for `chat_id` from the server.
    ///
    /// The result is applied only if that chat is still active when the
    /// response arrives; a stale load must not leak into another chat's view.
    pub async fn load_chat_messages(&self, chat_id: &Id) {
        let result = self.api.get_chat_messages(chat_id).await;
        self.modify(|s| {
            if !s.is_active(chat_id) {
                return;
            }
            match result {
                Ok(messages) => s.active_messages = messages,
                Err(e) => {
                    tracing::error!(error = %e, chat_id = %chat_id, "failed to load messages");
                    s.active_messages.clear();
                }
            }
        });
    }

    // --- Chat list mutation ---

    /// Merge a server-returned chat into the list by id: update in place if
    /// present, otherwise prepend (most recently touched chats surface
    /// first). Only a newly prepended chat joins its room; an updated chat
    /// is already joined.
    fn merge_chat(&self, chat: Chat) -> bool {
        let chat_id = chat.id.clone();
        let mut inserted = false;
        self.modify(|s| {
            if let Some(existing) = s.chats.iter_mut().find(|c| c.id == chat.id) {
                *existing = chat;
            } else {
                s.chats.insert(0, chat);
                inserted = true;
            }
        });
        if inserted {
            self.socket.join_room(chat_id);
        }
        inserted
    }

    /// Set (or clear) the active chat.
    ///
    /// A non-null chat is always re-resolved to the canonical entry in the
    /// chat list so a detached copy never diverges from the list. Clearing
    /// the active chat also clears the active message list.
    pub fn set_active_chat(&self, chat: Option<Chat>) {
        self.modify(|s| match chat {
            Some(chat) => match s.chats.iter().find(|c| c.id == chat.id) {
                Some(canonical) => s.active_chat = Some(canonical.clone()),
                None => {
                    tracing::warn!(
                        chat_id = %chat.id,
                        "active chat not in list, keeping passed value"
                    );
                    s.active_chat = Some(chat);
                }
            },
            None => {
                s.active_chat = None;
                s.active_messages.clear();
            }
        });
    }

    // --- User-initiated operations ---

    /// Open the direct chat with `other_user_id`, creating it server-side if
    /// needed. The backend guarantees at most one direct chat per user pair;
    /// the id-based merge keeps repeated calls from duplicating it locally.
    pub async fn open_or_create_chat(&self, other_user_id: &Id) -> Result<Chat, CallError> {
        self.modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
        let result = self.api.open_or_create_chat(other_user_id).await;
        match result {
            Ok(chat) => {
                self.merge_chat(chat.clone());
                self.set_active_chat(Some(chat.clone()));
                self.load_chat_messages(&chat.id).await;
                self.modify(|s| s.is_loading = false);
                Ok(chat)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to open chat");
                self.modify(|s| {
                    s.error = Some(e.to_string());
                    s.is_loading = false;
                });
                Err(e)
            }
        }
    }

    /// Create a group chat. Requires a non-empty name and at least two other
    /// participants; both are checked before any network call.
    pub async fn create_group_chat(
        &self,
        name: &str,
        participant_ids: &[Id],
    ) -> Result<Chat, CallError> {
        if name.trim().is_empty() {
            return Err(CallError::Validation("group chat needs a name".to_string()));
        }
        if participant_ids.len() < 2 {
            return Err(CallError::Validation(
                "group chat needs at least 2 other participants".to_string(),
            ));
        }

        self.modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
        let result = self.api.create_group_chat(name, participant_ids).await;
        match result {
            Ok(chat) => {
                self.merge_chat(chat.clone());
                self.set_active_chat(Some(chat.clone()));
                self.load_chat_messages(&chat.id).await;
                self.modify(|s| s.is_loading = false);
                Ok(chat)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to create group chat");
                self.modify(|s| {
                    s.error = Some(e.to_string());
                    s.is_loading = false;
                });
                Err(e)
            }
        }
    }

    /// Select an existing chat and load its history fresh from the server.
    /// Message lists are not cached across selections.
    pub async fn select_chat(&self, chat: Chat) {
        let chat_id = chat.id.clone();
        self.modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
        self.set_active_chat(Some(chat));
        self.load_chat_messages(&chat_id).await;
        self.modify(|s| s.is_loading = false);
    }

    /// Send a message with an optimistic local echo.
    ///
    /// A temporary message appears in the active list (if `chat_id` is
    /// active) and as the chat's `last_message` preview immediately. On
    /// confirmation the temporary entry is replaced in place, keyed by its
    /// temporary id so two in-flight sends to different chats cannot
    /// cross-talk, and the confirmed message is broadcast to the chat's
    /// room. On failure the temporary entry is removed and the error is
    /// returned to the caller.
    pub async fn send_message(&self, chat_id: &Id, content: &str) -> Result<Message, CallError> {
        let sender = self
            .session
            .current_user()
            .unwrap_or_else(local_placeholder);
        let temp = Message {
            id: Id::temp(),
            content: content.to_string(),
            created_at: Utc::now(),
            sender,
        };
        let temp_id = temp.id.clone();

        self.modify(|s| {
            if s.is_active(chat_id) {
                s.active_messages.push(temp.clone());
            }
            if let Some(entry) = s.chats.iter_mut().find(|c| &c.id == chat_id) {
                entry.last_message = Some(temp.clone());
            }
        });

        match self.api.send_message(chat_id, content).await {
            Ok(confirmed) => {
                self.modify(|s| {
                    if let Some(slot) = s.active_messages.iter_mut().find(|m| m.id == temp_id) {
                        *slot = confirmed.clone();
                    }
                    if let Some(entry) = s.chats.iter_mut().find(|c| &c.id == chat_id) {
                        entry.last_message = Some(confirmed.clone());
                    }
                });
                self.socket
                    .send_chat_message(chat_id.clone(), confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                self.modify(|s| {
                    // The temporary id is unique, so this cannot touch
                    // another chat's messages even after a chat switch.
                    s.active_messages.retain(|m| m.id != temp_id);
                    // last_message keeps the optimistic value; see DESIGN.md.
                    s.error = Some(e.to_string());
                });
                tracing::error!(error = %e, chat_id = %chat_id, "failed to send message");
                Err(e)
            }
        }
    }

    /// Add a user to a group chat and merge the updated chat by id.
    pub async fn add_participant(&self, chat_id: &Id, user_id: &Id) -> Result<Chat, CallError> {
        match self.api.add_participant(chat_id, user_id).await {
            Ok(chat) => {
                self.apply_updated_chat(chat.clone());
                Ok(chat)
            }
            Err(e) => {
                self.modify(|s| s.error = Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Remove a user from a group chat and merge the updated chat by id.
    pub async fn remove_participant(&self, chat_id: &Id, user_id: &Id) -> Result<Chat, CallError> {
        match self.api.remove_participant(chat_id, user_id).await {
            Ok(chat) => {
                self.apply_updated_chat(chat.clone());
                Ok(chat)
            }
            Err(e) => {
                self.modify(|s| s.error = Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn apply_updated_chat(&self, chat: Chat) {
        let was_active = self.state.borrow().is_active(&chat.id);
        self.merge_chat(chat.clone());
        if was_active {
            self.set_active_chat(Some(chat));
        }
    }

    pub fn clear_error(&self) {
        self.modify(|s| s.error = None);
    }

    /// Drop all chat state (logout).
    pub fn reset(&self) {
        self.modify(|s| *s = ChatState::default());
    }

    // --- Inbound socket events ---

    /// Apply an incoming message: update the chat's preview, and append to
    /// the active list when that chat is open. Appending is id-deduplicated
    /// because a locally sent message can arrive again through the realtime
    /// fan-out after its send confirmation already placed it in the list.
    pub fn apply_incoming_message(&self, chat_id: &Id, message: Message) {
        self.modify(|s| {
            let Some(entry) = s.chats.iter_mut().find(|c| &c.id == chat_id) else {
                tracing::debug!(chat_id = %chat_id, "incoming message for unknown chat");
                return;
            };
            entry.last_message = Some(message.clone());

            if s.is_active(chat_id) && !s.active_messages.iter().any(|m| m.id == message.id) {
                s.active_messages.push(message);
            }
        });
    }

    /// Apply a presence change to every chat containing the user.
    pub fn apply_status_change(&self, user_id: &Id, is_online: bool) {
        self.modify(|s| {
            if is_online {
                presence::apply_user_online(&mut s.chats, s.active_chat.as_mut(), user_id);
            } else {
                presence::apply_user_offline(&mut s.chats, s.active_chat.as_mut(), user_id);
            }
        });
    }

    /// Apply a typing change, scoped to the chat the event names.
    pub fn apply_typing_change(&self, chat_id: &Id, user_id: &Id, is_typing: bool) {
        self.modify(|s| {
            presence::apply_typing(
                &mut s.chats,
                s.active_chat.as_mut(),
                chat_id,
                user_id,
                is_typing,
            );
        });
    }

    /// Apply a chat pushed by the server (someone opened a chat with us).
    /// Same id-based merge as user-initiated creation, so a re-push never
    /// duplicates and a new chat joins its room.
    pub fn apply_new_chat(&self, chat: Chat) {
        self.merge_chat(chat);
    }

    // --- Socket wiring ---

    /// Register this store's handlers on the socket client. Idempotent.
    pub fn bind_events(&self) {
        let mut bindings = self.bindings.lock().expect("bindings lock poisoned");
        if !bindings.is_empty() {
            return;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };

        let store = this.clone();
        let id = self.socket.on(EventKind::ReceiveMessage, move |event| {
            if let ServerEvent::ReceiveMessage { chat_id, message } = event {
                store.apply_incoming_message(chat_id, message.clone());
            }
        });
        bindings.push((EventKind::ReceiveMessage, id));

        let store = this.clone();
        let id = self.socket.on(EventKind::UserStatusChanged, move |event| {
            if let ServerEvent::UserStatusChanged { user_id, is_online } = event {
                store.apply_status_change(user_id, *is_online);
            }
        });
        bindings.push((EventKind::UserStatusChanged, id));

        let store = this.clone();
        let id = self.socket.on(EventKind::UserTypingStatusChanged, move |event| {
            if let ServerEvent::UserTypingStatusChanged {
                chat_id,
                user_id,
                is_typing,
            } = event
            {
                store.apply_typing_change(chat_id, user_id, *is_typing);
            }
        });
        bindings.push((EventKind::UserTypingStatusChanged, id));

        let store = this;
        let id = self.socket.on(EventKind::NewChatCreated, move |event| {
            if let ServerEvent::NewChatCreated { chat } = event {
                store.apply_new_chat(chat.clone());
            }
        });
        bindings.push((EventKind::NewChatCreated, id));
    }

    /// Remove this store's socket handlers (called on logout so handlers
    /// never survive a session boundary).
    pub fn unbind_events(&self) {
        let mut bindings = self.bindings.lock().expect("bindings lock poisoned");
        for (kind, id) in bindings.drain(..) {
            self.socket.off_handler(kind, id);
        }
    }
}

/// Sender identity used when a message is sent before the session user is
/// known; the server response carries the real identity.
fn local_placeholder() -> User {
    User {
        id: Id::from("0"),
        email: String::new(),
        first_name: "You".to_string(),
        last_name: String::new(),
        avatar: None,
        is_online: true,
        is_typing: false,
    }
}

//! GraphQL API client.
//!
//! All request/response traffic goes through one endpoint as
//! `{"query": ..., "variables": ...}` posts. Session credentials ride along
//! as cookies, so the HTTP client keeps a cookie jar.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use pingline_shared::{CallError, Chat, Id, Message, User};

/// Remote operations used by the chat collection store.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn get_user_chats(&self) -> Result<Vec<Chat>, CallError>;
    async fn open_or_create_chat(&self, other_user_id: &Id) -> Result<Chat, CallError>;
    async fn create_group_chat(
        &self,
        name: &str,
        participant_ids: &[Id],
    ) -> Result<Chat, CallError>;
    async fn get_chat_messages(&self, chat_id: &Id) -> Result<Vec<Message>, CallError>;
    async fn send_message(&self, chat_id: &Id, content: &str) -> Result<Message, CallError>;
    async fn add_participant(&self, chat_id: &Id, user_id: &Id) -> Result<Chat, CallError>;
    async fn remove_participant(&self, chat_id: &Id, user_id: &Id) -> Result<Chat, CallError>;
}

/// Remote operations used by the session store.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn get_google_auth_url(&self) -> Result<String, CallError>;
    async fn get_current_user(&self) -> Result<Option<User>, CallError>;
    async fn logout(&self) -> Result<bool, CallError>;
    async fn validate_token(&self) -> Result<bool, CallError>;
    async fn get_all_users(&self) -> Result<Vec<User>, CallError>;

    /// Re-arm the one-shot auth-failure notice after a successful login.
    /// No-op for backends without one.
    fn reset_auth_notice(&self) {}
}

/// Hook invoked when a call fails because the session is no longer valid.
pub type AuthFailureHook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

/// GraphQL client for the pingline backend.
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    on_auth_failure: Mutex<Option<AuthFailureHook>>,
    auth_failure_reported: AtomicBool,
}

impl GraphQlClient {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            on_auth_failure: Mutex::new(None),
            auth_failure_reported: AtomicBool::new(false),
        })
    }

    /// Install the cross-cutting auth-failure hook. The hook fires at most
    /// once per session; [`reset_auth_notice`](Self::reset_auth_notice)
    /// re-arms it after a successful login.
    pub fn set_auth_failure_hook(&self, hook: AuthFailureHook) {
        *self.on_auth_failure.lock().expect("auth hook lock poisoned") = Some(hook);
    }

    pub fn reset_auth_notice(&self) {
        self.auth_failure_reported.store(false, Ordering::SeqCst);
    }

    fn report_if_auth_failure(&self, error: &CallError) {
        if !error.is_auth_failure() {
            return;
        }
        if self.auth_failure_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(%error, "session rejected by backend");
        if let Some(hook) = self
            .on_auth_failure
            .lock()
            .expect("auth hook lock poisoned")
            .as_ref()
        {
            hook();
        }
    }

    /// Issue one GraphQL call and deserialize the full `data` payload.
    ///
    /// Either the complete typed payload comes back or a [`CallError`];
    /// a partial response is never returned.
    async fn call<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: Value,
    ) -> Result<T, CallError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error = CallError::Transport(format!("HTTP {}", status.as_u16()));
            self.report_if_auth_failure(&error);
            return Err(error);
        }

        let body = response
            .text()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        let parsed: GraphQlResponse<T> = serde_json::from_str(&body)
            .map_err(|e| CallError::Transport(format!("malformed response: {e}")))?;

        if let Some(errors) = parsed.errors {
            if let Some(first) = errors.into_iter().next() {
                let error = CallError::Application(first.message);
                self.report_if_auth_failure(&error);
                return Err(error);
            }
        }

        parsed
            .data
            .ok_or_else(|| CallError::Transport("response missing data".to_string()))
    }
}

// --- GraphQL documents ---

const GET_GOOGLE_AUTH_URL: &str = "
    query GetGoogleAuthUrl {
        getGoogleAuthUrl
    }
";

const GET_CURRENT_USER: &str = "
    query GetCurrentUser {
        getCurrentUser {
            id
            email
            firstName
            lastName
            avatar
            isOnline
        }
    }
";

const LOGOUT: &str = "
    mutation Logout {
        logout
    }
";

const VALIDATE_TOKEN: &str = "
    query ValidateToken {
        validateToken
    }
";

const GET_ALL_USERS: &str = "
    query GetAllUsers {
        getAllUsers {
            id
            email
            firstName
            lastName
            avatar
            isOnline
        }
    }
";

const CHAT_FIELDS: &str = "
    id
    isGroup
    name
    participants {
        id
        email
        firstName
        lastName
        avatar
        isOnline
    }
    lastMessage {
        id
        content
        createdAt
        sender {
            id
            firstName
            lastName
            avatar
        }
    }
";

const MESSAGE_FIELDS: &str = "
    id
    content
    createdAt
    sender {
        id
        firstName
        lastName
        avatar
    }
";

fn get_user_chats_doc() -> String {
    format!("query GetUserChats {{ getUserChats {{ {CHAT_FIELDS} }} }}")
}

fn open_or_create_chat_doc() -> String {
    format!(
        "mutation OpenOrCreateChat($otherUserId: ID!) {{ \
         openOrCreateChat(otherUserId: $otherUserId) {{ {CHAT_FIELDS} }} }}"
    )
}

fn create_group_chat_doc() -> String {
    format!(
        "mutation CreateGroupChat($name: String!, $participantIds: [ID!]!) {{ \
         createGroupChat(name: $name, participantIds: $participantIds) {{ {CHAT_FIELDS} }} }}"
    )
}

fn get_chat_messages_doc() -> String {
    format!(
        "query GetChatMessages($chatId: ID!) {{ \
         getChatMessages(chatId: $chatId) {{ {MESSAGE_FIELDS} }} }}"
    )
}

fn send_message_doc() -> String {
    format!(
        "mutation SendMessage($chatId: ID!, $content: String!) {{ \
         sendMessage(chatId: $chatId, content: $content) {{ {MESSAGE_FIELDS} }} }}"
    )
}

fn add_participant_doc() -> String {
    format!(
        "mutation AddParticipant($chatId: ID!, $userId: ID!) {{ \
         addParticipant(chatId: $chatId, userId: $userId) {{ {CHAT_FIELDS} }} }}"
    )
}

fn remove_participant_doc() -> String {
    format!(
        "mutation RemoveParticipant($chatId: ID!, $userId: ID!) {{ \
         removeParticipant(chatId: $chatId, userId: $userId) {{ {CHAT_FIELDS} }} }}"
    )
}

// --- Typed response envelopes ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetGoogleAuthUrlData {
    get_google_auth_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetCurrentUserData {
    get_current_user: Option<User>,
}

#[derive(Deserialize)]
struct LogoutData {
    logout: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateTokenData {
    validate_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetAllUsersData {
    get_all_users: Vec<User>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUserChatsData {
    get_user_chats: Vec<Chat>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrCreateChatData {
    open_or_create_chat: Chat,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupChatData {
    create_group_chat: Chat,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetChatMessagesData {
    get_chat_messages: Vec<Message>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageData {
    send_message: Message,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddParticipantData {
    add_participant: Chat,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveParticipantData {
    remove_participant: Chat,
}

#[async_trait]
impl AuthBackend for GraphQlClient {
    async fn get_google_auth_url(&self) -> Result<String, CallError> {
        let data: GetGoogleAuthUrlData = self.call(GET_GOOGLE_AUTH_URL, Value::Null).await?;
        Ok(data.get_google_auth_url)
    }

    async fn get_current_user(&self) -> Result<Option<User>, CallError> {
        let data: GetCurrentUserData = self.call(GET_CURRENT_USER, Value::Null).await?;
        Ok(data.get_current_user)
    }

    async fn logout(&self) -> Result<bool, CallError> {
        let data: LogoutData = self.call(LOGOUT, Value::Null).await?;
        Ok(data.logout)
    }

    async fn validate_token(&self) -> Result<bool, CallError> {
        let data: ValidateTokenData = self.call(VALIDATE_TOKEN, Value::Null).await?;
        Ok(data.validate_token)
    }

    async fn get_all_users(&self) -> Result<Vec<User>, CallError> {
        let data: GetAllUsersData = self.call(GET_ALL_USERS, Value::Null).await?;
        Ok(data.get_all_users)
    }

    fn reset_auth_notice(&self) {
        GraphQlClient::reset_auth_notice(self);
    }
}

#[async_trait]
impl ChatBackend for GraphQlClient {
    async fn get_user_chats(&self) -> Result<Vec<Chat>, CallError> {
        let data: GetUserChatsData = self.call(&get_user_chats_doc(), Value::Null).await?;
        Ok(data.get_user_chats)
    }

    async fn open_or_create_chat(&self, other_user_id: &Id) -> Result<Chat, CallError> {
        let data: OpenOrCreateChatData = self
            .call(
                &open_or_create_chat_doc(),
                json!({ "otherUserId": other_user_id }),
            )
            .await?;
        Ok(data.open_or_create_chat)
    }

    async fn create_group_chat(
        &self,
        name: &str,
        participant_ids: &[Id],
    ) -> Result<Chat, CallError> {
        let data: CreateGroupChatData = self
            .call(
                &create_group_chat_doc(),
                json!({ "name": name, "participantIds": participant_ids }),
            )
            .await?;
        Ok(data.create_group_chat)
    }

    async fn get_chat_messages(&self, chat_id: &Id) -> Result<Vec<Message>, CallError> {
        let data: GetChatMessagesData = self
            .call(&get_chat_messages_doc(), json!({ "chatId": chat_id }))
            .await?;
        Ok(data.get_chat_messages)
    }

    async fn send_message(&self, chat_id: &Id, content: &str) -> Result<Message, CallError> {
        let data: SendMessageData = self
            .call(
                &send_message_doc(),
                json!({ "chatId": chat_id, "content": content }),
            )
            .await?;
        Ok(data.send_message)
    }

    async fn add_participant(&self, chat_id: &Id, user_id: &Id) -> Result<Chat, CallError> {
        let data: AddParticipantData = self
            .call(
                &add_participant_doc(),
                json!({ "chatId": chat_id, "userId": user_id }),
            )
            .await?;
        Ok(data.add_participant)
    }

    async fn remove_participant(&self, chat_id: &Id, user_id: &Id) -> Result<Chat, CallError> {
        let data: RemoveParticipantData = self
            .call(
                &remove_participant_doc(),
                json!({ "chatId": chat_id, "userId": user_id }),
            )
            .await?;
        Ok(data.remove_participant)
    }
}

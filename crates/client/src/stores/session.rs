//! Session store: authentication state and socket lifecycle.
//!
//! The session store is the only component allowed to drive the socket's
//! connect/disconnect; every other store treats the connection as given.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use pingline_shared::{CallError, Id, SessionSnapshot, User};

use crate::api::AuthBackend;
use crate::storage::SnapshotStore;
use crate::ws::SocketClient;

/// Narrow read-only view of the session, for stores that only need to know
/// who the current user is.
pub trait SessionReader: Send + Sync {
    fn current_user(&self) -> Option<User>;

    fn current_user_id(&self) -> Option<Id> {
        self.current_user().map(|u| u.id)
    }
}

/// Observable snapshot of session state.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_checking: bool,
}

type LogoutHook = Box<dyn Fn() + Send + Sync>;

/// How long to wait for the socket before announcing presence. Announcing
/// proceeds best-effort after the deadline either way.
const CONNECT_WAIT: Duration = Duration::from_secs(5);

pub struct SessionStore {
    state: watch::Sender<SessionState>,
    api: Arc<dyn AuthBackend>,
    socket: Arc<SocketClient>,
    snapshots: SnapshotStore,
    on_logout: Mutex<Vec<LogoutHook>>,
}

impl SessionStore {
    /// Build the store, seeding state from the persisted snapshot so the UI
    /// can render a logged-in shell immediately. The snapshot is only a
    /// hint; [`check_auth_status`](Self::check_auth_status) re-verifies it.
    pub fn new(
        api: Arc<dyn AuthBackend>,
        socket: Arc<SocketClient>,
        snapshots: SnapshotStore,
    ) -> Self {
        let mut initial = SessionState::default();
        if let Some(snapshot) = snapshots.load() {
            initial.user = snapshot.user;
            initial.is_authenticated = snapshot.is_authenticated;
        }
        let (state, _) = watch::channel(initial);
        Self {
            state,
            api,
            socket,
            snapshots,
            on_logout: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Register a hook to run when the session ends, whether through an
    /// explicit logout or a server-side rejection. Used to reset dependent
    /// stores.
    pub fn on_logout(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.on_logout
            .lock()
            .expect("logout hooks lock poisoned")
            .push(Box::new(hook));
    }

    /// Verify the session against the server and bring the realtime
    /// connection up on success.
    ///
    /// Never returns an error: an unverifiable session resolves to an
    /// unauthenticated (or, for transport failures, unverified) state
    /// rather than failing app startup.
    pub async fn check_auth_status(&self) {
        self.state.send_modify(|s| s.is_checking = true);

        match self.api.get_current_user().await {
            Ok(Some(user)) => {
                tracing::info!(user_id = %user.id, "session verified");
                self.state.send_modify(|s| {
                    s.user = Some(user.clone());
                    s.is_authenticated = true;
                    s.is_checking = false;
                });
                self.persist();
                self.api.reset_auth_notice();

                self.socket.connect(Some(user.id.clone()));
                self.socket.wait_until_connected(CONNECT_WAIT).await;
                self.socket.announce_online(user.id);
            }
            Ok(None) => {
                tracing::info!("no active session");
                self.clear_session();
            }
            Err(e) if matches!(e, CallError::Transport(_)) => {
                // Server unreachable: keep the cached identity for display
                // but do not treat the session as verified.
                tracing::warn!(error = %e, "could not verify session");
                self.state.send_modify(|s| {
                    s.is_authenticated = false;
                    s.is_checking = false;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "session rejected");
                self.clear_session();
            }
        }
    }

    /// URL the embedder should open to start the Google OAuth flow.
    pub async fn login_url(&self) -> Result<String, CallError> {
        self.api.get_google_auth_url().await
    }

    /// Check whether the session token is still accepted by the server.
    pub async fn validate_token(&self) -> Result<bool, CallError> {
        self.api.validate_token().await
    }

    /// All registered users, for starting new chats.
    pub async fn list_users(&self) -> Result<Vec<User>, CallError> {
        self.api.get_all_users().await
    }

    /// End the session. Local state is cleared unconditionally; a failing
    /// remote logout is logged and otherwise ignored, since the user's
    /// intent to leave must always win.
    pub async fn logout(&self) {
        match self.api.logout().await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("server declined logout"),
            Err(e) => tracing::warn!(error = %e, "remote logout failed"),
        }
        self.end_session();
    }

    /// Tear down the session locally without calling the server. Wired as
    /// the auth-failure hook so a rejected session converges to logged-out.
    pub fn end_session(&self) {
        self.socket.disconnect();
        self.clear_session();
        for hook in self
            .on_logout
            .lock()
            .expect("logout hooks lock poisoned")
            .iter()
        {
            hook();
        }
    }

    fn clear_session(&self) {
        self.state.send_modify(|s| {
            s.user = None;
            s.is_authenticated = false;
            s.is_checking = false;
        });
        self.snapshots.remove();
    }

    fn persist(&self) {
        let state = self.state.borrow().clone();
        let snapshot = SessionSnapshot {
            user: state.user,
            is_authenticated: state.is_authenticated,
        };
        if let Err(e) = self.snapshots.save(&snapshot) {
            tracing::warn!(error = %e, "failed to persist session snapshot");
        }
    }
}

impl SessionReader for SessionStore {
    fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::ReconnectConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

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

    #[derive(Default)]
    struct MockAuth {
        current_user: Mutex<Option<Result<Option<User>, CallError>>>,
        logout_result: Mutex<Option<Result<bool, CallError>>>,
        notice_resets: AtomicU32,
    }

    #[async_trait]
    impl AuthBackend for MockAuth {
        async fn get_google_auth_url(&self) -> Result<String, CallError> {
            Ok("https://accounts.example.com/auth".to_string())
        }

        async fn get_current_user(&self) -> Result<Option<User>, CallError> {
            self.current_user
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(None))
        }

        async fn logout(&self) -> Result<bool, CallError> {
            self.logout_result.lock().unwrap().take().unwrap_or(Ok(true))
        }

        async fn validate_token(&self) -> Result<bool, CallError> {
            Ok(true)
        }

        async fn get_all_users(&self) -> Result<Vec<User>, CallError> {
            Ok(vec![user(1), user(2)])
        }

        fn reset_auth_notice(&self) {
            self.notice_resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn temp_snapshots() -> SnapshotStore {
        let dir = std::env::temp_dir().join(format!("pingline-test-{}", uuid::Uuid::new_v4()));
        SnapshotStore::with_dir(dir)
    }

    fn store_with(api: Arc<MockAuth>, snapshots: SnapshotStore) -> SessionStore {
        // Reconnect disabled so tests never sit out a backoff delay.
        let reconnect = ReconnectConfig {
            max_attempts: 1,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
        };
        let socket = Arc::new(SocketClient::new("ws://localhost:9/ws", reconnect));
        SessionStore::new(api, socket, snapshots)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_check_authenticates_and_persists() {
        let api = Arc::new(MockAuth::default());
        *api.current_user.lock().unwrap() = Some(Ok(Some(user(1))));
        let snapshots = temp_snapshots();
        let store = store_with(api.clone(), snapshots.clone());

        store.check_auth_status().await;

        let state = store.snapshot();
        assert!(state.is_authenticated);
        assert_eq!(state.user.as_ref().unwrap().id, Id::from(1u64));
        assert!(snapshots.exists());
        assert_eq!(api.notice_resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_session_clears_snapshot() {
        let api = Arc::new(MockAuth::default());
        let snapshots = temp_snapshots();
        snapshots
            .save(&SessionSnapshot {
                user: Some(user(1)),
                is_authenticated: true,
            })
            .unwrap();
        let store = store_with(api, snapshots.clone());

        // Seeded from the snapshot before verification.
        assert!(store.snapshot().is_authenticated);

        store.check_auth_status().await;

        let state = store.snapshot();
        assert!(!state.is_authenticated);
        assert!(state.user.is_none());
        assert!(!snapshots.exists());
    }

    #[tokio::test]
    async fn transport_failure_keeps_cached_identity() {
        let api = Arc::new(MockAuth::default());
        *api.current_user.lock().unwrap() =
            Some(Err(CallError::Transport("connection refused".to_string())));
        let snapshots = temp_snapshots();
        snapshots
            .save(&SessionSnapshot {
                user: Some(user(1)),
                is_authenticated: true,
            })
            .unwrap();
        let store = store_with(api, snapshots.clone());

        store.check_auth_status().await;

        let state = store.snapshot();
        assert!(!state.is_authenticated);
        // Cached user survives for display; the snapshot is not destroyed
        // just because the server was unreachable.
        assert!(state.user.is_some());
        assert!(snapshots.exists());
    }

    #[tokio::test]
    async fn rejected_session_clears_everything() {
        let api = Arc::new(MockAuth::default());
        *api.current_user.lock().unwrap() =
            Some(Err(CallError::Application("Not authenticated".to_string())));
        let snapshots = temp_snapshots();
        snapshots
            .save(&SessionSnapshot {
                user: Some(user(1)),
                is_authenticated: true,
            })
            .unwrap();
        let store = store_with(api, snapshots.clone());

        store.check_auth_status().await;

        let state = store.snapshot();
        assert!(!state.is_authenticated);
        assert!(state.user.is_none());
        assert!(!snapshots.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_clears_state_even_when_remote_fails() {
        let api = Arc::new(MockAuth::default());
        *api.current_user.lock().unwrap() = Some(Ok(Some(user(1))));
        *api.logout_result.lock().unwrap() =
            Some(Err(CallError::Transport("connection refused".to_string())));
        let snapshots = temp_snapshots();
        let store = store_with(api, snapshots.clone());

        let hooks_run = Arc::new(AtomicU32::new(0));
        let hooks_for_store = hooks_run.clone();
        store.on_logout(move || {
            hooks_for_store.fetch_add(1, Ordering::SeqCst);
        });

        store.check_auth_status().await;
        assert!(snapshots.exists());

        store.logout().await;

        let state = store.snapshot();
        assert!(!state.is_authenticated);
        assert!(state.user.is_none());
        assert!(!snapshots.exists());
        assert_eq!(hooks_run.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_reader_exposes_current_user() {
        let api = Arc::new(MockAuth::default());
        *api.current_user.lock().unwrap() = Some(Ok(Some(user(7))));
        let store = store_with(api, temp_snapshots());

        store.check_auth_status().await;

        let reader: &dyn SessionReader = &store;
        assert_eq!(reader.current_user_id(), Some(Id::from(7u64)));
    }
}

//! Chat client runtime.
//!
//! State-synchronization layer for a realtime chat backend: a GraphQL
//! client for request/response calls, a WebSocket client for realtime
//! events, and a set of stores that reconcile both into observable state.
//! [`ChatApp`] wires the pieces together; UI layers subscribe to the
//! stores' `watch` channels and call their methods.

pub mod api;
pub mod config;
pub mod storage;
pub mod stores;
pub mod ws;

use std::sync::Arc;

use anyhow::Result;

use crate::api::{AuthBackend, ChatBackend, GraphQlClient};
use crate::config::ClientConfig;
use crate::storage::SnapshotStore;
use crate::stores::{ChatStore, SessionStore};
use crate::ws::SocketClient;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` level. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The assembled client: one API client, one socket, and the stores wired
/// to both. Construct once and share.
pub struct ChatApp {
    pub api: Arc<GraphQlClient>,
    pub socket: Arc<SocketClient>,
    pub session: Arc<SessionStore>,
    pub chats: Arc<ChatStore>,
}

impl ChatApp {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(GraphQlClient::new(&config.graphql_endpoint)?);
        let socket = Arc::new(SocketClient::new(&config.socket_url, config.reconnect));
        let snapshots = SnapshotStore::new()?;
        Ok(Self::assemble(api, socket, snapshots))
    }

    fn assemble(
        api: Arc<GraphQlClient>,
        socket: Arc<SocketClient>,
        snapshots: SnapshotStore,
    ) -> Self {
        let session = Arc::new(SessionStore::new(
            api.clone() as Arc<dyn AuthBackend>,
            socket.clone(),
            snapshots,
        ));
        let chats = ChatStore::new(
            api.clone() as Arc<dyn ChatBackend>,
            socket.clone(),
            session.clone(),
        );
        chats.bind_events();

        // A rejected session converges to logged-out without user action.
        let session_for_hook = session.clone();
        api.set_auth_failure_hook(Box::new(move || session_for_hook.end_session()));

        // Logout (explicit or forced) drops all chat state and removes the
        // socket handlers so nothing leaks into the next session.
        let chats_for_hook = chats.clone();
        session.on_logout(move || {
            chats_for_hook.unbind_events();
            chats_for_hook.reset();
        });

        Self {
            api,
            socket,
            session,
            chats,
        }
    }

    /// Verify the session and, when it holds, load the chat list. The app
    /// comes up logged-out rather than failing when the server is away.
    /// Call again after a re-login; event binding is idempotent.
    pub async fn start(&self) {
        self.chats.bind_events();
        self.session.check_auth_status().await;
        if self.session.snapshot().is_authenticated {
            self.chats.load_user_chats().await;
        }
    }

    /// Best-effort teardown. Embedders should call this from their shutdown
    /// path so the user's offline notice gets a chance to go out.
    pub fn shutdown(&self) {
        self.socket.shutdown();
    }
}

//! Socket client: the process-wide transport owned by the session store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_channel::mpsc::{unbounded, UnboundedSender};
use tokio::sync::watch;

use pingline_shared::{ClientEvent, EventKind, Id, Message, ServerEvent};

use super::connection::{start_connection_loop, ConnectionState, ReconnectConfig};

/// Token returned by [`SocketClient::on`] for targeted handler removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type Handler = Box<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    handlers: Mutex<HashMap<EventKind, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    fn add(&self, kind: EventKind, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    fn clear(&self, kind: EventKind) {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .remove(&kind);
    }

    fn remove(&self, kind: EventKind, id: HandlerId) {
        if let Some(list) = self
            .handlers
            .lock()
            .expect("handler registry lock poisoned")
            .get_mut(&kind)
        {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    fn dispatch(&self, event: &ServerEvent) {
        let registry = self.handlers.lock().expect("handler registry lock poisoned");
        if let Some(list) = registry.get(&event.kind()) {
            for (_, handler) in list {
                handler(event);
            }
        }
    }
}

struct ActiveConnection {
    sender: UnboundedSender<ClientEvent>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Client for the persistent realtime connection.
///
/// Owns exactly one underlying WebSocket. The session store drives
/// [`connect`](Self::connect)/[`disconnect`](Self::disconnect); stores
/// register inbound handlers with [`on`](Self::on) and must remove them on
/// logout so handlers never leak across session boundaries.
pub struct SocketClient {
    url: String,
    reconnect: ReconnectConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    registry: Arc<HandlerRegistry>,
    connection: Mutex<Option<ActiveConnection>>,
    /// User announced over this connection; used for the offline notice
    /// and re-announced after an automatic reconnect.
    identity: Arc<Mutex<Option<Id>>>,
    /// Rooms joined over this connection; rejoined after an automatic
    /// reconnect so subscriptions survive a connection loss.
    rooms: Arc<Mutex<HashSet<Id>>>,
}

impl SocketClient {
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.into(),
            reconnect,
            state: Arc::new(state),
            state_rx,
            registry: Arc::new(HandlerRegistry::default()),
            connection: Mutex::new(None),
            identity: Arc::new(Mutex::new(None)),
            rooms: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Establish the underlying connection if not already established.
    ///
    /// Idempotent: calling while connected or connecting is a no-op. The
    /// optional `user_id` is remembered so teardown can announce the user
    /// going offline.
    pub fn connect(&self, user_id: Option<Id>) {
        if let Some(user_id) = user_id {
            *self.identity.lock().expect("identity lock poisoned") = Some(user_id);
        }

        let mut connection = self.connection.lock().expect("connection lock poisoned");
        let state = self.state_rx.borrow().clone();
        if connection.is_some() && (state.is_connected() || state.is_connecting()) {
            tracing::debug!("socket already connected, ignoring connect call");
            return;
        }

        let (sender, receiver) = unbounded();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let registry = self.registry.clone();
        let dispatch: Arc<dyn Fn(ServerEvent) + Send + Sync> =
            Arc::new(move |event| registry.dispatch(&event));

        let identity = self.identity.clone();
        let rooms = self.rooms.clone();
        let replay: Arc<dyn Fn() -> Vec<ClientEvent> + Send + Sync> = Arc::new(move || {
            let mut events = Vec::new();
            if let Some(user_id) = identity.lock().expect("identity lock poisoned").clone() {
                events.push(ClientEvent::UserOnline { user_id });
            }
            for chat_id in rooms.lock().expect("rooms lock poisoned").iter() {
                events.push(ClientEvent::JoinRoom {
                    chat_id: chat_id.clone(),
                });
            }
            events
        });

        // The loop owns its own lifetime; the shutdown channel ends it.
        let _ = start_connection_loop(
            self.url.clone(),
            self.state.clone(),
            receiver,
            dispatch,
            replay,
            self.reconnect.clone(),
            shutdown_rx,
        );

        *connection = Some(ActiveConnection {
            sender,
            shutdown: Some(shutdown_tx),
        });
    }

    /// Close the connection, announcing the remembered user offline first.
    ///
    /// The offline notice is best-effort: it is queued without awaiting any
    /// acknowledgement. The per-connection identity and tracked rooms are
    /// forgotten afterwards. Teardown itself is driven by the shutdown
    /// signal, which lets the connection loop stop its read/write tasks
    /// and close the stream.
    pub fn disconnect(&self) {
        let identity = self
            .identity
            .lock()
            .expect("identity lock poisoned")
            .take();
        self.rooms.lock().expect("rooms lock poisoned").clear();

        let mut connection = self.connection.lock().expect("connection lock poisoned");
        if let Some(mut active) = connection.take() {
            if let Some(user_id) = identity {
                if self.state_rx.borrow().is_connected() {
                    let _ = active
                        .sender
                        .unbounded_send(ClientEvent::UserOffline { user_id });
                }
            }
            if let Some(shutdown) = active.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
        let _ = self.state.send(ConnectionState::Disconnected);
    }

    /// Best-effort teardown notice for process exit.
    ///
    /// Embedding applications should call this from their shutdown path; no
    /// delivery guarantee is made.
    pub fn shutdown(&self) {
        self.disconnect();
    }

    /// Fire-and-forget emit. Dropped with a warning when not connected;
    /// callers needing confirmation must go through the GraphQL client.
    pub fn emit(&self, event: ClientEvent) {
        if !self.is_connected() {
            tracing::warn!(?event, "socket not connected, dropping event");
            return;
        }
        let connection = self.connection.lock().expect("connection lock poisoned");
        if let Some(active) = connection.as_ref() {
            if let Err(e) = active.sender.unbounded_send(event) {
                tracing::warn!(error = %e, "failed to queue socket event");
            }
        }
    }

    pub fn join_room(&self, chat_id: Id) {
        self.rooms
            .lock()
            .expect("rooms lock poisoned")
            .insert(chat_id.clone());
        self.emit(ClientEvent::JoinRoom { chat_id });
    }

    pub fn leave_room(&self, chat_id: Id) {
        self.rooms
            .lock()
            .expect("rooms lock poisoned")
            .remove(&chat_id);
        self.emit(ClientEvent::LeaveRoom { chat_id });
    }

    /// Broadcast a confirmed message to the chat's room.
    pub fn send_chat_message(&self, chat_id: Id, message: Message) {
        self.emit(ClientEvent::SendMessage { chat_id, message });
    }

    pub fn announce_online(&self, user_id: Id) {
        self.emit(ClientEvent::UserOnline { user_id });
    }

    pub fn notify_typing(&self, chat_id: Id, user_id: Id, is_typing: bool) {
        if is_typing {
            self.emit(ClientEvent::UserStartTyping { chat_id, user_id });
        } else {
            self.emit(ClientEvent::UserStopTyping { chat_id, user_id });
        }
    }

    /// Register a handler for an inbound event kind.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.registry.add(kind, Box::new(handler))
    }

    /// Remove every handler registered for `kind`.
    pub fn off(&self, kind: EventKind) {
        self.registry.clear(kind);
    }

    /// Remove a single handler.
    pub fn off_handler(&self, kind: EventKind, id: HandlerId) {
        self.registry.remove(kind, id);
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Wait until the connection reports open, up to `timeout`.
    pub async fn wait_until_connected(&self, timeout: std::time::Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let wait = async {
            loop {
                if rx.borrow().is_connected() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Feed an inbound event through the handler registry.
    ///
    /// Exists so stores can be exercised without a live socket.
    #[cfg(test)]
    pub(crate) fn inject(&self, event: ServerEvent) {
        self.registry.dispatch(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn status_event(user: u64, online: bool) -> ServerEvent {
        ServerEvent::UserStatusChanged {
            user_id: Id::from(user),
            is_online: online,
        }
    }

    #[tokio::test]
    async fn emit_while_disconnected_is_dropped_silently() {
        let client = SocketClient::new("ws://localhost:9/ws", ReconnectConfig::default());
        // Must not panic or error.
        client.join_room(Id::from("1"));
        client.announce_online(Id::from("2"));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn handlers_receive_matching_events_only() {
        let client = SocketClient::new("ws://localhost:9/ws", ReconnectConfig::default());
        let seen = Arc::new(AtomicU32::new(0));
        let seen_for_handler = seen.clone();
        client.on(EventKind::UserStatusChanged, move |_| {
            seen_for_handler.fetch_add(1, Ordering::SeqCst);
        });

        client.inject(status_event(1, true));
        client.inject(ServerEvent::UserTypingStatusChanged {
            chat_id: Id::from("1"),
            user_id: Id::from("2"),
            is_typing: true,
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_clears_all_handlers_for_event() {
        let client = SocketClient::new("ws://localhost:9/ws", ReconnectConfig::default());
        let seen = Arc::new(AtomicU32::new(0));
        for _ in 0..2 {
            let seen_for_handler = seen.clone();
            client.on(EventKind::UserStatusChanged, move |_| {
                seen_for_handler.fetch_add(1, Ordering::SeqCst);
            });
        }

        client.inject(status_event(1, true));
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        client.off(EventKind::UserStatusChanged);
        client.inject(status_event(1, false));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn off_handler_removes_only_one_subscription() {
        let client = SocketClient::new("ws://localhost:9/ws", ReconnectConfig::default());
        let seen = Arc::new(AtomicU32::new(0));

        let seen_for_kept = seen.clone();
        client.on(EventKind::UserStatusChanged, move |_| {
            seen_for_kept.fetch_add(1, Ordering::SeqCst);
        });
        let seen_for_removed = seen.clone();
        let removed = client.on(EventKind::UserStatusChanged, move |_| {
            seen_for_removed.fetch_add(10, Ordering::SeqCst);
        });

        client.off_handler(EventKind::UserStatusChanged, removed);
        client.inject(status_event(1, true));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn wait_for_count(seen: &AtomicU32, expected: u32) {
        for _ in 0..200 {
            if seen.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn disconnect_closes_socket_and_stops_dispatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Server pushes frames on command and reports when the client's
        // connection actually goes away.
        let (push_tx, mut push_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                tokio::select! {
                    frame = push_rx.recv() => match frame {
                        Some(frame) => {
                            let _ = ws.send(WsMessage::text(frame)).await;
                        }
                        None => break,
                    },
                    inbound = ws.next() => match inbound {
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                }
            }
            let _ = closed_tx.send(());
        });

        let client = SocketClient::new(format!("ws://{addr}"), ReconnectConfig::default());
        let seen = Arc::new(AtomicU32::new(0));
        let seen_for_handler = seen.clone();
        client.on(EventKind::UserStatusChanged, move |_| {
            seen_for_handler.fetch_add(1, Ordering::SeqCst);
        });

        client.connect(Some(Id::from("1")));
        assert!(client.wait_until_connected(Duration::from_secs(5)).await);

        push_tx
            .send(r#"{"event":"userStatusChanged","data":{"userId":2,"isOnline":true}}"#.into())
            .unwrap();
        wait_for_count(&seen, 1).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        client.disconnect();
        assert!(!client.is_connected());

        // The server must observe the close; a connection that was merely
        // forgotten client-side would leave this pending.
        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("server never saw the connection close")
            .unwrap();

        // Nothing reaches the registry after teardown.
        let _ = push_tx
            .send(r#"{"event":"userStatusChanged","data":{"userId":2,"isOnline":false}}"#.into());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnect_replays_identity_and_joined_rooms() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // First connection: wait for the room join, then drop the socket.
        // Second connection: forward every text frame for inspection.
        let (frames_tx, mut frames_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(text) = msg {
                    if text.contains("joinRoom") {
                        break;
                    }
                }
            }
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(text) = msg {
                    let _ = frames_tx.send(text.to_string());
                }
            }
        });

        let reconnect = ReconnectConfig {
            max_attempts: 5,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 1.0,
        };
        let client = SocketClient::new(format!("ws://{addr}"), reconnect);
        client.connect(Some(Id::from("7")));
        assert!(client.wait_until_connected(Duration::from_secs(5)).await);
        client.join_room(Id::from("42"));

        let (got_online, got_join) = tokio::time::timeout(Duration::from_secs(5), async {
            let (mut got_online, mut got_join) = (false, false);
            while let Some(frame) = frames_rx.recv().await {
                if frame.contains("userOnline") && frame.contains("\"7\"") {
                    got_online = true;
                }
                if frame.contains("joinRoom") && frame.contains("\"42\"") {
                    got_join = true;
                }
                if got_online && got_join {
                    break;
                }
            }
            (got_online, got_join)
        })
        .await
        .expect("no replay frames after reconnect");

        assert!(got_online, "identity was not re-announced");
        assert!(got_join, "room was not rejoined");
        client.disconnect();
    }
}

//! WebSocket connection loop with state reporting and auto-reconnect.

use std::sync::Arc;

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use pingline_shared::{ClientEvent, ServerEvent};

/// Connection state for the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }
}

/// Run the connection management loop until shutdown is signaled.
///
/// Outbound events arrive on `receiver` and are serialized onto the wire;
/// inbound text frames are parsed as [`ServerEvent`]s and handed to
/// `dispatch` in arrival order. Connection losses trigger reconnects with
/// exponential backoff; after a reconnect, `replay` supplies the events
/// that re-establish server-side subscriptions (room joins, presence) lost
/// with the old connection.
pub(crate) fn start_connection_loop(
    url: String,
    state: Arc<watch::Sender<ConnectionState>>,
    receiver: UnboundedReceiver<ClientEvent>,
    dispatch: Arc<dyn Fn(ServerEvent) + Send + Sync>,
    replay: Arc<dyn Fn() -> Vec<ClientEvent> + Send + Sync>,
    config: ReconnectConfig,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // The writer task re-acquires the receiver on every reconnect.
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let mut attempt = 0u32;
        let mut ever_connected = false;

        loop {
            if attempt == 0 {
                let _ = state.send(ConnectionState::Connecting);
            } else {
                let _ = state.send(ConnectionState::Reconnecting { attempt });
            }

            let connected = tokio::select! {
                result = connect_async(&url) => result,
                // The caller publishes the disconnected state itself; a
                // late send from here could clobber a successor loop.
                _ = &mut shutdown => return,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    let resumed = ever_connected;
                    ever_connected = true;
                    let _ = state.send(ConnectionState::Connected);
                    attempt = 0;
                    tracing::info!(url = %url, resumed, "socket connected");

                    let (mut write, mut read) = ws_stream.split();

                    if resumed {
                        for event in replay() {
                            match serde_json::to_string(&event) {
                                Ok(json) => {
                                    tracing::debug!(frame = %json, "socket replay");
                                    if let Err(e) = write.send(Message::text(json)).await {
                                        tracing::warn!(error = %e, "socket replay failed");
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, "failed to serialize event");
                                }
                            }
                        }
                    }

                    // Either task closing ends this connection attempt.
                    let (close_tx, mut close_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

                    let dispatch_for_read = dispatch.clone();
                    let close_tx_for_read = close_tx.clone();
                    let read_task = tokio::spawn(async move {
                        while let Some(frame) = read.next().await {
                            match frame {
                                Ok(Message::Text(text)) => {
                                    match serde_json::from_str::<ServerEvent>(&text) {
                                        Ok(event) => dispatch_for_read(event),
                                        Err(e) => {
                                            tracing::warn!(error = %e, "unparseable socket frame")
                                        }
                                    }
                                }
                                Ok(Message::Close(_)) => {
                                    tracing::info!("socket received close frame");
                                    break;
                                }
                                Ok(_) => {
                                    // Ping/pong handled by tungstenite; ignore binary.
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "socket read error");
                                    break;
                                }
                            }
                        }
                        let _ = close_tx_for_read.send(());
                    });

                    let receiver_for_write = receiver.clone();
                    let write_task = tokio::spawn(async move {
                        loop {
                            let event = {
                                let mut rx = receiver_for_write.lock().await;
                                rx.next().await
                            };

                            match event {
                                Some(event) => match serde_json::to_string(&event) {
                                    Ok(json) => {
                                        tracing::debug!(frame = %json, "socket send");
                                        if let Err(e) = write.send(Message::text(json)).await {
                                            tracing::warn!(error = %e, "socket send failed");
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::error!(error = %e, "failed to serialize event");
                                    }
                                },
                                None => {
                                    // Sender side dropped; connection is being torn down.
                                    break;
                                }
                            }
                        }
                        let _ = close_tx.send(());
                    });

                    tokio::select! {
                        _ = close_rx.recv() => {
                            tracing::info!("socket closed, scheduling reconnect");
                            read_task.abort();
                            write_task.abort();
                            let _ = state.send(ConnectionState::Disconnected);
                        }
                        _ = &mut shutdown => {
                            read_task.abort();
                            write_task.abort();
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "socket connect failed");

                    if config.max_attempts > 0 && attempt >= config.max_attempts {
                        let _ = state.send(ConnectionState::Failed {
                            reason: format!(
                                "max reconnect attempts ({}) exceeded",
                                config.max_attempts
                            ),
                        });
                        return;
                    }

                    let delay = config.delay_for_attempt(attempt);
                    tracing::info!(delay_ms = delay, attempt = attempt + 1, "reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_millis(delay as u64)) => {}
                        _ = &mut shutdown => return,
                    }
                    attempt += 1;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), 1000);
        assert_eq!(config.delay_for_attempt(1), 1500);
        assert!(config.delay_for_attempt(2) > config.delay_for_attempt(1));
        assert_eq!(config.delay_for_attempt(30), config.max_delay_ms);
    }

    #[test]
    fn state_helpers() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Reconnecting { attempt: 3 }.is_connecting());
        assert!(!ConnectionState::Failed {
            reason: "nope".into()
        }
        .is_connecting());
    }
}

//! Realtime socket transport.
//!
//! One persistent WebSocket connection to the backend, with auto-reconnect
//! and typed event dispatch. Stores register handlers for inbound
//! [`ServerEvent`](pingline_shared::ServerEvent)s and emit fire-and-forget
//! [`ClientEvent`](pingline_shared::ClientEvent)s; connection state changes
//! are observable through a `watch` channel.

mod client;
mod connection;

pub use client::{HandlerId, SocketClient};
pub use connection::{ConnectionState, ReconnectConfig};

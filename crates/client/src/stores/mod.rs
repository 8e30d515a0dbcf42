//! Client-side state stores.
//!
//! Each store owns one slice of state behind a `watch` channel and
//! reconciles API responses, socket events, and local edits into it.

pub mod chats;
pub mod presence;
pub mod session;

pub use chats::{ChatState, ChatStore};
pub use session::{SessionReader, SessionState, SessionStore};

//! Application layer for veilchat
//!
//! [`Messenger`] ties the key vault, the conversation router and the external
//! collaborators together behind one async API, and reports changes to the
//! view layer as [`ViewEvent`]s.
//!
//! # Concurrency
//!
//! - Vault operations are serialized by an async mutex
//! - Conversation state sits behind a synchronous mutex that is never held
//!   across an await, so page fetches and bus deliveries interleave freely and
//!   rely on the log's de-duplication by id
//! - Fetches started for a conversation that was closed or re-opened in the
//!   meantime are discarded

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod event;
mod messenger;
mod state;

pub use error::MessengerError;
pub use event::ViewEvent;
pub use messenger::{Inbox, Messenger};
pub use state::{ConversationView, MessageView};

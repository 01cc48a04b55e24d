//! Client
//!
//! Per-conversation state machines for veilchat. Nothing here performs I/O:
//! the caller fetches pages, publishes envelopes and feeds bus traffic in,
//! and reads the resulting log state back out.
//!
//! # Components
//!
//! - [`ConversationSession`]: session-key cache, encrypt-for-send and
//!   decrypt-for-receive with unwrap fallback
//! - [`ReconciliationLog`]: ordered, de-duplicated messages with optimistic
//!   sends reconciled by `localId`
//! - [`Pager`]: backward cursor paging and the one-shot "jump to newest" flag
//! - [`Conversation`]: the three above for one peer
//! - [`Router`]: open conversations by peer, unread counters for closed ones

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod conversation;
mod error;
pub mod log;
pub mod pagination;
mod router;
mod session;

pub use conversation::{Conversation, ReceiveOutcome};
pub use error::{ClientError, SessionError};
pub use log::{Content, Delivery, EntryKey, LogEntry, ReconciliationLog};
pub use pagination::{FetchKind, PageRequest, Pager, ScrollAnchor};
pub use router::{Dispatch, Router};
pub use session::{ConversationSession, Decrypted, KeyPath, OutgoingFields};

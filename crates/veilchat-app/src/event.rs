//! Notifications for the view layer.
//!
//! The messenger never renders. It emits a [`ViewEvent`] whenever observable
//! state changes; the view reads the details back through
//! [`crate::Messenger::conversation`].

use veilchat_client::EntryKey;

/// A change the view should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// Keypair available; pending messages are being decrypted
    VaultUnlocked,

    /// Keypair dropped
    VaultLocked,

    /// Conversation opened, initial page requested
    ConversationOpened {
        /// The peer
        peer: String,
    },

    /// Initial page merged.
    InitialPageLoaded {
        /// The peer
        peer: String,
        /// Entries in the log
        count: usize,
        /// Scroll to the newest message (first render only)
        jump_to_newest: bool,
    },

    /// Older page prepended; restore the scroll anchor.
    OlderPageLoaded {
        /// The peer
        peer: String,
        /// Entries inserted at the head
        inserted: usize,
    },

    /// New entry at the tail.
    MessageAdded {
        /// The peer
        peer: String,
        /// Entry key
        key: EntryKey,
    },

    /// Entry changed in place (confirmed, decrypted, or failed).
    MessageUpdated {
        /// The peer
        peer: String,
        /// Entry key
        key: EntryKey,
    },

    /// A send was rejected or could not be published.
    SendFailed {
        /// The peer
        peer: String,
        /// Correlation id of the failed send
        local_id: String,
        /// Reason for the user
        reason: String,
    },

    /// Unread count of a closed conversation changed.
    UnreadChanged {
        /// The peer
        peer: String,
        /// New count
        count: u32,
    },

    /// A history fetch failed; state is unchanged.
    FetchFailed {
        /// The peer
        peer: String,
        /// Reason
        reason: String,
    },
}

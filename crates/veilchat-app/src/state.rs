//! Read-only views of conversation state.

use veilchat_client::{Content, Conversation, Delivery, EntryKey};

/// One message as the view shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    /// Entry key
    pub key: EntryKey,
    /// Author
    pub sender: String,
    /// Unix milliseconds
    pub timestamp: u64,
    /// Plaintext, or why it is not available
    pub content: Content,
    /// Delivery status
    pub delivery: Delivery,
}

/// Snapshot of an open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    /// The peer
    pub peer: String,
    /// Messages in display order
    pub messages: Vec<MessageView>,
    /// Whether older pages may exist
    pub has_more: bool,
    /// Whether a fetch is in flight
    pub loading: bool,
}

impl ConversationView {
    pub(crate) fn of(conversation: &Conversation) -> Self {
        let messages = conversation
            .log()
            .iter()
            .map(|entry| MessageView {
                key: entry.key.clone(),
                sender: entry.envelope.sender.clone(),
                timestamp: entry.envelope.timestamp,
                content: entry.content.clone(),
                delivery: entry.delivery.clone(),
            })
            .collect();

        Self {
            peer: conversation.peer().to_owned(),
            messages,
            has_more: conversation.pager().has_more(),
            loading: conversation.pager().is_loading(),
        }
    }

    /// Plaintexts of resolved messages, in order.
    pub fn plaintexts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match &m.content {
                Content::Plaintext(text) => Some(text.as_str()),
                Content::Decrypting | Content::Undecryptable { .. } => None,
            })
            .collect()
    }
}

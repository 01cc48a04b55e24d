//! Conversation router.
//!
//! Owns every open [`Conversation`] and the unread counters of closed ones.
//! The realtime dispatcher hands each envelope to [`Router::dispatch`], which
//! is the only place that decides where a message goes.

use std::collections::HashMap;

use veilchat_crypto::{Keypair, PublicKey};
use veilchat_proto::{MessageEnvelope, MessageType};

use crate::{ClientError, Conversation, EntryKey, conversation::ReceiveOutcome};

/// Where a dispatched envelope went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Merged into an open conversation
    Delivered {
        /// Conversation peer
        peer: String,
        /// Effect on the log
        outcome: ReceiveOutcome,
    },
    /// Counted as unread for a closed conversation
    Unread {
        /// Conversation peer
        peer: String,
        /// Unread count after this message
        count: u32,
    },
    /// Not routed (not a private chat, or our own echo for a closed
    /// conversation)
    Ignored,
}

/// Routes envelopes to conversations by peer.
#[derive(Debug)]
pub struct Router {
    local_user: String,
    conversations: HashMap<String, Conversation>,
    unread: HashMap<String, u32>,
    next_generation: u64,
}

impl Router {
    /// Router for `local_user` with nothing open.
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            conversations: HashMap::new(),
            unread: HashMap::new(),
            next_generation: 1,
        }
    }

    /// The local user.
    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    /// Open (or re-open) the conversation with `peer`.
    ///
    /// Always starts a fresh session and log, and clears the unread counter.
    pub fn open(&mut self, peer: &str, peer_key: PublicKey) -> &mut Conversation {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.unread.remove(peer);

        tracing::info!(user = %self.local_user, %peer, generation, "conversation opened");
        let conversation = Conversation::new(&self.local_user, peer, peer_key, generation);
        self.conversations.entry(peer.to_owned()).insert_entry(conversation).into_mut()
    }

    /// Close the conversation with `peer`. Returns `false` if it was not open.
    pub fn close(&mut self, peer: &str) -> bool {
        let closed = self.conversations.remove(peer).is_some();
        if closed {
            tracing::info!(user = %self.local_user, %peer, "conversation closed");
        }
        closed
    }

    /// Whether a conversation with `peer` is open.
    pub fn is_open(&self, peer: &str) -> bool {
        self.conversations.contains_key(peer)
    }

    /// The open conversation with `peer`.
    pub fn get(&self, peer: &str) -> Option<&Conversation> {
        self.conversations.get(peer)
    }

    /// The open conversation with `peer`, mutably.
    pub fn get_mut(&mut self, peer: &str) -> Result<&mut Conversation, ClientError> {
        self.conversations
            .get_mut(peer)
            .ok_or_else(|| ClientError::ConversationNotOpen { peer: peer.to_owned() })
    }

    /// The open conversation with `peer` if it is still the given opening.
    pub fn get_current(&mut self, peer: &str, generation: u64) -> Option<&mut Conversation> {
        self.conversations.get_mut(peer).filter(|c| c.generation() == generation)
    }

    /// Unread messages from `peer` while its conversation was closed.
    pub fn unread_count(&self, peer: &str) -> u32 {
        self.unread.get(peer).copied().unwrap_or(0)
    }

    /// Route an envelope from the realtime bus.
    pub fn dispatch(&mut self, envelope: MessageEnvelope, keypair: Option<&Keypair>) -> Dispatch {
        if envelope.message_type != MessageType::PrivateChat {
            tracing::debug!(kind = ?envelope.message_type, "ignoring non-private envelope");
            return Dispatch::Ignored;
        }

        let peer = envelope.peer_of(&self.local_user).to_owned();
        if let Some(conversation) = self.conversations.get_mut(&peer) {
            let outcome = conversation.receive(envelope, keypair);
            return Dispatch::Delivered { peer, outcome };
        }

        if envelope.sender == self.local_user {
            return Dispatch::Ignored;
        }

        let count = self.unread.entry(peer.clone()).or_default();
        *count += 1;
        Dispatch::Unread { count: *count, peer }
    }

    /// Mark a rejected send failed in the conversation it belongs to.
    pub fn mark_failed(&mut self, peer: &str, local_id: &str, reason: &str) -> bool {
        self.conversations.get_mut(peer).is_some_and(|c| c.mark_failed(local_id, reason))
    }

    /// Decrypt pending entries of every open conversation.
    ///
    /// Returns, per peer, the keys that were resolved.
    pub fn decrypt_pending(&mut self, keypair: &Keypair) -> Vec<(String, Vec<EntryKey>)> {
        self.conversations
            .iter_mut()
            .map(|(peer, conversation)| (peer.clone(), conversation.decrypt_pending(keypair)))
            .filter(|(_, keys)| !keys.is_empty())
            .collect()
    }

    /// Drop every cached session key.
    pub fn lock_all(&mut self) {
        for conversation in self.conversations.values_mut() {
            conversation.lock();
        }
    }
}

#[cfg(test)]
mod tests {
    use veilchat_harness::fixtures::{alice_keypair, bob_keypair};

    use super::*;

    fn envelope(id: &str, sender: &str, recipient: &str) -> MessageEnvelope {
        MessageEnvelope {
            id: Some(id.into()),
            sender: sender.into(),
            recipient: recipient.into(),
            ..MessageEnvelope::default()
        }
    }

    #[test]
    fn closed_conversation_counts_unread() {
        let mut router = Router::new("alice");

        assert_eq!(router.dispatch(envelope("1", "bob", "alice"), None), Dispatch::Unread {
            peer: "bob".into(),
            count: 1
        });
        router.dispatch(envelope("2", "bob", "alice"), None);
        assert_eq!(router.unread_count("bob"), 2);

        router.open("bob", bob_keypair().public.clone());
        assert_eq!(router.unread_count("bob"), 0);
    }

    #[test]
    fn own_echo_routes_to_recipient_conversation() {
        let mut router = Router::new("alice");
        router.open("bob", bob_keypair().public.clone());

        let dispatch = router.dispatch(envelope("1", "alice", "bob"), Some(alice_keypair()));
        assert!(matches!(dispatch, Dispatch::Delivered { ref peer, .. } if peer == "bob"));
    }

    #[test]
    fn own_echo_for_closed_conversation_is_ignored() {
        let mut router = Router::new("alice");
        assert_eq!(router.dispatch(envelope("1", "alice", "bob"), None), Dispatch::Ignored);
        assert_eq!(router.unread_count("bob"), 0);
    }

    #[test]
    fn non_private_envelopes_are_ignored() {
        let mut router = Router::new("alice");
        let public = MessageEnvelope { message_type: MessageType::Chat, ..envelope("1", "bob", "alice") };
        assert_eq!(router.dispatch(public, None), Dispatch::Ignored);
    }

    #[test]
    fn reopen_starts_fresh_generation() {
        let mut router = Router::new("alice");
        let first = router.open("bob", bob_keypair().public.clone()).generation();
        router.dispatch(envelope("1", "bob", "alice"), None);

        let second = router.open("bob", bob_keypair().public.clone()).generation();

        assert!(second > first);
        assert!(router.get_current("bob", first).is_none());
        assert!(router.get("bob").unwrap().log().is_empty());
    }

    #[test]
    fn closed_conversation_is_not_found() {
        let mut router = Router::new("alice");
        router.open("bob", bob_keypair().public.clone());
        assert!(router.close("bob"));
        assert!(!router.close("bob"));

        assert_eq!(router.get_mut("bob").unwrap_err(), ClientError::ConversationNotOpen { peer: "bob".into() });
    }
}

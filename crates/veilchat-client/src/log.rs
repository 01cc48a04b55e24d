//! Message reconciliation log.
//!
//! Ordered, de-duplicated messages of one conversation. Entries are created
//! optimistically on send (keyed by `localId`), re-keyed in place when the
//! server echo arrives (keyed by `id`), or created directly from received and
//! fetched envelopes.
//!
//! # Ordering
//!
//! Positions are signed sequence numbers. Appends take the next number after
//! the tail, prepends take numbers before the head, so neither moves an
//! existing entry:
//!
//! ```text
//!   prepend ◄── -3 -2 -1 │ 0  1  2 ──► append
//!                  head ─┘        └─ tail
//! ```
//!
//! # Invariants
//!
//! - Each `id` and each `localId` appears at most once
//! - Re-keying a pending entry keeps its position and its plaintext
//! - Resolved plaintext is never overwritten or recomputed
//! - Rebuilding from a history page never drops an entry the page lacks

use std::collections::{BTreeMap, HashMap, HashSet};

use veilchat_proto::MessageEnvelope;

/// Identity of a log entry.
///
/// Transitions at most once, from `Pending` to `Confirmed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    /// Sent locally, not yet echoed by the server
    Pending {
        /// Client correlation id
        local_id: String,
    },
    /// Known to the server
    Confirmed {
        /// Server-assigned id
        id: String,
    },
}

impl EntryKey {
    /// Key of a server-confirmed entry.
    pub fn confirmed(id: impl Into<String>) -> Self {
        Self::Confirmed { id: id.into() }
    }

    /// Key of a pending entry.
    pub fn pending(local_id: impl Into<String>) -> Self {
        Self::Pending { local_id: local_id.into() }
    }
}

/// Display content of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Not decrypted yet (no keypair, or decryption queued)
    Decrypting,
    /// Decrypted text
    Plaintext(String),
    /// Decryption failed for this message only
    Undecryptable {
        /// Why, suitable for an inline notice
        reason: String,
    },
}

impl Content {
    /// Whether the content has reached a final state.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Decrypting)
    }
}

/// Delivery status of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistic, awaiting server echo
    Sending,
    /// Stored by the server
    Sent,
    /// Server or transport refused the send
    Failed {
        /// Reason reported to the user
        reason: String,
    },
}

/// One message in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Current identity
    pub key: EntryKey,
    /// Latest envelope for the entry
    pub envelope: MessageEnvelope,
    /// Display content
    pub content: Content,
    /// Delivery status
    pub delivery: Delivery,
}

/// Result of [`ReconciliationLog::append_remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New entry at the tail
    Inserted,
    /// `id` already present; nothing changed
    Duplicate,
    /// Envelope has no server id; nothing changed
    MissingId,
}

/// Result of [`ReconciliationLog::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Matching pending entry re-keyed in place
    Reconciled,
    /// No pending match; appended as a new entry
    Appended,
    /// `id` already present; nothing changed
    Duplicate,
    /// Envelope has no server id; nothing changed
    MissingId,
}

/// The reconciliation log of one conversation.
#[derive(Debug, Clone)]
pub struct ReconciliationLog {
    local_user: String,
    entries: BTreeMap<i64, LogEntry>,
    index: HashMap<EntryKey, i64>,
    next_tail: i64,
    next_head: i64,
}

impl ReconciliationLog {
    /// Empty log for `local_user`'s side of a conversation.
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_tail: 0,
            next_head: -1,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in display order.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    /// Entry by key.
    pub fn get(&self, key: &EntryKey) -> Option<&LogEntry> {
        self.index.get(key).and_then(|seq| self.entries.get(seq))
    }

    /// Whether a confirmed entry with `id` exists.
    pub fn contains_id(&self, id: &str) -> bool {
        self.index.contains_key(&EntryKey::confirmed(id))
    }

    /// Insert a just-sent message at the tail, keyed by `local_id`.
    ///
    /// Returns `false` if `local_id` is already in the log.
    pub fn append_optimistic(
        &mut self,
        local_id: &str,
        envelope: MessageEnvelope,
        plaintext: impl Into<String>,
    ) -> bool {
        let key = EntryKey::pending(local_id);
        if self.index.contains_key(&key) {
            return false;
        }

        self.push_tail(LogEntry {
            key,
            envelope,
            content: Content::Plaintext(plaintext.into()),
            delivery: Delivery::Sending,
        });
        true
    }

    /// Reconcile a server echo of one of our own sends.
    ///
    /// A pending entry whose `localId` matches is re-keyed to the server `id`
    /// in place with its plaintext kept. Without a match (for example after a
    /// reconnect lost the optimistic entry) the echo is appended and needs
    /// decrypting.
    pub fn confirm(&mut self, envelope: MessageEnvelope) -> ConfirmOutcome {
        let Some(id) = envelope.id.clone() else {
            return ConfirmOutcome::MissingId;
        };
        let confirmed = EntryKey::confirmed(&id);
        if self.index.contains_key(&confirmed) {
            tracing::debug!(%id, "skipping duplicate echo");
            return ConfirmOutcome::Duplicate;
        }

        let pending_seq = (envelope.sender == self.local_user)
            .then(|| envelope.local_id.as_deref())
            .flatten()
            .and_then(|local_id| self.index.remove(&EntryKey::pending(local_id)));

        if let Some(seq) = pending_seq
            && let Some(entry) = self.entries.get_mut(&seq)
        {
            entry.key = confirmed.clone();
            entry.envelope = envelope;
            entry.delivery = Delivery::Sent;
            self.index.insert(confirmed, seq);
            return ConfirmOutcome::Reconciled;
        }

        self.push_tail(LogEntry {
            key: confirmed,
            envelope,
            content: Content::Decrypting,
            delivery: Delivery::Sent,
        });
        ConfirmOutcome::Appended
    }

    /// Append a message from the realtime bus.
    ///
    /// Idempotent against at-least-once redelivery.
    pub fn append_remote(&mut self, envelope: MessageEnvelope) -> AppendOutcome {
        let Some(id) = envelope.id.clone() else {
            return AppendOutcome::MissingId;
        };
        let key = EntryKey::confirmed(id);
        if self.index.contains_key(&key) {
            tracing::debug!(id = ?key, "skipping duplicate delivery");
            return AppendOutcome::Duplicate;
        }

        self.push_tail(LogEntry {
            key,
            envelope,
            content: Content::Decrypting,
            delivery: Delivery::Sent,
        });
        AppendOutcome::Inserted
    }

    /// Insert a page of older messages before the head.
    ///
    /// `older` must be in chronological order. Envelopes without an id, or
    /// whose id is already present (in the log or earlier in the page), are
    /// skipped. Returns the keys inserted, oldest first.
    pub fn prepend(&mut self, older: Vec<MessageEnvelope>) -> Vec<EntryKey> {
        let mut seen = HashSet::new();
        let accepted: Vec<(String, MessageEnvelope)> = older
            .into_iter()
            .filter_map(|envelope| envelope.id.clone().map(|id| (id, envelope)))
            .filter(|(id, _)| !self.contains_id(id) && seen.insert(id.clone()))
            .collect();

        let count = accepted.len() as i64;
        let first_seq = self.next_head - count + 1;
        self.next_head -= count;

        let mut keys = Vec::with_capacity(accepted.len());
        for (offset, (id, envelope)) in accepted.into_iter().enumerate() {
            let seq = first_seq + offset as i64;
            let key = EntryKey::confirmed(id);
            self.index.insert(key.clone(), seq);
            self.entries.insert(seq, LogEntry {
                key: key.clone(),
                envelope,
                content: Content::Decrypting,
                delivery: Delivery::Sent,
            });
            keys.push(key);
        }
        keys
    }

    /// Rebuild the log from `records` (chronological order).
    ///
    /// An existing entry that a record supersedes (same `id`, or one of our
    /// pending sends whose echo is in `records`) gives the record its resolved
    /// content. Existing entries not covered by `records`, such as deliveries
    /// that raced the fetch, follow the records in their previous order.
    ///
    /// Returns the keys of the records inserted.
    pub fn replace_all(&mut self, records: Vec<MessageEnvelope>) -> Vec<EntryKey> {
        let mut previous: Vec<LogEntry> = std::mem::take(&mut self.entries).into_values().collect();
        self.index.clear();
        self.next_tail = 0;
        self.next_head = -1;

        let mut inserted = Vec::with_capacity(records.len());
        for envelope in records {
            let Some(id) = envelope.id.clone() else {
                continue;
            };
            let key = EntryKey::confirmed(id);
            if self.index.contains_key(&key) {
                continue;
            }

            let content = previous
                .iter()
                .position(|entry| self.supersedes(&envelope, entry))
                .map_or(Content::Decrypting, |at| previous.remove(at).content);
            self.push_tail(LogEntry { key: key.clone(), envelope, content, delivery: Delivery::Sent });
            inserted.push(key);
        }

        if !previous.is_empty() {
            tracing::debug!(kept = previous.len(), "keeping entries missing from page");
        }
        for entry in previous {
            self.push_tail(entry);
        }
        inserted
    }

    /// Keys and envelopes of entries still awaiting decryption, in order.
    pub fn pending_decryption(&self) -> Vec<(EntryKey, MessageEnvelope)> {
        self.entries
            .values()
            .filter(|entry| entry.content == Content::Decrypting)
            .map(|entry| (entry.key.clone(), entry.envelope.clone()))
            .collect()
    }

    /// Set the content of an entry that is still decrypting.
    ///
    /// Returns `false` if the entry is gone or already resolved; resolved
    /// content is final.
    pub fn set_content(&mut self, key: &EntryKey, content: Content) -> bool {
        let Some(entry) = self.index.get(key).and_then(|seq| self.entries.get_mut(seq)) else {
            return false;
        };
        if entry.content.is_resolved() {
            return false;
        }
        entry.content = content;
        true
    }

    /// Mark a pending send as failed. Position and plaintext are kept.
    ///
    /// Returns `false` if no pending entry has `local_id`.
    pub fn mark_failed(&mut self, local_id: &str, reason: impl Into<String>) -> bool {
        let key = EntryKey::pending(local_id);
        let Some(entry) = self.index.get(&key).and_then(|seq| self.entries.get_mut(seq)) else {
            return false;
        };
        entry.delivery = Delivery::Failed { reason: reason.into() };
        true
    }

    /// Whether `record` from the server stands for `entry`.
    fn supersedes(&self, record: &MessageEnvelope, entry: &LogEntry) -> bool {
        match &entry.key {
            EntryKey::Confirmed { id } => record.id.as_deref() == Some(id.as_str()),
            EntryKey::Pending { local_id } => {
                record.sender == self.local_user && record.local_id.as_deref() == Some(local_id.as_str())
            },
        }
    }

    fn push_tail(&mut self, entry: LogEntry) {
        let seq = self.next_tail;
        self.next_tail += 1;
        self.index.insert(entry.key.clone(), seq);
        self.entries.insert(seq, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str) -> MessageEnvelope {
        MessageEnvelope {
            id: Some(id.into()),
            sender: "bob".into(),
            recipient: "alice".into(),
            ..MessageEnvelope::default()
        }
    }

    fn outgoing(local_id: &str) -> MessageEnvelope {
        MessageEnvelope {
            local_id: Some(local_id.into()),
            sender: "alice".into(),
            recipient: "bob".into(),
            ..MessageEnvelope::default()
        }
    }

    fn echo(id: &str, local_id: &str) -> MessageEnvelope {
        MessageEnvelope { id: Some(id.into()), ..outgoing(local_id) }
    }

    fn keys(log: &ReconciliationLog) -> Vec<EntryKey> {
        log.iter().map(|e| e.key.clone()).collect()
    }

    #[test]
    fn append_remote_is_idempotent() {
        let mut log = ReconciliationLog::new("alice");

        assert_eq!(log.append_remote(remote("1")), AppendOutcome::Inserted);
        assert_eq!(log.append_remote(remote("1")), AppendOutcome::Duplicate);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn append_remote_requires_id() {
        let mut log = ReconciliationLog::new("alice");
        assert_eq!(log.append_remote(outgoing("l1")), AppendOutcome::MissingId);
        assert!(log.is_empty());
    }

    #[test]
    fn confirm_rekeys_in_place_and_keeps_plaintext() {
        let mut log = ReconciliationLog::new("alice");
        log.append_remote(remote("1"));
        assert!(log.append_optimistic("L", outgoing("L"), "hello"));
        log.append_remote(remote("2"));

        assert_eq!(log.confirm(echo("S", "L")), ConfirmOutcome::Reconciled);

        assert_eq!(keys(&log), vec![
            EntryKey::confirmed("1"),
            EntryKey::confirmed("S"),
            EntryKey::confirmed("2"),
        ]);
        let entry = log.get(&EntryKey::confirmed("S")).unwrap();
        assert_eq!(entry.content, Content::Plaintext("hello".into()));
        assert_eq!(entry.delivery, Delivery::Sent);
        assert!(log.get(&EntryKey::pending("L")).is_none());
    }

    #[test]
    fn repeated_echo_is_duplicate() {
        let mut log = ReconciliationLog::new("alice");
        log.append_optimistic("L", outgoing("L"), "hello");

        assert_eq!(log.confirm(echo("S", "L")), ConfirmOutcome::Reconciled);
        assert_eq!(log.confirm(echo("S", "L")), ConfirmOutcome::Duplicate);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn unmatched_echo_is_appended_for_decryption() {
        let mut log = ReconciliationLog::new("alice");

        assert_eq!(log.confirm(echo("S", "lost")), ConfirmOutcome::Appended);

        let entry = log.get(&EntryKey::confirmed("S")).unwrap();
        assert_eq!(entry.content, Content::Decrypting);
    }

    #[test]
    fn echo_from_other_sender_never_matches_pending() {
        let mut log = ReconciliationLog::new("alice");
        log.append_optimistic("L", outgoing("L"), "hello");

        let spoofed = MessageEnvelope { sender: "mallory".into(), ..echo("S", "L") };
        assert_eq!(log.confirm(spoofed), ConfirmOutcome::Appended);
        assert!(log.get(&EntryKey::pending("L")).is_some());
    }

    #[test]
    fn duplicate_local_id_is_rejected() {
        let mut log = ReconciliationLog::new("alice");
        assert!(log.append_optimistic("L", outgoing("L"), "a"));
        assert!(!log.append_optimistic("L", outgoing("L"), "b"));
    }

    #[test]
    fn prepend_inserts_before_head_in_order() {
        let mut log = ReconciliationLog::new("alice");
        log.append_remote(remote("5"));
        log.append_remote(remote("6"));

        let inserted = log.prepend(vec![remote("3"), remote("4")]);
        assert_eq!(inserted.len(), 2);
        log.prepend(vec![remote("1"), remote("2")]);

        let ids: Vec<_> = log.iter().filter_map(|e| e.envelope.id.clone()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6"]);
    }

    #[test]
    fn prepend_filters_known_and_repeated_ids() {
        let mut log = ReconciliationLog::new("alice");
        log.append_remote(remote("3"));

        let inserted = log.prepend(vec![remote("1"), remote("2"), remote("2"), remote("3")]);

        assert_eq!(inserted, vec![EntryKey::confirmed("1"), EntryKey::confirmed("2")]);
        let ids: Vec<_> = log.iter().filter_map(|e| e.envelope.id.clone()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn replace_all_skips_repeated_records() {
        let mut log = ReconciliationLog::new("alice");

        let inserted = log.replace_all(vec![remote("1"), remote("2"), remote("1")]);

        assert_eq!(inserted, vec![EntryKey::confirmed("1"), EntryKey::confirmed("2")]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn replace_all_keeps_entries_that_raced_the_page() {
        let mut log = ReconciliationLog::new("alice");
        log.append_optimistic("l1", outgoing("l1"), "echoed in page");
        log.append_optimistic("l2", outgoing("l2"), "not stored yet");
        log.append_remote(remote("live"));
        log.set_content(&EntryKey::confirmed("live"), Content::Plaintext("just arrived".into()));

        let inserted = log.replace_all(vec![remote("1"), echo("2", "l1")]);

        assert_eq!(inserted, vec![EntryKey::confirmed("1"), EntryKey::confirmed("2")]);
        assert_eq!(keys(&log), vec![
            EntryKey::confirmed("1"),
            EntryKey::confirmed("2"),
            EntryKey::pending("l2"),
            EntryKey::confirmed("live"),
        ]);

        let echoed = log.get(&EntryKey::confirmed("2")).unwrap();
        assert_eq!(echoed.content, Content::Plaintext("echoed in page".into()));
        assert_eq!(echoed.delivery, Delivery::Sent);
        assert_eq!(log.get(&EntryKey::pending("l2")).unwrap().delivery, Delivery::Sending);
        assert_eq!(
            log.get(&EntryKey::confirmed("live")).unwrap().content,
            Content::Plaintext("just arrived".into())
        );
        assert_eq!(log.get(&EntryKey::confirmed("1")).unwrap().content, Content::Decrypting);
    }

    #[test]
    fn replace_all_carries_resolved_content_of_known_ids() {
        let mut log = ReconciliationLog::new("alice");
        log.append_remote(remote("1"));
        log.set_content(&EntryKey::confirmed("1"), Content::Plaintext("seen".into()));

        log.replace_all(vec![remote("1"), remote("2")]);

        assert_eq!(log.len(), 2);
        assert_eq!(log.get(&EntryKey::confirmed("1")).unwrap().content, Content::Plaintext("seen".into()));
        assert_eq!(log.pending_decryption().len(), 1);
    }

    #[test]
    fn resolved_content_is_final() {
        let mut log = ReconciliationLog::new("alice");
        log.append_remote(remote("1"));
        let key = EntryKey::confirmed("1");

        assert!(log.set_content(&key, Content::Plaintext("hi".into())));
        assert!(!log.set_content(&key, Content::Undecryptable { reason: "late".into() }));
        assert_eq!(log.get(&key).unwrap().content, Content::Plaintext("hi".into()));
    }

    #[test]
    fn pending_decryption_lists_unresolved_in_order() {
        let mut log = ReconciliationLog::new("alice");
        log.append_remote(remote("2"));
        log.append_optimistic("L", outgoing("L"), "mine");
        log.prepend(vec![remote("1")]);

        let pending: Vec<_> = log.pending_decryption().into_iter().map(|(k, _)| k).collect();
        assert_eq!(pending, vec![EntryKey::confirmed("1"), EntryKey::confirmed("2")]);
    }

    #[test]
    fn mark_failed_keeps_entry() {
        let mut log = ReconciliationLog::new("alice");
        log.append_optimistic("L", outgoing("L"), "hello");

        assert!(log.mark_failed("L", "recipient does not exist"));
        assert!(!log.mark_failed("missing", "x"));

        let entry = log.get(&EntryKey::pending("L")).unwrap();
        assert_eq!(entry.delivery, Delivery::Failed { reason: "recipient does not exist".into() });
        assert_eq!(entry.content, Content::Plaintext("hello".into()));
    }
}

//! One open conversation: crypto session, reconciliation log and pager.
//!
//! All operations for a peer go through `&mut Conversation`, so sends,
//! receives and page merges are sequential and never race the session-key
//! cache.

use rand_core::CryptoRngCore;
use veilchat_crypto::{Keypair, PublicKey};
use veilchat_proto::{HistoryPage, MessageEnvelope, MessageType};

use crate::{
    ClientError, Content, ConversationSession, EntryKey, ReconciliationLog,
    log::{AppendOutcome, ConfirmOutcome},
    pagination::{FetchKind, PageRequest, Pager},
};

/// What a received envelope did to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// New entry
    Added(EntryKey),
    /// Optimistic entry confirmed in place
    Updated(EntryKey),
    /// Already present; nothing changed
    Duplicate,
    /// No server id; dropped
    MissingId,
}

/// State of one open conversation.
#[derive(Debug)]
pub struct Conversation {
    local_user: String,
    peer: String,
    generation: u64,
    session: ConversationSession,
    log: ReconciliationLog,
    pager: Pager,
}

impl Conversation {
    /// Open a conversation with `peer` using their public key.
    ///
    /// `generation` identifies this opening; results of fetches started under
    /// an older generation must be discarded by the caller.
    pub fn new(local_user: &str, peer: &str, peer_key: PublicKey, generation: u64) -> Self {
        Self {
            local_user: local_user.to_owned(),
            peer: peer.to_owned(),
            generation,
            session: ConversationSession::new(local_user, peer, peer_key),
            log: ReconciliationLog::new(local_user),
            pager: Pager::new(),
        }
    }

    /// The remote participant.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Opening generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The message log.
    pub fn log(&self) -> &ReconciliationLog {
        &self.log
    }

    /// The crypto session.
    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    /// The pager.
    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// Encrypt `plaintext` and append it optimistically under `local_id`.
    ///
    /// Returns the envelope to publish.
    pub fn prepare_send(
        &mut self,
        local_id: &str,
        plaintext: &str,
        keypair: &Keypair,
        rng: &mut impl CryptoRngCore,
        timestamp: u64,
    ) -> Result<MessageEnvelope, ClientError> {
        if self.log.get(&EntryKey::pending(local_id)).is_some() {
            return Err(ClientError::DuplicateLocalId { local_id: local_id.to_owned() });
        }

        let fields = self.session.encrypt_for_send(plaintext, keypair, rng)?;
        let envelope = MessageEnvelope {
            id: None,
            local_id: Some(local_id.to_owned()),
            sender: self.local_user.clone(),
            recipient: self.peer.clone(),
            content: fields.content,
            iv: Some(fields.iv),
            wrapped_key_sender: Some(fields.wrapped_key_sender),
            wrapped_key_recipient: Some(fields.wrapped_key_recipient),
            message_type: MessageType::PrivateChat,
            timestamp,
            color: None,
        };

        self.log.append_optimistic(local_id, envelope.clone(), plaintext);
        Ok(envelope)
    }

    /// Merge an envelope from the realtime bus.
    ///
    /// Our own echoes carrying a `localId` reconcile the optimistic entry;
    /// everything else is appended. New entries are decrypted when a keypair
    /// is available and left `Decrypting` otherwise.
    pub fn receive(&mut self, envelope: MessageEnvelope, keypair: Option<&Keypair>) -> ReceiveOutcome {
        let is_own_echo = envelope.sender == self.local_user && envelope.local_id.is_some();
        let id = envelope.id.clone();

        let outcome = if is_own_echo {
            match self.log.confirm(envelope) {
                ConfirmOutcome::Reconciled => id.map(EntryKey::confirmed).map(ReceiveOutcome::Updated),
                ConfirmOutcome::Appended => id.map(EntryKey::confirmed).map(ReceiveOutcome::Added),
                ConfirmOutcome::Duplicate => Some(ReceiveOutcome::Duplicate),
                ConfirmOutcome::MissingId => Some(ReceiveOutcome::MissingId),
            }
        } else {
            match self.log.append_remote(envelope) {
                AppendOutcome::Inserted => id.map(EntryKey::confirmed).map(ReceiveOutcome::Added),
                AppendOutcome::Duplicate => Some(ReceiveOutcome::Duplicate),
                AppendOutcome::MissingId => Some(ReceiveOutcome::MissingId),
            }
        };
        let outcome = outcome.unwrap_or(ReceiveOutcome::MissingId);

        if let (ReceiveOutcome::Added(key), Some(keypair)) = (&outcome, keypair) {
            self.decrypt_entry(key, keypair);
        }
        outcome
    }

    /// Start the initial fetch. `None` if a fetch is in flight.
    pub fn begin_initial(&mut self) -> Option<PageRequest> {
        self.pager.begin_initial()
    }

    /// Start an older-page fetch. `None` when there is nothing to do.
    pub fn begin_older(&mut self) -> Option<PageRequest> {
        self.pager.begin_older()
    }

    /// Forget an in-flight fetch that failed or was cancelled.
    pub fn abandon_fetch(&mut self) {
        self.pager.abandon();
    }

    /// Consume the one-shot "jump to newest" flag.
    pub fn take_jump_to_newest(&mut self) -> bool {
        self.pager.take_jump_to_newest()
    }

    /// Rebuild the log from the most recent page, keeping entries that
    /// arrived while it loaded.
    ///
    /// Returns the keys of the page records, or an empty list if no initial
    /// fetch was in flight.
    pub fn apply_initial(&mut self, page: HistoryPage, keypair: Option<&Keypair>) -> Vec<EntryKey> {
        if !self.pager.complete(FetchKind::Initial, &page) {
            return Vec::new();
        }
        let keys = self.log.replace_all(page.into_chronological());
        self.decrypt_keys(&keys, keypair);
        keys
    }

    /// Prepend an older page.
    ///
    /// Returns the keys inserted, or an empty list if no older fetch was in
    /// flight.
    pub fn apply_older(&mut self, page: HistoryPage, keypair: Option<&Keypair>) -> Vec<EntryKey> {
        if !self.pager.complete(FetchKind::Older, &page) {
            return Vec::new();
        }
        let keys = self.log.prepend(page.into_chronological());
        self.decrypt_keys(&keys, keypair);
        keys
    }

    /// Decrypt every entry still `Decrypting`. Returns the keys resolved.
    pub fn decrypt_pending(&mut self, keypair: &Keypair) -> Vec<EntryKey> {
        self.log
            .pending_decryption()
            .into_iter()
            .filter_map(|(key, envelope)| self.resolve(key, &envelope, keypair))
            .collect()
    }

    /// Mark a pending send failed.
    pub fn mark_failed(&mut self, local_id: &str, reason: &str) -> bool {
        let failed = self.log.mark_failed(local_id, reason);
        if failed {
            tracing::warn!(peer = %self.peer, %local_id, %reason, "send rejected");
        }
        failed
    }

    /// Drop the cached session key. Resolved plaintext stays.
    pub fn lock(&mut self) {
        self.session.forget_key();
    }

    fn decrypt_keys(&mut self, keys: &[EntryKey], keypair: Option<&Keypair>) {
        let Some(keypair) = keypair else {
            return;
        };
        for key in keys {
            self.decrypt_entry(key, keypair);
        }
    }

    fn decrypt_entry(&mut self, key: &EntryKey, keypair: &Keypair) {
        let Some(envelope) = self
            .log
            .get(key)
            .filter(|entry| !entry.content.is_resolved())
            .map(|entry| entry.envelope.clone())
        else {
            return;
        };
        self.resolve(key.clone(), &envelope, keypair);
    }

    fn resolve(&mut self, key: EntryKey, envelope: &MessageEnvelope, keypair: &Keypair) -> Option<EntryKey> {
        let content = match self.session.decrypt_for_receive(envelope, keypair) {
            Ok(decrypted) => Content::Plaintext(decrypted.plaintext),
            Err(e) => {
                tracing::warn!(peer = %self.peer, entry = ?key, error = %e, "message undecryptable");
                Content::Undecryptable { reason: e.to_string() }
            },
        };
        self.log.set_content(&key, content).then_some(key)
    }
}

//! In-memory server implementing every collaborator.
//!
//! `SimServer` plays the key directory, the history service and the realtime
//! bus for any number of users. [`SimServer::connect`] returns the
//! [`Collaborators`] a client for one user is wired to. Behavior mirrors the
//! production server:
//!
//! - Sends to `/app/chat/sendPrivateMessage` get a fresh `msg-{n}` id and the
//!   authenticated sender, are stored, and are echoed to the private queues of
//!   both participants
//! - Sends to an unknown recipient are answered on the sender's error queue
//!   with the original request
//! - History pages are newest first; the cursor is the id of the oldest record
//!
//! Faults are injected through setters and apply to every connected user.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::mpsc;
use veilchat_core::{Collaborators, HistoryService, KeyDirectory, RealtimeBus, ServiceError};
use veilchat_crypto::{Keypair, derive_key, encrypt, generate_salt};
use veilchat_proto::{
    Cursor, HistoryPage, MessageEnvelope, MessageType, PrivateKeyEnvelope, SendRejection, codec,
    topics,
};

/// Injected failures.
#[derive(Debug, Clone, Default)]
struct Faults {
    history_offline: bool,
    history_delay: Option<Duration>,
    duplicate_delivery: bool,
    directory_offline: bool,
}

#[derive(Default)]
struct ServerState {
    users: HashSet<String>,
    private_keys: HashMap<String, String>,
    public_keys: HashMap<String, String>,
    /// Stored messages, oldest first
    messages: Vec<MessageEnvelope>,
    next_id: u64,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    read_marks: Vec<(String, String)>,
    published: Vec<(String, String)>,
    faults: Faults,
    next_seed: u64,
}

impl ServerState {
    fn assign_id(&mut self) -> String {
        self.next_id += 1;
        format!("msg-{}", self.next_id)
    }

    fn deliver(&mut self, topic: &str, payload: &str) {
        let copies = if self.faults.duplicate_delivery { 2 } else { 1 };
        if let Some(subscribers) = self.subscribers.get_mut(topic) {
            subscribers.retain(|tx| (0..copies).all(|_| tx.send(payload.to_owned()).is_ok()));
        }
    }

    fn conversation(&self, a: &str, b: &str) -> impl DoubleEndedIterator<Item = &MessageEnvelope> {
        self.messages.iter().filter(move |m| {
            (m.sender == a && m.recipient == b) || (m.sender == b && m.recipient == a)
        })
    }

    /// One history page of `user`'s conversation with `peer`, newest first.
    fn page(
        &self,
        user: &str,
        peer: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> Result<HistoryPage, ServiceError> {
        if self.faults.history_offline {
            return Err(ServiceError::Unavailable { reason: "history offline".into() });
        }

        let newest_first = self.conversation(user, peer).rev();
        let records: Vec<MessageEnvelope> = match cursor {
            None => newest_first.take(page_size).cloned().collect(),
            Some(cursor) => {
                if !self.messages.iter().any(|m| m.id.as_deref() == Some(cursor.as_str())) {
                    return Err(ServiceError::Rejected { reason: format!("unknown cursor {cursor}") });
                }
                newest_first
                    .skip_while(|m| m.id.as_deref() != Some(cursor.as_str()))
                    .skip(1)
                    .take(page_size)
                    .cloned()
                    .collect()
            },
        };

        Ok(HistoryPage::from_newest_first(records, page_size, |m| {
            Cursor(m.id.clone().unwrap_or_default())
        }))
    }
}

/// Shared in-memory server.
#[derive(Clone, Default)]
pub struct SimServer {
    state: Arc<Mutex<ServerState>>,
}

impl SimServer {
    /// Empty server with no users.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `user` and return the collaborators scoped to them.
    pub fn connect(&self, user: &str) -> Collaborators {
        self.state().users.insert(user.to_owned());
        let handle = Arc::new(UserHandle { user: user.to_owned(), server: self.clone() });
        Collaborators { directory: handle.clone(), history: handle.clone(), bus: handle }
    }

    /// Drop every subscription of `user`; their receivers close.
    pub fn disconnect(&self, user: &str) {
        let mut state = self.state();
        state.subscribers.remove(&topics::private_queue(user));
        state.subscribers.remove(&topics::error_queue(user));
    }

    /// Forget `user`, as if the account was deleted. Sends to them are
    /// rejected from now on.
    pub fn remove_user(&self, user: &str) {
        self.state().users.remove(user);
    }

    /// Store a PIN-protected key envelope for `user` and publish the public
    /// key, as first-time setup would, without going through a vault.
    pub fn provision_user(&self, user: &str, pin: &str, keypair: &Keypair) {
        let seed = {
            let mut state = self.state();
            state.users.insert(user.to_owned());
            state.next_seed += 1;
            state.next_seed
        };
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        let salt = generate_salt(&mut rng);
        let Ok(wrapping) = derive_key(pin, &salt) else {
            unreachable!("invariant: generated salt has the KDF salt length")
        };
        let Ok(der) = keypair.private.to_pkcs8_der() else {
            unreachable!("invariant: a valid RSA private key encodes as PKCS#8")
        };
        let Ok(spki) = keypair.public.to_spki_der() else {
            unreachable!("invariant: a valid RSA public key encodes as SPKI")
        };
        let sealed = encrypt(&der, &wrapping, &mut rng);
        let envelope = PrivateKeyEnvelope {
            salt: salt.to_vec(),
            iv: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
        };

        let mut state = self.state();
        state.private_keys.insert(user.to_owned(), envelope.encode());
        state.public_keys.insert(user.to_owned(), codec::encode(&spki));
    }

    /// Overwrite the stored private-key envelope of `user`.
    pub fn set_private_key(&self, user: &str, envelope: &str) {
        self.state().private_keys.insert(user.to_owned(), envelope.to_owned());
    }

    /// Stored private-key envelope of `user`.
    pub fn private_key(&self, user: &str) -> Option<String> {
        self.state().private_keys.get(user).cloned()
    }

    /// Published public key of `user`.
    pub fn public_key(&self, user: &str) -> Option<String> {
        self.state().public_keys.get(user).cloned()
    }

    /// Store a message as if it had been sent earlier. Returns its id.
    ///
    /// Participants are registered as users.
    pub fn seed_history(&self, mut envelope: MessageEnvelope) -> String {
        let mut state = self.state();
        let id = state.assign_id();
        envelope.id = Some(id.clone());
        envelope.message_type = MessageType::PrivateChat;
        state.users.insert(envelope.sender.clone());
        state.users.insert(envelope.recipient.clone());
        state.messages.push(envelope);
        id
    }

    /// All stored messages, oldest first.
    pub fn stored_messages(&self) -> Vec<MessageEnvelope> {
        self.state().messages.clone()
    }

    /// Deliver a raw payload on `topic`.
    pub fn inject(&self, topic: &str, payload: &str) {
        self.state().deliver(topic, payload);
    }

    /// `(reader, peer)` pairs of every `mark_read` call.
    pub fn read_marks(&self) -> Vec<(String, String)> {
        self.state().read_marks.clone()
    }

    /// `(destination, payload)` of every accepted publish.
    pub fn published(&self) -> Vec<(String, String)> {
        self.state().published.clone()
    }

    /// History requests fail with `Unavailable`.
    pub fn set_history_offline(&self, offline: bool) {
        self.state().faults.history_offline = offline;
    }

    /// History responses arrive after `delay`. The page reflects the moment
    /// of the request.
    pub fn set_history_delay(&self, delay: Option<Duration>) {
        self.state().faults.history_delay = delay;
    }

    /// Every bus delivery happens twice.
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.state().faults.duplicate_delivery = duplicate;
    }

    /// Directory requests fail with `Unavailable`.
    pub fn set_directory_offline(&self, offline: bool) {
        self.state().faults.directory_offline = offline;
    }

    fn directory_check(&self) -> Result<MutexGuard<'_, ServerState>, ServiceError> {
        let state = self.state();
        if state.faults.directory_offline {
            return Err(ServiceError::Unavailable { reason: "directory offline".into() });
        }
        Ok(state)
    }
}

impl std::fmt::Debug for SimServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimServer")
            .field("users", &state.users.len())
            .field("messages", &state.messages.len())
            .finish_non_exhaustive()
    }
}

/// One authenticated user's view of the server.
struct UserHandle {
    user: String,
    server: SimServer,
}

#[async_trait]
impl KeyDirectory for UserHandle {
    async fn fetch_private_key(&self) -> Result<Option<String>, ServiceError> {
        Ok(self.server.directory_check()?.private_keys.get(&self.user).cloned())
    }

    async fn store_private_key(&self, envelope: String) -> Result<(), ServiceError> {
        self.server.directory_check()?.private_keys.insert(self.user.clone(), envelope);
        Ok(())
    }

    async fn fetch_public_key(&self, username: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.server.directory_check()?.public_keys.get(username).cloned())
    }

    async fn publish_public_key(&self, public_key: String) -> Result<(), ServiceError> {
        self.server.directory_check()?.public_keys.insert(self.user.clone(), public_key);
        Ok(())
    }
}

#[async_trait]
impl HistoryService for UserHandle {
    async fn fetch_messages(
        &self,
        peer: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> Result<HistoryPage, ServiceError> {
        // The page is computed now; anything stored during the delay is not
        // in it.
        let (delay, page) = {
            let state = self.server.state();
            (state.faults.history_delay, state.page(&self.user, peer, cursor, page_size))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        page
    }

    async fn mark_read(&self, peer: &str) -> Result<(), ServiceError> {
        let mut state = self.server.state();
        if state.faults.history_offline {
            return Err(ServiceError::Unavailable { reason: "history offline".into() });
        }
        state.read_marks.push((self.user.clone(), peer.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl RealtimeBus for UserHandle {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>, ServiceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.server.state().subscribers.entry(topic.to_owned()).or_default().push(tx);
        Ok(rx)
    }

    async fn publish(&self, destination: &str, payload: String) -> Result<(), ServiceError> {
        if destination != topics::SEND_PRIVATE_DESTINATION {
            return Err(ServiceError::Rejected { reason: format!("unknown destination {destination}") });
        }
        let request = MessageEnvelope::from_json(&payload)
            .map_err(|e| ServiceError::Rejected { reason: e.to_string() })?;

        let mut state = self.server.state();
        state.published.push((destination.to_owned(), payload));

        if !state.users.contains(&request.recipient) {
            tracing::debug!(sender = %self.user, recipient = %request.recipient, "rejecting send to unknown user");
            let rejection = SendRejection {
                message: Some("Recipient does not exist".into()),
                request,
            };
            let json = rejection.to_json().map_err(|e| ServiceError::Rejected { reason: e.to_string() })?;
            state.deliver(&topics::error_queue(&self.user), &json);
            return Ok(());
        }

        let mut stored = request;
        stored.id = Some(state.assign_id());
        stored.sender.clone_from(&self.user);
        stored.message_type = MessageType::PrivateChat;
        let json = stored.to_json().map_err(|e| ServiceError::Rejected { reason: e.to_string() })?;

        state.deliver(&topics::private_queue(&stored.recipient), &json);
        if stored.recipient != stored.sender {
            state.deliver(&topics::private_queue(&stored.sender), &json);
        }
        state.messages.push(stored);
        Ok(())
    }
}

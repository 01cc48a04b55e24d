//! The messenger: one signed-in user's messaging session.
//!
//! # Data Flow
//!
//! ```text
//!  unlock(pin) ──> KeyVault ──> keypair ──┬──> decrypt pending entries
//!                                         │
//!  open(peer) ──> directory: peer key ────┼──> Router::open ──> initial page
//!                                         │
//!  send(peer, text) ──> Conversation::prepare_send ──> bus.publish
//!                                         │
//!  bus: private queue ──> Router::dispatch ──> log ──> ViewEvent
//!  bus: error queue ───> mark send failed ──────────> ViewEvent
//! ```

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::Duration,
};

use secrecy::SecretString;
use tokio::sync::mpsc;
use veilchat_client::{
    Conversation, Dispatch, EntryKey, FetchKind, PageRequest, ReceiveOutcome, Router,
};
use veilchat_core::{
    ClientConfig, Collaborators, EnvRng, Environment, KeyVault, ServiceError, SetupIntent,
    VaultState,
};
use veilchat_crypto::{Keypair, PublicKey};
use veilchat_proto::{Cursor, HistoryPage, MessageEnvelope, SendRejection, codec, topics};

use crate::{ConversationView, MessengerError, ViewEvent};

/// Subscriptions to the user's realtime queues.
#[derive(Debug)]
pub struct Inbox {
    messages: mpsc::UnboundedReceiver<String>,
    errors: mpsc::UnboundedReceiver<String>,
}

/// A signed-in user's messaging session.
pub struct Messenger<E: Environment> {
    env: E,
    username: String,
    config: ClientConfig,
    services: Collaborators,
    vault: tokio::sync::Mutex<KeyVault<E>>,
    keys: RwLock<Option<Arc<Keypair>>>,
    router: Mutex<Router>,
    events: mpsc::UnboundedSender<ViewEvent>,
}

impl<E: Environment> Messenger<E> {
    /// Create a messenger for `username`, locked, with nothing open.
    ///
    /// Returns the receiver of view events.
    pub fn new(
        env: E,
        username: impl Into<String>,
        config: ClientConfig,
        services: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let username = username.into();
        let (events, rx) = mpsc::unbounded_channel();
        let vault = KeyVault::new(env.clone(), username.clone(), Arc::clone(&services.directory), &config);

        let messenger = Self {
            router: Mutex::new(Router::new(username.clone())),
            vault: tokio::sync::Mutex::new(vault),
            keys: RwLock::new(None),
            env,
            username,
            config,
            services,
            events,
        };
        (messenger, rx)
    }

    /// The signed-in user.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether the keypair is available.
    pub fn is_unlocked(&self) -> bool {
        self.keypair().is_some()
    }

    /// Vault state. Waits for an in-flight vault operation to finish.
    pub async fn vault_state(&self) -> VaultState {
        self.vault.lock().await.state()
    }

    /// Whether a stored key exists (unlock) or setup is needed.
    pub async fn has_stored_key(&self) -> Result<bool, MessengerError> {
        Ok(self.vault.lock().await.has_stored_key().await?)
    }

    /// Unlock the stored key, then decrypt everything that arrived while
    /// locked.
    ///
    /// A failed or cancelled unlock leaves the messenger locked, even if it
    /// was unlocked before.
    pub async fn unlock(&self, pin: &SecretString) -> Result<(), MessengerError> {
        let mut access = VaultAccess { messenger: self, vault: self.vault.lock().await };
        access.vault.unlock(pin).await?;
        Ok(())
    }

    /// First-time setup or confirmed reset. See [`KeyVault::generate_and_store`].
    pub async fn setup_keys(&self, pin: &SecretString, intent: SetupIntent) -> Result<(), MessengerError> {
        let mut access = VaultAccess { messenger: self, vault: self.vault.lock().await };
        access.vault.generate_and_store(pin, intent).await?;
        Ok(())
    }

    /// Lock the vault and drop every cached session key.
    ///
    /// Messages already decrypted stay readable; new ones wait for unlock.
    pub async fn lock(&self) {
        let mut access = VaultAccess { messenger: self, vault: self.vault.lock().await };
        access.vault.lock();
    }

    /// Open the conversation with `peer` and load its most recent page.
    ///
    /// Re-opening starts over with a fresh session and log. When the page is
    /// non-empty the conversation is marked read.
    pub async fn open_conversation(&self, peer: &str) -> Result<(), MessengerError> {
        let peer_key = self.fetch_peer_key(peer).await?;

        let (generation, request) = {
            let mut router = self.router();
            let conversation = router.open(peer, peer_key);
            (conversation.generation(), conversation.begin_initial())
        };
        self.emit(ViewEvent::ConversationOpened { peer: peer.to_owned() });

        if let Some(request) = request {
            self.load_page(peer, generation, request).await?;
        }
        Ok(())
    }

    /// Close the conversation with `peer`. In-flight fetches are discarded.
    pub fn close_conversation(&self, peer: &str) -> bool {
        self.router().close(peer)
    }

    /// Load the next older page. Returns the number of entries inserted; zero
    /// when already loading or exhausted.
    pub async fn fetch_older(&self, peer: &str) -> Result<usize, MessengerError> {
        let (generation, request) = {
            let mut router = self.router();
            let conversation = router.get_mut(peer)?;
            (conversation.generation(), conversation.begin_older())
        };
        let Some(request) = request else {
            return Ok(0);
        };
        self.load_page(peer, generation, request).await
    }

    /// Encrypt and send `text` to `peer`. Returns the local correlation id.
    ///
    /// The message appears in the log immediately. If publishing fails the
    /// entry is marked failed and the error returned.
    pub async fn send(&self, peer: &str, text: &str) -> Result<String, MessengerError> {
        let keypair = self.keypair().ok_or(MessengerError::Locked)?;
        let local_id = self.next_local_id();

        let envelope = {
            let mut router = self.router();
            let conversation = router.get_mut(peer)?;
            let mut rng = EnvRng::new(&self.env);
            conversation.prepare_send(&local_id, text, &keypair, &mut rng, self.env.wall_clock_millis())?
        };
        self.emit(ViewEvent::MessageAdded { peer: peer.to_owned(), key: EntryKey::pending(&local_id) });

        let payload = envelope.to_json()?;
        if let Err(e) = self.services.bus.publish(topics::SEND_PRIVATE_DESTINATION, payload).await {
            self.fail_send(peer, &local_id, &e.to_string());
            return Err(e.into());
        }
        Ok(local_id)
    }

    /// Subscribe to the user's message and error queues.
    pub async fn subscribe(&self) -> Result<Inbox, MessengerError> {
        let messages = self.services.bus.subscribe(&topics::private_queue(&self.username)).await?;
        let errors = self.services.bus.subscribe(&topics::error_queue(&self.username)).await?;
        Ok(Inbox { messages, errors })
    }

    /// Process realtime traffic until both queues close.
    pub async fn run(&self, mut inbox: Inbox) {
        tracing::info!(user = %self.username, "realtime loop started");
        loop {
            tokio::select! {
                Some(json) = inbox.messages.recv() => {
                    self.handle_inbound(&json);
                },
                Some(json) = inbox.errors.recv() => {
                    self.handle_error_frame(&json);
                },
                else => break,
            }
        }
        tracing::info!(user = %self.username, "realtime bus closed");
    }

    /// Process everything already queued in `inbox` without waiting.
    ///
    /// Returns the number of payloads handled.
    pub fn drain(&self, inbox: &mut Inbox) -> usize {
        let mut handled = 0;
        while let Ok(json) = inbox.messages.try_recv() {
            self.handle_inbound(&json);
            handled += 1;
        }
        while let Ok(json) = inbox.errors.try_recv() {
            self.handle_error_frame(&json);
            handled += 1;
        }
        handled
    }

    /// Route one JSON envelope from the private queue.
    pub fn handle_inbound(&self, json: &str) -> Dispatch {
        let envelope = match MessageEnvelope::from_json(json) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(user = %self.username, error = %e, "dropping malformed envelope");
                return Dispatch::Ignored;
            },
        };

        let keypair = self.keypair();
        let dispatch = self.router().dispatch(envelope, keypair.as_deref());

        match &dispatch {
            Dispatch::Delivered { peer, outcome } => match outcome {
                ReceiveOutcome::Added(key) => {
                    self.emit(ViewEvent::MessageAdded { peer: peer.clone(), key: key.clone() });
                },
                ReceiveOutcome::Updated(key) => {
                    self.emit(ViewEvent::MessageUpdated { peer: peer.clone(), key: key.clone() });
                },
                ReceiveOutcome::Duplicate | ReceiveOutcome::MissingId => {},
            },
            Dispatch::Unread { peer, count } => {
                self.emit(ViewEvent::UnreadChanged { peer: peer.clone(), count: *count });
            },
            Dispatch::Ignored => {},
        }
        dispatch
    }

    /// Handle one rejection from the error queue.
    pub fn handle_error_frame(&self, json: &str) {
        let rejection = match SendRejection::from_json(json) {
            Ok(rejection) => rejection,
            Err(e) => {
                tracing::warn!(user = %self.username, error = %e, "dropping malformed error frame");
                return;
            },
        };
        let Some(local_id) = rejection.request.local_id.as_deref() else {
            tracing::warn!(user = %self.username, "rejection without local id");
            return;
        };

        let reason = rejection.message.as_deref().unwrap_or("message rejected by server");
        self.fail_send(&rejection.request.recipient, local_id, reason);
    }

    /// Unread count of a closed conversation.
    pub fn unread_count(&self, peer: &str) -> u32 {
        self.router().unread_count(peer)
    }

    /// Snapshot of the open conversation with `peer`.
    pub fn conversation(&self, peer: &str) -> Option<ConversationView> {
        self.router().get(peer).map(ConversationView::of)
    }

    fn keypair(&self) -> Option<Arc<Keypair>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn router(&self) -> MutexGuard<'_, Router> {
        self.router.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ViewEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(user = %self.username, "view event dropped: receiver closed");
        }
    }

    /// Make the cached keypair match the vault's.
    fn sync_keys(&self, current: Option<Arc<Keypair>>) {
        match (self.keypair(), current) {
            (previous, Some(current))
                if previous.as_ref().is_none_or(|previous| !Arc::ptr_eq(previous, &current)) =>
            {
                self.install_keys(&current);
            },
            (Some(_), None) => self.drop_keys(),
            _ => {},
        }
    }

    fn drop_keys(&self) {
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.router().lock_all();
        self.emit(ViewEvent::VaultLocked);
    }

    fn install_keys(&self, keypair: &Arc<Keypair>) {
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(keypair));
        self.emit(ViewEvent::VaultUnlocked);

        let resolved = self.router().decrypt_pending(keypair);
        for (peer, keys) in resolved {
            for key in keys {
                self.emit(ViewEvent::MessageUpdated { peer: peer.clone(), key });
            }
        }
    }

    fn fail_send(&self, peer: &str, local_id: &str, reason: &str) {
        if self.router().mark_failed(peer, local_id, reason) {
            self.emit(ViewEvent::SendFailed {
                peer: peer.to_owned(),
                local_id: local_id.to_owned(),
                reason: reason.to_owned(),
            });
        }
    }

    fn next_local_id(&self) -> String {
        let mut bytes = [0u8; 16];
        self.env.random_bytes(&mut bytes);
        format!("local-{}", uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    async fn fetch_peer_key(&self, peer: &str) -> Result<PublicKey, MessengerError> {
        let unavailable = || MessengerError::PeerKeyUnavailable { peer: peer.to_owned() };

        let b64 = self.services.directory.fetch_public_key(peer).await?.ok_or_else(unavailable)?;
        let der = codec::decode("publicKey", &b64)?;
        PublicKey::from_spki_der(&der).map_err(|e| {
            tracing::warn!(%peer, error = %e, "directory returned an unusable public key");
            unavailable()
        })
    }

    /// Fetch one page and merge it. Returns the number of entries inserted.
    async fn load_page(&self, peer: &str, generation: u64, request: PageRequest) -> Result<usize, MessengerError> {
        let guard = FetchGuard { messenger: self, peer, generation, armed: true };

        let page = match self.fetch_with_timeout(peer, request.cursor.as_ref()).await {
            Ok(page) => page,
            Err(e) => {
                drop(guard);
                tracing::warn!(%peer, error = %e, "history fetch failed");
                self.emit(ViewEvent::FetchFailed { peer: peer.to_owned(), reason: e.to_string() });
                return Err(e.into());
            },
        };
        guard.disarm();

        let record_count = page.records.len();
        let keypair = self.keypair();
        let (inserted, event) = {
            let mut router = self.router();
            let Some(conversation) = router.get_current(peer, generation) else {
                tracing::debug!(%peer, generation, "discarding page for a closed conversation");
                return Ok(0);
            };
            merge_page(conversation, request.kind, page, keypair.as_deref())
        };
        self.emit(event);

        if request.kind == FetchKind::Initial
            && record_count > 0
            && let Err(e) = self.services.history.mark_read(peer).await
        {
            tracing::warn!(%peer, error = %e, "mark as read failed");
        }
        Ok(inserted)
    }

    async fn fetch_with_timeout(&self, peer: &str, cursor: Option<&Cursor>) -> Result<HistoryPage, ServiceError> {
        let timeout: Duration = self.config.fetch_timeout();
        tokio::select! {
            result = self.services.history.fetch_messages(peer, cursor, self.config.page_size) => result,
            () = self.env.sleep(timeout) => Err(ServiceError::Timeout { elapsed: timeout }),
        }
    }
}

fn merge_page(
    conversation: &mut Conversation,
    kind: FetchKind,
    page: HistoryPage,
    keypair: Option<&Keypair>,
) -> (usize, ViewEvent) {
    let peer = conversation.peer().to_owned();
    match kind {
        FetchKind::Initial => {
            let inserted = conversation.apply_initial(page, keypair).len();
            let count = conversation.log().len();
            let jump_to_newest = conversation.take_jump_to_newest();
            (inserted, ViewEvent::InitialPageLoaded { peer, count, jump_to_newest })
        },
        FetchKind::Older => {
            let inserted = conversation.apply_older(page, keypair).len();
            (inserted, ViewEvent::OlderPageLoaded { peer, inserted })
        },
    }
}

/// Exclusive vault access. On drop, however the operation ended, the
/// messenger's keypair is synced with the vault's.
struct VaultAccess<'a, E: Environment> {
    messenger: &'a Messenger<E>,
    vault: tokio::sync::MutexGuard<'a, KeyVault<E>>,
}

impl<E: Environment> Drop for VaultAccess<'_, E> {
    fn drop(&mut self) {
        self.messenger.sync_keys(self.vault.keypair());
    }
}

/// Clears the pager's loading flag if a fetch fails or its future is
/// dropped.
struct FetchGuard<'a, E: Environment> {
    messenger: &'a Messenger<E>,
    peer: &'a str,
    generation: u64,
    armed: bool,
}

impl<E: Environment> FetchGuard<'_, E> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<E: Environment> Drop for FetchGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed
            && let Some(conversation) = self.messenger.router().get_current(self.peer, self.generation)
        {
            conversation.abandon_fetch();
        }
    }
}

impl<E: Environment> std::fmt::Debug for Messenger<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("username", &self.username)
            .field("unlocked", &self.is_unlocked())
            .finish_non_exhaustive()
    }
}

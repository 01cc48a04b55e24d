//! Key vault: PIN-guarded ownership of the user's long-term keypair.
//!
//! # State Machine
//!
//! ```text
//!            unlock(pin)                  ok
//! ┌────────┐──────────────>┌───────────┐────────>┌──────────┐
//! │ Locked │               │ Unlocking │         │ Unlocked │
//! └────────┘<──────────────└───────────┘         └──────────┘
//!   ^  │      error/cancel                          ^    │
//!   │  │ generate_and_store(pin)  ┌───────────┐ ok  │    │ lock()
//!   │  └─────────────────────────>│ Resetting │─────┘    │
//!   │          error/cancel       └───────────┘          │
//!   └────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - While `Locked`, no plaintext private key exists in the vault. Transient
//!   key material is zeroized before an operation returns.
//! - An operation that fails or is cancelled mid-flight leaves the vault
//!   `Locked`, never half-updated.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use veilchat_crypto::{Keypair, PrivateKey, PublicKey, decrypt, derive_key, encrypt, generate_salt};
use veilchat_proto::{PrivateKeyEnvelope, codec};
use zeroize::Zeroizing;

use crate::{ClientConfig, EnvRng, Environment, KeyDirectory, VaultError};

/// Externally visible vault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// No keypair in memory
    Locked,
    /// Decrypting the stored envelope
    Unlocking,
    /// Generating and storing a fresh keypair
    Resetting,
    /// Keypair available
    Unlocked,
}

/// Whether `generate_and_store` may overwrite an existing key.
///
/// Replacing the key makes every message wrapped for the old key permanently
/// unreadable, so overwriting requires an explicit, confirmed choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupIntent {
    /// Initial setup; refuses to replace an existing envelope
    FirstTime,
    /// The user confirmed a destructive reset
    ConfirmedReset,
}

enum Slot {
    Locked,
    Unlocking,
    Resetting,
    Unlocked(Arc<Keypair>),
}

/// Holds the slot in a transient state until `commit`.
///
/// Dropping without commit (error return or cancelled future) relocks.
struct Transition<'a> {
    slot: &'a mut Slot,
    committed: bool,
}

impl<'a> Transition<'a> {
    fn begin(slot: &'a mut Slot, pending: Slot) -> Self {
        *slot = pending;
        Self { slot, committed: false }
    }

    fn commit(mut self, keypair: Arc<Keypair>) {
        *self.slot = Slot::Unlocked(keypair);
        self.committed = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.slot = Slot::Locked;
        }
    }
}

/// The user's key vault.
pub struct KeyVault<E: Environment> {
    env: E,
    username: String,
    directory: Arc<dyn KeyDirectory>,
    min_pin_len: usize,
    max_pin_len: usize,
    slot: Slot,
}

impl<E: Environment> KeyVault<E> {
    /// Create a locked vault for `username`.
    pub fn new(
        env: E,
        username: impl Into<String>,
        directory: Arc<dyn KeyDirectory>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            env,
            username: username.into(),
            directory,
            min_pin_len: config.min_pin_len,
            max_pin_len: config.max_pin_len,
            slot: Slot::Locked,
        }
    }

    /// Owner of the vault.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Current state.
    pub fn state(&self) -> VaultState {
        match self.slot {
            Slot::Locked => VaultState::Locked,
            Slot::Unlocking => VaultState::Unlocking,
            Slot::Resetting => VaultState::Resetting,
            Slot::Unlocked(_) => VaultState::Unlocked,
        }
    }

    /// The keypair, if unlocked.
    pub fn keypair(&self) -> Option<Arc<Keypair>> {
        match &self.slot {
            Slot::Unlocked(keypair) => Some(Arc::clone(keypair)),
            Slot::Locked | Slot::Unlocking | Slot::Resetting => None,
        }
    }

    /// Whether a private-key envelope exists, i.e. unlock rather than setup.
    pub async fn has_stored_key(&self) -> Result<bool, VaultError> {
        Ok(self.directory.fetch_private_key().await?.is_some())
    }

    /// Unlock the stored private key with `pin`.
    ///
    /// # Errors
    ///
    /// - `PinPolicy`: PIN length out of bounds (checked before any crypto)
    /// - `NoStoredKey`: nothing to unlock
    /// - `EnvelopeCorrupt`: the stored string is not a valid envelope
    /// - `InvalidPinOrCorruptKey`: wrong PIN or tampered ciphertext
    /// - `Service`: the directory failed
    pub async fn unlock(&mut self, pin: &SecretString) -> Result<Arc<Keypair>, VaultError> {
        self.check_pin(pin)?;

        let started = self.env.now();
        let transition = Transition::begin(&mut self.slot, Slot::Unlocking);
        tracing::info!(user = %self.username, "vault unlocking");

        let Some(stored) = self.directory.fetch_private_key().await? else {
            return Err(VaultError::NoStoredKey);
        };

        let envelope = PrivateKeyEnvelope::parse(&stored).map_err(|e| {
            tracing::warn!(user = %self.username, "stored key envelope is malformed");
            VaultError::EnvelopeCorrupt { reason: e.to_string() }
        })?;

        let private = open_envelope(&envelope, pin).inspect_err(|_| {
            tracing::warn!(user = %self.username, "unlock failed: incorrect PIN or corrupted key");
        })?;
        let keypair = Keypair::from_private(private);

        check_directory_key(self.directory.as_ref(), &self.username, &keypair.public).await;

        let keypair = Arc::new(keypair);
        transition.commit(Arc::clone(&keypair));

        let elapsed = self.env.now() - started;
        tracing::info!(user = %self.username, elapsed_ms = elapsed.as_millis() as u64, "vault unlocked");
        Ok(keypair)
    }

    /// Generate a fresh keypair, store it under `pin`, publish its public key
    /// and unlock with it.
    ///
    /// With [`SetupIntent::ConfirmedReset`] this replaces any existing key:
    /// all history wrapped for the old key becomes permanently unreadable.
    ///
    /// # Errors
    ///
    /// - `PinPolicy`: PIN length out of bounds
    /// - `ResetNotConfirmed`: `FirstTime` but an envelope already exists; the
    ///   vault is left as it was
    /// - `Service`: the directory failed; once key generation has started the
    ///   vault ends up locked
    pub async fn generate_and_store(
        &mut self,
        pin: &SecretString,
        intent: SetupIntent,
    ) -> Result<Arc<Keypair>, VaultError> {
        self.check_pin(pin)?;
        if intent == SetupIntent::FirstTime && self.directory.fetch_private_key().await?.is_some() {
            return Err(VaultError::ResetNotConfirmed);
        }

        let transition = Transition::begin(&mut self.slot, Slot::Resetting);
        tracing::info!(user = %self.username, ?intent, "vault generating new keypair");

        let (keypair, envelope) = {
            let mut rng = EnvRng::new(&self.env);
            let keypair = Keypair::generate(&mut rng);

            let salt = generate_salt(&mut rng);
            let wrapping = derive_key(pin.expose_secret(), &salt)?;
            let der = keypair.private.to_pkcs8_der()?;
            let sealed = encrypt(&der, &wrapping, &mut rng);

            let envelope = PrivateKeyEnvelope {
                salt: salt.to_vec(),
                iv: sealed.nonce.to_vec(),
                ciphertext: sealed.ciphertext,
            };
            (keypair, envelope)
        };

        let spki = keypair.public.to_spki_der()?;
        self.directory.publish_public_key(codec::encode(&spki)).await?;
        self.directory.store_private_key(envelope.encode()).await?;

        let keypair = Arc::new(keypair);
        transition.commit(Arc::clone(&keypair));

        tracing::info!(user = %self.username, "vault unlocked with new keypair");
        Ok(keypair)
    }

    /// Drop the keypair and return to `Locked`. Never fails.
    pub fn lock(&mut self) {
        self.slot = Slot::Locked;
        tracing::info!(user = %self.username, "vault locked");
    }

    fn check_pin(&self, pin: &SecretString) -> Result<(), VaultError> {
        let len = pin.expose_secret().chars().count();
        if len < self.min_pin_len || len > self.max_pin_len {
            return Err(VaultError::PinPolicy { min: self.min_pin_len, max: self.max_pin_len });
        }
        Ok(())
    }
}

/// Compare the directory's public key with the one derived from the private
/// key. The derived key wins; a mismatch is only reported.
async fn check_directory_key(directory: &dyn KeyDirectory, username: &str, derived: &PublicKey) {
    let published = match directory.fetch_public_key(username).await {
        Ok(published) => published,
        Err(e) => {
            tracing::warn!(user = %username, error = %e, "could not fetch own public key");
            return;
        },
    };

    let matches = published
        .as_deref()
        .and_then(|b64| codec::decode("publicKey", b64).ok())
        .and_then(|der| PublicKey::from_spki_der(&der).ok())
        .is_some_and(|key| &key == derived);

    if !matches {
        tracing::warn!(user = %username, "directory public key does not match private key");
    }
}

/// Decrypt the private key inside `envelope`.
///
/// Every failure after parsing maps to the same generic error so the caller
/// cannot tell a wrong PIN from a tampered ciphertext.
fn open_envelope(envelope: &PrivateKeyEnvelope, pin: &SecretString) -> Result<PrivateKey, VaultError> {
    let wrapping = derive_key(pin.expose_secret(), &envelope.salt)
        .map_err(|e| VaultError::EnvelopeCorrupt { reason: e.to_string() })?;

    let der = decrypt(&envelope.ciphertext, &envelope.iv, &wrapping)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::InvalidPinOrCorruptKey)?;

    PrivateKey::from_pkcs8_der(&der).map_err(|_| VaultError::InvalidPinOrCorruptKey)
}

impl<E: Environment> std::fmt::Debug for KeyVault<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("username", &self.username)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

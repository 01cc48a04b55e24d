//! Key vault lifecycle tests against the simulated directory.
//!
//! These tests verify:
//! - Setup stores a 3-segment envelope and publishes the public key
//! - Unlock failures are generic and leave the vault locked
//! - Destructive reset needs explicit confirmation
//! - Abandoned operations leave the vault locked

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use secrecy::SecretString;
use veilchat_core::{
    ClientConfig, KeyDirectory, KeyVault, ServiceError, SetupIntent, VaultError, VaultState,
};
use veilchat_crypto::PublicKey;
use veilchat_harness::{
    SimEnv, SimServer,
    fixtures::{alice_keypair, bob_keypair},
};
use veilchat_proto::{PrivateKeyEnvelope, codec};

fn pin(text: &str) -> SecretString {
    SecretString::from(text.to_owned())
}

fn vault_for(server: &SimServer, user: &str) -> KeyVault<SimEnv> {
    let collaborators = server.connect(user);
    KeyVault::new(SimEnv::with_seed(1), user, collaborators.directory, &ClientConfig::default())
}

fn published_key(server: &SimServer, user: &str) -> PublicKey {
    let b64 = server.public_key(user).unwrap();
    PublicKey::from_spki_der(&codec::decode("publicKey", &b64).unwrap()).unwrap()
}

#[tokio::test]
async fn first_time_setup_stores_envelope_and_publishes_key() {
    let server = SimServer::new();
    let mut vault = vault_for(&server, "alice");
    assert!(!vault.has_stored_key().await.unwrap());

    let keypair = vault.generate_and_store(&pin("1234"), SetupIntent::FirstTime).await.unwrap();

    assert_eq!(vault.state(), VaultState::Unlocked);
    let stored = server.private_key("alice").unwrap();
    assert_eq!(stored.split('.').count(), 3);
    assert!(PrivateKeyEnvelope::parse(&stored).is_ok());
    assert_eq!(published_key(&server, "alice"), keypair.public);
    assert!(vault.has_stored_key().await.unwrap());
}

#[tokio::test]
async fn setup_then_unlock_recovers_same_keypair() {
    let server = SimServer::new();
    let mut vault = vault_for(&server, "alice");
    let created = vault.generate_and_store(&pin("2468"), SetupIntent::FirstTime).await.unwrap();
    vault.lock();

    let unlocked = vault.unlock(&pin("2468")).await.unwrap();

    assert_eq!(unlocked.public, created.public);
    assert_eq!(vault.state(), VaultState::Unlocked);
}

#[tokio::test]
async fn wrong_pin_is_generic_and_stays_locked() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let mut vault = vault_for(&server, "alice");

    let err = vault.unlock(&pin("wrong-pin")).await.unwrap_err();

    assert_eq!(err, VaultError::InvalidPinOrCorruptKey);
    assert_eq!(err.to_string(), "incorrect PIN or corrupted key");
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(vault.keypair().is_none());
}

#[tokio::test]
async fn correct_pin_unlocks_provisioned_key() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let mut vault = vault_for(&server, "alice");

    let keypair = vault.unlock(&pin("1234")).await.unwrap();

    assert_eq!(keypair.public, alice_keypair().public);
    assert!(vault.keypair().is_some());
}

#[tokio::test]
async fn tampered_ciphertext_is_generic_error() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let mut envelope = PrivateKeyEnvelope::parse(&server.private_key("alice").unwrap()).unwrap();
    envelope.ciphertext[10] ^= 0x01;
    server.set_private_key("alice", &envelope.encode());
    let mut vault = vault_for(&server, "alice");

    assert_eq!(vault.unlock(&pin("1234")).await.unwrap_err(), VaultError::InvalidPinOrCorruptKey);
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test]
async fn unlock_without_stored_key() {
    let server = SimServer::new();
    let mut vault = vault_for(&server, "alice");

    assert_eq!(vault.unlock(&pin("1234")).await.unwrap_err(), VaultError::NoStoredKey);
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test]
async fn legacy_two_segment_envelope_needs_reset() {
    let server = SimServer::new();
    server.set_private_key("alice", "aXY=.Y2lwaGVy");
    let mut vault = vault_for(&server, "alice");

    let err = vault.unlock(&pin("1234")).await.unwrap_err();

    assert!(matches!(err, VaultError::EnvelopeCorrupt { .. }));
    assert!(!err.is_retryable());
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test]
async fn pin_policy_is_checked_before_any_io() {
    let server = SimServer::new();
    server.set_directory_offline(true);
    let mut vault = vault_for(&server, "alice");

    let short = vault.unlock(&pin("12")).await.unwrap_err();
    let long = vault.generate_and_store(&pin(&"9".repeat(21)), SetupIntent::FirstTime).await.unwrap_err();

    assert_eq!(short, VaultError::PinPolicy { min: 4, max: 20 });
    assert_eq!(long, VaultError::PinPolicy { min: 4, max: 20 });
}

#[tokio::test]
async fn first_time_setup_refuses_to_overwrite() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let before = server.private_key("alice");
    let mut vault = vault_for(&server, "alice");

    let err = vault.generate_and_store(&pin("5678"), SetupIntent::FirstTime).await.unwrap_err();

    assert_eq!(err, VaultError::ResetNotConfirmed);
    assert_eq!(server.private_key("alice"), before);
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test]
async fn refused_setup_leaves_unlocked_vault_untouched() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let mut vault = vault_for(&server, "alice");
    vault.unlock(&pin("1234")).await.unwrap();

    let err = vault.generate_and_store(&pin("5678"), SetupIntent::FirstTime).await.unwrap_err();

    assert_eq!(err, VaultError::ResetNotConfirmed);
    assert_eq!(vault.state(), VaultState::Unlocked);
    assert_eq!(vault.keypair().unwrap().public, alice_keypair().public);
}

#[tokio::test]
async fn failed_unlock_relocks_unlocked_vault() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let mut vault = vault_for(&server, "alice");
    vault.unlock(&pin("1234")).await.unwrap();

    let err = vault.unlock(&pin("9999")).await.unwrap_err();

    assert_eq!(err, VaultError::InvalidPinOrCorruptKey);
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(vault.keypair().is_none());
}

#[tokio::test]
async fn confirmed_reset_replaces_key() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let mut vault = vault_for(&server, "alice");

    let fresh = vault.generate_and_store(&pin("5678"), SetupIntent::ConfirmedReset).await.unwrap();
    vault.lock();

    assert_ne!(fresh.public, alice_keypair().public);
    assert_eq!(published_key(&server, "alice"), fresh.public);
    assert_eq!(vault.unlock(&pin("1234")).await.unwrap_err(), VaultError::InvalidPinOrCorruptKey);
    assert_eq!(vault.unlock(&pin("5678")).await.unwrap().public, fresh.public);
}

#[tokio::test]
async fn directory_failure_during_setup_stays_locked() {
    let server = SimServer::new();
    let mut vault = vault_for(&server, "alice");
    server.set_directory_offline(true);

    let err = vault.generate_and_store(&pin("1234"), SetupIntent::FirstTime).await.unwrap_err();

    assert!(matches!(err, VaultError::Service(ServiceError::Unavailable { .. })));
    assert!(err.is_retryable());
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test]
async fn mismatched_directory_key_still_unlocks() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let spki = bob_keypair().public.to_spki_der().unwrap();
    server.connect("alice").directory.publish_public_key(codec::encode(&spki)).await.unwrap();
    let mut vault = vault_for(&server, "alice");

    let keypair = vault.unlock(&pin("1234")).await.unwrap();

    assert_eq!(keypair.public, alice_keypair().public);
}

#[tokio::test]
async fn lock_drops_keypair() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let mut vault = vault_for(&server, "alice");
    vault.unlock(&pin("1234")).await.unwrap();

    vault.lock();

    assert_eq!(vault.state(), VaultState::Locked);
    assert!(vault.keypair().is_none());
}

/// Directory that answers only after a long delay.
struct SlowDirectory {
    inner: Arc<dyn KeyDirectory>,
    delay: Duration,
}

#[async_trait]
impl KeyDirectory for SlowDirectory {
    async fn fetch_private_key(&self) -> Result<Option<String>, ServiceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_private_key().await
    }

    async fn store_private_key(&self, envelope: String) -> Result<(), ServiceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.store_private_key(envelope).await
    }

    async fn fetch_public_key(&self, username: &str) -> Result<Option<String>, ServiceError> {
        self.inner.fetch_public_key(username).await
    }

    async fn publish_public_key(&self, public_key: String) -> Result<(), ServiceError> {
        self.inner.publish_public_key(public_key).await
    }
}

#[tokio::test(start_paused = true)]
async fn abandoned_operations_leave_vault_locked() {
    let server = SimServer::new();
    server.provision_user("alice", "1234", alice_keypair());
    let directory = Arc::new(SlowDirectory {
        inner: server.connect("alice").directory,
        delay: Duration::from_secs(60),
    });
    let mut vault = KeyVault::new(SimEnv::with_seed(2), "alice", directory, &ClientConfig::default());

    let unlock = tokio::time::timeout(Duration::from_secs(1), vault.unlock(&pin("1234"))).await;
    assert!(unlock.is_err(), "unlock should still be waiting on the directory");
    assert_eq!(vault.state(), VaultState::Locked);

    let reset = tokio::time::timeout(
        Duration::from_secs(1),
        vault.generate_and_store(&pin("5678"), SetupIntent::ConfirmedReset),
    )
    .await;
    assert!(reset.is_err());
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(vault.keypair().is_none());
}

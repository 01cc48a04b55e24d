//! Contracts of the external collaborators.
//!
//! The messaging core never talks to the network directly. It consumes three
//! services, all scoped to the authenticated local user:
//!
//! - [`KeyDirectory`]: private-key envelope storage and public-key lookup
//! - [`HistoryService`]: cursor-paged message history
//! - [`RealtimeBus`]: at-least-once publish/subscribe of JSON envelopes
//!
//! Implementations must be `Send + Sync` and cheap to share behind `Arc`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use veilchat_proto::{Cursor, HistoryPage};

use crate::ServiceError;

/// Key and directory service.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// The local user's stored private-key envelope, if any.
    async fn fetch_private_key(&self) -> Result<Option<String>, ServiceError>;

    /// Replace the local user's private-key envelope.
    async fn store_private_key(&self, envelope: String) -> Result<(), ServiceError>;

    /// Base64 SPKI public key of `username`, if published.
    async fn fetch_public_key(&self, username: &str) -> Result<Option<String>, ServiceError>;

    /// Publish the local user's base64 SPKI public key.
    async fn publish_public_key(&self, public_key: String) -> Result<(), ServiceError>;
}

/// Message history service.
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// One page of the conversation with `peer`, newest record first.
    ///
    /// `cursor` is `None` for the most recent page. Pure read; safe to retry.
    async fn fetch_messages(
        &self,
        peer: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> Result<HistoryPage, ServiceError>;

    /// Mark every message from `peer` as read.
    async fn mark_read(&self, peer: &str) -> Result<(), ServiceError>;
}

/// Realtime publish/subscribe bus.
///
/// Delivery is at-least-once with no ordering across topics. Payloads are
/// JSON text.
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    /// Subscribe to `topic`. The receiver closes when the bus disconnects.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>, ServiceError>;

    /// Publish `payload` to `destination`.
    async fn publish(&self, destination: &str, payload: String) -> Result<(), ServiceError>;
}

/// The collaborators a client session is wired to.
#[derive(Clone)]
pub struct Collaborators {
    /// Key and directory service
    pub directory: Arc<dyn KeyDirectory>,
    /// History service
    pub history: Arc<dyn HistoryService>,
    /// Realtime bus
    pub bus: Arc<dyn RealtimeBus>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

//! Single-slot waiter for the peer's public key.
//!
//! Pairing registers the waiter before subscribing to notifications so a
//! key pushed immediately on subscribe is not lost. The notification
//! listener resolves it; keys arriving with no waiter registered are
//! ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, oneshot};
use tracing::debug;

use crate::error::KeyExchangeError;

/// Shared slot holding at most one pending peer-key receiver.
#[derive(Debug, Clone, Default)]
pub struct PeerKeyWaiter {
    slot: Arc<RwLock<Option<oneshot::Sender<String>>>>,
}

/// A registered wait. Dropping it without waiting leaves the slot to be
/// cleared by the next `cancel` or `resolve`.
#[derive(Debug)]
pub struct PendingPeerKey {
    rx: oneshot::Receiver<String>,
    waiter: PeerKeyWaiter,
}

impl PeerKeyWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot. Fails if another wait is still live.
    pub async fn register(&self) -> Result<PendingPeerKey, KeyExchangeError> {
        let mut slot = self.slot.write().await;
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(KeyExchangeError::AlreadyWaiting);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(tx);
        Ok(PendingPeerKey {
            rx,
            waiter: self.clone(),
        })
    }

    /// Deliver a key to the registered waiter.
    ///
    /// Returns false when nobody is waiting; the key is dropped.
    pub async fn resolve(&self, peer_public_key: String) -> bool {
        let Some(tx) = self.slot.write().await.take() else {
            debug!("Peer key arrived with no waiter registered, ignoring");
            return false;
        };
        tx.send(peer_public_key).is_ok()
    }

    /// Drop any registered waiter, failing its wait with `Closed`.
    pub async fn cancel(&self) -> bool {
        self.slot.write().await.take().is_some()
    }

    pub async fn is_waiting(&self) -> bool {
        self.slot
            .read()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Register and wait in one step.
    pub async fn await_peer_key(&self, timeout: Duration) -> Result<String, KeyExchangeError> {
        self.register().await?.wait(timeout).await
    }
}

impl PendingPeerKey {
    /// Wait for the key. On timeout the slot is cleared so a late key is
    /// ignored rather than delivered to a dead receiver.
    pub async fn wait(self, timeout: Duration) -> Result<String, KeyExchangeError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(key)) => Ok(key),
            Ok(Err(_)) => Err(KeyExchangeError::Closed),
            Err(_) => {
                self.waiter.cancel().await;
                Err(KeyExchangeError::Timeout(timeout))
            }
        }
    }
}

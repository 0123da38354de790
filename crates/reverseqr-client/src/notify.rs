//! Relay notification channel.
//!
//! A push channel from the relay carrying "peer key available" and
//! "message available" events. `NotificationListener` keeps one open for
//! the lifetime of a session, reconnecting after a fixed delay when it
//! drops, and stops as soon as the session is torn down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use reverseqr_core::config::SignalingConfig;

use crate::error::SignalingError;
use crate::relay::SessionHandle;
use crate::waiter::PeerKeyWaiter;

/// Buffered notifications per open channel.
const CHANNEL_CAPACITY: usize = 32;

/// An event pushed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notification {
    /// The peer registered its public key.
    #[serde(alias = "receiver-key-available", alias = "sender-key-available")]
    PeerKeyAvailable {
        #[serde(
            rename = "peerPublicKey",
            alias = "initiatorPublicKey",
            alias = "responderPublicKey"
        )]
        peer_public_key: String,
    },
    /// Both keys are registered; sent on subscribe when the peer was first.
    KeysAvailable {
        #[serde(
            rename = "peerPublicKey",
            alias = "initiatorPublicKey",
            alias = "responderPublicKey"
        )]
        peer_public_key: String,
    },
    /// The peer submitted a new message.
    MessageAvailable,
}

impl Notification {
    /// Parse a text frame. Unknown event types yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(n) => Some(n),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognised notification");
                None
            }
        }
    }

    pub fn peer_public_key(&self) -> Option<&str> {
        match self {
            Self::PeerKeyAvailable { peer_public_key } | Self::KeysAvailable { peer_public_key } => {
                Some(peer_public_key)
            }
            Self::MessageAvailable => None,
        }
    }
}

/// Subscribe frame sent right after the channel opens.
#[derive(Debug, Serialize)]
struct SubscribeFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'a str,
    role: &'static str,
    token: &'a str,
}

impl<'a> SubscribeFrame<'a> {
    fn new(session: &'a SessionHandle) -> Self {
        Self {
            kind: "subscribe",
            code: session.code.as_str(),
            role: session.role.as_wire(),
            token: &session.token,
        }
    }
}

/// Opens subscribed notification channels.
///
/// The returned receiver yields events until the channel drops; `None`
/// from it means the connection is gone.
#[async_trait]
pub trait NotificationTransport: Send + Sync + 'static {
    async fn open(
        &self,
        session: &SessionHandle,
    ) -> Result<mpsc::Receiver<Notification>, SignalingError>;
}

/// Notification channel over a WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl NotificationTransport for WebSocketTransport {
    async fn open(
        &self,
        session: &SessionHandle,
    ) -> Result<mpsc::Receiver<Notification>, SignalingError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SignalingError::Connection(e.to_string()))?;

        let frame = serde_json::to_string(&SubscribeFrame::new(session))
            .map_err(|e| SignalingError::Subscribe(e.to_string()))?;
        ws.send(Message::Text(frame.into()))
            .await
            .map_err(|e| SignalingError::Connection(e.to_string()))?;
        debug!(code = %session.code, role = %session.role, "Subscribed to notifications");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                // The listener drops its receiver on shutdown.
                let frame = tokio::select! {
                    frame = ws.next() => frame,
                    () = tx.closed() => {
                        if let Err(e) = ws.close(None).await {
                            debug!(error = %e, "Notification socket close failed");
                        }
                        break;
                    }
                };
                let Some(frame) = frame else { break };
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "Notification socket error");
                        break;
                    }
                };
                if let Some(notification) = Notification::parse(text.as_str()) {
                    if tx.send(notification).await.is_err() {
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Fixed-delay reconnection policy for the notification channel.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Maximum number of reconnect attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

impl From<&SignalingConfig> for ReconnectPolicy {
    fn from(config: &SignalingConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt should be made.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Events the listener surfaces to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    MessageAvailable,
    /// The channel dropped; a reconnect is scheduled.
    Reconnecting { attempt: u32 },
    /// Reconnect attempts are exhausted.
    ChannelLost,
}

/// Background task that owns the notification channel for one session.
///
/// Dropping the listener stops it.
#[derive(Debug)]
pub struct NotificationListener {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl NotificationListener {
    pub fn spawn<N: NotificationTransport + ?Sized>(
        transport: Arc<N>,
        session: SessionHandle,
        waiter: PeerKeyWaiter,
        events: mpsc::Sender<SessionEvent>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = ListenerTask {
            transport,
            session,
            waiter,
            events,
            policy,
        };
        let handle = tokio::spawn(task.run(shutdown_rx));
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the listener and wait for the task to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Notification listener task failed");
            }
        }
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

struct ListenerTask<N: ?Sized> {
    transport: Arc<N>,
    session: SessionHandle,
    waiter: PeerKeyWaiter,
    events: mpsc::Sender<SessionEvent>,
    policy: ReconnectPolicy,
}

impl<N: NotificationTransport + ?Sized> ListenerTask<N> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!(code = %self.session.code, "Notification listener shutting down");
                return;
            }

            let result = tokio::select! {
                r = self.transport.open(&self.session) => r,
                _ = shutdown.changed() => return,
            };

            match result {
                Ok(rx) => {
                    info!(code = %self.session.code, role = %self.session.role, "Notification channel open");
                    attempt = 0;
                    if self.pump(rx, &mut shutdown).await {
                        return;
                    }
                    warn!(code = %self.session.code, "Notification channel dropped");
                }
                Err(e) => {
                    warn!(code = %self.session.code, error = %e, "Notification channel failed to open");
                }
            }

            if !self.policy.should_retry(attempt) {
                error!(code = %self.session.code, attempt, "Max reconnect attempts reached");
                let _ = self.events.send(SessionEvent::ChannelLost).await;
                return;
            }
            attempt = attempt.saturating_add(1);
            let _ = self.events.try_send(SessionEvent::Reconnecting { attempt });
            debug!(attempt, delay_ms = self.policy.delay.as_millis(), "Reconnecting");

            tokio::select! {
                () = sleep(self.policy.delay) => {}
                _ = shutdown.changed() => {
                    info!("Notification listener shutting down during reconnect wait");
                    return;
                }
            }
        }
    }

    /// Drain one open channel. Returns true when shutdown was requested.
    async fn pump(
        &self,
        mut rx: mpsc::Receiver<Notification>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let notification = tokio::select! {
                n = rx.recv() => n,
                _ = shutdown.changed() => return true,
            };
            let Some(notification) = notification else {
                return *shutdown.borrow();
            };

            match notification {
                Notification::PeerKeyAvailable { peer_public_key }
                | Notification::KeysAvailable { peer_public_key } => {
                    if self.waiter.resolve(peer_public_key).await {
                        debug!(code = %self.session.code, "Peer key delivered");
                    }
                }
                Notification::MessageAvailable => {
                    if self.events.send(SessionEvent::MessageAvailable).await.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

//! Session signaling.
//!
//! `SessionContext` is the caller-owned state of one pairing attempt:
//! code, role, token, signaling state and, once established, the session
//! key. `SignalingClient` drives it through
//! `Idle -> Joined -> KeyExchangeInFlight -> Established -> Closed`, with
//! `Failed` reachable from every non-terminal state.
//!
//! A session key exists on the context only while it is `Established`.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use reverseqr_core::config::SignalingConfig;
use reverseqr_core::{ConnectionCode, PhraseWordlist};
use reverseqr_crypto::{EstablishedKeys, KeyExchangeState, SessionKey};

use crate::error::{ClientError, KeyExchangeError};
use crate::notify::{NotificationListener, NotificationTransport, ReconnectPolicy, SessionEvent};
use crate::receive::{self, ReceiveLog, ReceivedMessageRecord};
use crate::relay::{RelayApi, RelayLimits, SessionHandle, SessionRole};
use crate::transport::{self, Outgoing, SentContent, SentRecord};
use crate::waiter::PeerKeyWaiter;

/// Queued session events before the listener blocks.
const EVENT_CAPACITY: usize = 64;

/// Signaling state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Idle,
    /// Joined, waiting for the peer's public key.
    Joined,
    KeyExchangeInFlight,
    Established,
    Closed,
    Failed,
}

impl SignalingState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        use SignalingState::{Closed, Established, Failed, Idle, Joined, KeyExchangeInFlight};
        match (self, next) {
            (Closed | Failed, _) => false,
            (_, Failed | Closed) => true,
            (Idle, Joined | KeyExchangeInFlight)
            | (Joined, KeyExchangeInFlight)
            | (KeyExchangeInFlight, Established) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SignalingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Joined => "joined",
            Self::KeyExchangeInFlight => "key-exchange",
            Self::Established => "established",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Caller-owned state for one session.
pub struct SessionContext {
    code: ConnectionCode,
    role: SessionRole,
    token: Option<String>,
    state: SignalingState,
    failure: Option<String>,
    session_key: Option<SessionKey>,
    verification_phrase: Option<String>,
    limits: RelayLimits,
    received: ReceiveLog,
    sent: Vec<SentRecord>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("code", &self.code)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .field("has_key", &self.session_key.is_some())
            .field("received", &self.received.len())
            .field("sent", &self.sent.len())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn new(code: ConnectionCode, role: SessionRole) -> Self {
        Self {
            code,
            role,
            token: None,
            state: SignalingState::Idle,
            failure: None,
            session_key: None,
            verification_phrase: None,
            limits: RelayLimits::default(),
            received: ReceiveLog::default(),
            sent: Vec::new(),
        }
    }

    /// Context for the connector side, which joins with a code.
    pub fn connector(code: ConnectionCode) -> Self {
        Self::new(code, SessionRole::Responder)
    }

    pub const fn code(&self) -> &ConnectionCode {
        &self.code
    }

    pub const fn role(&self) -> SessionRole {
        self.role
    }

    pub const fn state(&self) -> SignalingState {
        self.state
    }

    /// Why the session failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub const fn is_established(&self) -> bool {
        matches!(self.state, SignalingState::Established)
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    pub fn verification_phrase(&self) -> Option<&str> {
        self.verification_phrase.as_deref()
    }

    pub const fn limits(&self) -> &RelayLimits {
        &self.limits
    }

    pub const fn received(&self) -> &ReceiveLog {
        &self.received
    }

    pub fn sent(&self) -> &[SentRecord] {
        &self.sent
    }

    pub fn ensure_established(&self) -> Result<(), ClientError> {
        if self.is_established() {
            Ok(())
        } else {
            Err(ClientError::InvalidState(format!(
                "session is {}, not established",
                self.state
            )))
        }
    }

    /// The session key. Only available while established.
    pub fn session_key(&self) -> Result<&SessionKey, ClientError> {
        self.ensure_established()?;
        self.session_key
            .as_ref()
            .ok_or_else(|| ClientError::InvalidState("session key missing".into()))
    }

    /// Relay-facing identity of the session. Requires a completed join.
    pub fn handle(&self) -> Result<SessionHandle, ClientError> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| ClientError::InvalidState("session has not been joined".into()))?;
        Ok(SessionHandle {
            code: self.code.clone(),
            role: self.role,
            token,
        })
    }

    pub(crate) fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub(crate) fn set_limits(&mut self, limits: RelayLimits) {
        self.limits = limits;
    }

    pub(crate) fn record_sent(&mut self, content: SentContent) {
        self.sent.push(SentRecord {
            content,
            sent_at: SystemTime::now(),
        });
    }

    /// Key and receive log together, for the receive pipeline.
    pub(crate) fn receive_parts(&mut self) -> Result<(&SessionKey, &mut ReceiveLog), ClientError> {
        self.ensure_established()?;
        match self.session_key.as_ref() {
            Some(key) => Ok((key, &mut self.received)),
            None => Err(ClientError::InvalidState("session key missing".into())),
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: SignalingState) -> Result<(), ClientError> {
        if !self.state.can_transition_to(next) {
            return Err(ClientError::InvalidState(format!(
                "cannot move from {} to {next}",
                self.state
            )));
        }
        info!(code = %self.code, role = %self.role, from = %self.state, state = %next, "Signaling state changed");
        self.state = next;
        if next != SignalingState::Established {
            self.session_key = None;
        }
        Ok(())
    }

    /// Install derived keys and enter `Established`.
    pub fn establish(&mut self, keys: EstablishedKeys) -> Result<(), ClientError> {
        self.transition(SignalingState::Established)?;
        self.session_key = Some(keys.session_key);
        self.verification_phrase = Some(keys.verification_phrase);
        Ok(())
    }

    /// Enter `Failed` and drop any key material. No-op once terminal.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        let reason = reason.into();
        warn!(code = %self.code, from = %self.state, reason = %reason, "Session failed");
        self.state = SignalingState::Failed;
        self.failure = Some(reason);
        self.session_key = None;
    }

    /// Enter `Closed` and drop any key material. No-op once terminal.
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!(code = %self.code, from = %self.state, "Session closed");
        self.state = SignalingState::Closed;
        self.session_key = None;
    }
}

/// Pairs a `SessionContext` with its peer through the relay.
pub struct SignalingClient<R: ?Sized, N: ?Sized> {
    relay: Arc<R>,
    notifications: Arc<N>,
    config: SignalingConfig,
    phrase_words: PhraseWordlist,
    waiter: PeerKeyWaiter,
    listener: Option<NotificationListener>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl<R, N> SignalingClient<R, N>
where
    R: RelayApi + ?Sized,
    N: NotificationTransport + ?Sized,
{
    pub fn new(
        relay: Arc<R>,
        notifications: Arc<N>,
        config: SignalingConfig,
        phrase_words: PhraseWordlist,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            relay,
            notifications,
            config,
            phrase_words,
            waiter: PeerKeyWaiter::new(),
            listener: None,
            events_tx,
            events_rx,
        }
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(NotificationListener::is_running)
    }

    /// Join the session and complete the key exchange.
    ///
    /// If the relay already holds the peer's key the exchange completes
    /// without touching the notification channel; otherwise this waits for
    /// a peer-key notification for at most the configured timeout. On any
    /// failure the context ends in `Failed` with no session key.
    pub async fn pair(&mut self, ctx: &mut SessionContext) -> Result<(), ClientError> {
        if ctx.state() != SignalingState::Idle {
            return Err(ClientError::InvalidState(format!(
                "cannot pair a session that is {}",
                ctx.state()
            )));
        }

        let exchange = KeyExchangeState::new();
        let joined = match self
            .relay
            .join(ctx.code(), ctx.role(), &exchange.public_hex())
            .await
        {
            Ok(joined) => joined,
            Err(e) => {
                ctx.fail(e.to_string());
                return Err(e.into());
            }
        };
        if joined.code != ctx.code().as_str() {
            debug!(requested = %ctx.code(), echoed = %joined.code, "Relay echoed a different code");
        }
        ctx.set_token(joined.token);

        let peer_key = if let Some(key) = joined.peer_public_key {
            info!(code = %ctx.code(), "Peer key already available");
            key
        } else {
            ctx.transition(SignalingState::Joined)?;
            match self.wait_for_peer_key(ctx).await {
                Ok(key) => key,
                Err(e) => {
                    self.stop_listener().await;
                    ctx.fail(e.to_string());
                    return Err(e);
                }
            }
        };

        ctx.transition(SignalingState::KeyExchangeInFlight)?;
        let keys = match exchange.complete(&peer_key, self.phrase_words.words()) {
            Ok(keys) => keys,
            Err(e) => {
                self.stop_listener().await;
                let e = KeyExchangeError::Crypto(e);
                ctx.fail(e.to_string());
                return Err(e.into());
            }
        };
        ctx.establish(keys)?;

        if self.listener.is_none() {
            self.start_listener(ctx)?;
        }

        match self.relay.limits().await {
            Ok(limits) => ctx.set_limits(limits),
            Err(e) => warn!(error = %e, "Could not fetch relay limits, using defaults"),
        }
        Ok(())
    }

    async fn wait_for_peer_key(&mut self, ctx: &SessionContext) -> Result<String, ClientError> {
        // Register before subscribing: the relay may push the key as soon as
        // the subscription lands.
        let pending = self.waiter.register().await?;
        self.start_listener(ctx)?;
        let timeout = self.config.peer_key_timeout();
        debug!(code = %ctx.code(), timeout_secs = timeout.as_secs(), "Waiting for peer key");
        Ok(pending.wait(timeout).await?)
    }

    fn start_listener(&mut self, ctx: &SessionContext) -> Result<(), ClientError> {
        let listener = NotificationListener::spawn(
            Arc::clone(&self.notifications),
            ctx.handle()?,
            self.waiter.clone(),
            self.events_tx.clone(),
            ReconnectPolicy::from(&self.config),
        );
        self.listener = Some(listener);
        Ok(())
    }

    async fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop().await;
        }
    }

    /// Next event from the notification channel.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Encrypt and send a submission. See [`transport::send`].
    pub async fn send(&self, ctx: &mut SessionContext, outgoing: Outgoing) -> Result<(), ClientError> {
        transport::send(&*self.relay, ctx, outgoing).await
    }

    /// Fetch, decrypt and deduplicate new messages.
    pub async fn receive(
        &self,
        ctx: &mut SessionContext,
    ) -> Result<Vec<ReceivedMessageRecord>, ClientError> {
        receive::fetch_new(&*self.relay, ctx).await
    }

    /// Tear the session down: stop the channel, drop any pending wait and
    /// close the context.
    pub async fn close(&mut self, ctx: &mut SessionContext) {
        self.stop_listener().await;
        self.waiter.cancel().await;
        ctx.close();
    }
}

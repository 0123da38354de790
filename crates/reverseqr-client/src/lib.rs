//! `ReverseQR` connector client.
//!
//! Joins a session by connection code, performs the P-256 key exchange
//! through the relay and exchanges end-to-end encrypted text and files:
//! - relay HTTP API and notification channel
//! - single-slot peer-key waiter
//! - signaling state machine over a caller-owned `SessionContext`
//! - encrypted send path and deduplicating receive pipeline

pub mod code_cmd;
pub mod connect_cmd;
pub mod error;
pub mod notify;
pub mod receive;
pub mod relay;
pub mod signaling;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod transport;
pub mod waiter;

pub use error::{ClientError, DecryptionError, KeyExchangeError, SignalingError, TransportError};
pub use notify::{NotificationTransport, SessionEvent, WebSocketTransport};
pub use receive::{ReceiveLog, ReceivedContent, ReceivedMessageRecord};
pub use relay::{HttpRelay, RelayApi, RelayLimits, SessionRole};
pub use signaling::{SessionContext, SignalingClient, SignalingState};
pub use transport::{Outgoing, OutgoingFile};
pub use waiter::PeerKeyWaiter;

//! # tether-session
//!
//! Per-peer session actor: routes inbound stream messages to features,
//! queues messages for recipients that have not registered yet, and runs
//! the request/response query layer.
//!
//! One [`Session`] owns the encrypted stream for one peer and is driven by
//! a single task ([`Session::run`]). Everything else talks to it through a
//! cloneable [`SessionHandle`]; feature callbacks are typed channels — a
//! registered recipient gets a bounded receiver of [`FeatureEvent`]s.

pub mod query;
pub mod session;

pub use query::{IncomingQuery, QueryResponder};
pub use session::{FeatureEvent, Session, SessionHandle};

use uuid::Uuid;

/// Query id carried by the synchronous failure response.
pub const INVALID_QUERY_ID: u32 = 0;

/// Bounded capacity of each feature's event channel.
pub const FEATURE_CHANNEL_CAPACITY: usize = 64;

/// Bounded capacity of each recipient's unclaimed-message queue.
pub const UNCLAIMED_QUEUE_CAPACITY: usize = 64;

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying stream failed; the session is torn down.
    #[error("transport error: {0}")]
    Transport(#[from] tether_transport::TransportError),

    /// A different feature is already registered for the recipient.
    #[error("recipient {0} already has a registered feature")]
    RecipientTaken(Uuid),

    /// The session actor is gone.
    #[error("session disconnected")]
    Disconnected,
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

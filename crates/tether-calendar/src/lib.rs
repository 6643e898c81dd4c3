//! # tether-calendar
//!
//! Incremental calendar synchronization between a handheld source and a
//! vehicle replica, built on the generic engine in `tether-sync`.
//!
//! The **source** observes platform calendar changes (debounced), diffs
//! the current snapshot against the per-peer shadow, and ships minimal
//! `UPDATE` batches — or whole-calendar `REPLACE` messages for legacy
//! peers that never acknowledged. The **replica** applies incoming
//! batches to its calendar store and answers with an `ACKNOWLEDGE`
//! carrying its protocol version, which is how the source learns that
//! updates are supported.

pub mod provider;
pub mod replica;
pub mod shadow;
pub mod source;
pub mod store;
pub mod window;

pub use provider::{CalendarProvider, InMemoryProvider, ProviderError};
pub use replica::ReplicaController;
pub use source::{SourceCommand, SourceConfig, SourceController};
pub use store::{CalendarStore, InMemoryCalendarStore};
pub use window::{DayAlignedWindow, WindowSupplier};

use uuid::{uuid, Uuid};

/// Recipient id of the calendar-sync feature on either peer.
pub const CALENDAR_SYNC_RECIPIENT: Uuid = uuid!("5a1a16fd-1ebd-4aaf-9f45-2e8b145f588c");

/// Sync protocol version spoken by this build. Peers at version `0` are
/// legacy: they only understand whole-calendar REPLACE messages.
pub const SYNC_PROTOCOL_VERSION: u32 = 1;

/// Version assumed for a peer until its first acknowledgement.
pub const LEGACY_PROTOCOL_VERSION: u32 = 0;

/// Error types for calendar sync.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    /// Platform calendar access failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The session to the peer failed.
    #[error(transparent)]
    Session(#[from] tether_session::SessionError),

    /// Applying an update batch failed.
    #[error("apply failed: {0}")]
    Apply(String),

    /// A replica cannot remotely disable a source.
    #[error("remote disable is not supported")]
    NotSupported,
}

/// Result type alias for calendar sync.
pub type Result<T> = std::result::Result<T, CalendarError>;

//! Error types for the live view subsystem.

use guardian_state::{EventKind, StateError, Table};
use thiserror::Error;

/// Result type alias for live view operations.
pub type LiveResult<T> = Result<T, LiveError>;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("subscribing to {channel} failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },

    #[error("already subscribed to {event:?} on {table}")]
    DuplicateSubscription {
        table: Table,
        event: Option<EventKind>,
    },

    #[error("map access token is missing")]
    MissingAccessToken,

    #[error("map container {0} is not attached")]
    ContainerDetached(String),

    #[error("map container {id} has no area ({width}x{height})")]
    ContainerEmpty { id: String, width: u32, height: u32 },

    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("map has been destroyed")]
    MapDestroyed,

    #[error("map engine error: {0}")]
    Engine(String),

    #[error("initial load failed: {0}")]
    Load(String),

    #[error(transparent)]
    State(#[from] StateError),
}

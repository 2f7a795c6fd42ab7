use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────

/// Failures a worker request can report back to its caller.
///
/// Serializable so it can travel inside a [`crate::WorkerResponse`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerError {
    #[error("Unsupported tile format '{0}'")]
    UnsupportedFormat(String),

    #[error("No style registered for layer '{0}'")]
    UnknownLayer(String),

    #[error("Tile payload could not be decoded: {0}")]
    Decode(String),

    #[error("Invalid style descriptor: {0}")]
    InvalidStyle(String),

    #[error("Tessellation worker is not running")]
    Disconnected,

    #[error("Failed to start tessellation worker: {0}")]
    Spawn(String),
}

/// A single feature that could not be turned into geometry. Never leaves the
/// decoder: the feature is logged and skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub(crate) enum MalformedFeature {
    #[error("geometry command stream ends early")]
    Truncated,

    #[error("unknown geometry command {0}")]
    UnknownCommand(u32),

    #[error("unsupported geometry type")]
    UnknownType,

    #[error("feature has no geometry")]
    Empty,
}

//! Playback sessions
//!
//! One session streams one song: connect, synchronise, stream events inside
//! the lookahead window, send END, wait for `DONE`. A stop request cancels the
//! session cooperatively and halts the board directly over the link.
//!
//! ```text
//! Idle ─▶ Syncing ─▶ Streaming ─▶ AwaitingCompletion ─▶ Idle
//!                        │                 │
//!                        └──── Stopping ◀──┘
//! ```

pub mod cancel;
pub mod reset;
pub mod scheduler;

pub use cancel::CancelToken;
pub use reset::stop_and_reset;
pub use scheduler::{perform, Outcome};

use fretbot_core::CoreError;
use fretbot_link::LinkError;
use thiserror::Error;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Syncing,
    Streaming,
    AwaitingCompletion,
    Stopping,
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("Failed to spawn playback worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Sent on the completion channel when a session ends, however it ends
#[derive(Debug)]
pub struct SessionReport {
    pub song: String,
    pub result: Result<Outcome, PlaybackError>,
}

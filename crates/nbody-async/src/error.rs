//! Coordination error types.

use thiserror::Error;

use crate::ledger::SlotState;
use crate::SlotIndex;

/// Boxed error produced by a [`SlotBackend`](crate::SlotBackend).
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the mailbox, the simulation worker and the runner.
#[derive(Error, Debug)]
pub enum AsyncError {
    /// The GPU backend failed a submission, fence wait or reset.
    #[error("Backend error: {0}")]
    Backend(#[source] BackendError),

    /// A slot was moved through an illegal lifecycle transition.
    #[error("Invalid transition for slot {slot}: {from:?} -> {to:?}")]
    InvalidTransition {
        slot: SlotIndex,
        from: SlotState,
        to: SlotState,
    },

    /// The slot bookkeeping no longer accounts for every slot exactly once.
    #[error("Slot ledger corrupted: {0}")]
    LedgerCorrupted(String),

    /// The runner was started twice.
    #[error("Simulation worker already started")]
    AlreadyStarted,

    /// A frame was requested before the simulation worker was started.
    #[error("Simulation worker not started")]
    NotStarted,

    /// The simulation worker exited before producing data.
    #[error("Simulation worker stopped")]
    WorkerStopped,

    /// The simulation worker exited with an error while frames were still
    /// being requested. The original error is returned by shutdown.
    #[error("Simulation worker failed: {0}")]
    WorkerFailed(String),

    /// The simulation worker panicked.
    #[error("Simulation worker panicked")]
    WorkerPanicked,

    /// The worker thread could not be spawned.
    #[error("Failed to spawn simulation worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl AsyncError {
    /// Wrap a backend error.
    pub fn backend(e: impl Into<BackendError>) -> Self {
        Self::Backend(e.into())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, AsyncError>;

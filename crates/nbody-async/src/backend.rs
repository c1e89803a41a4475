//! The GPU capability surface the coordinator drives.

use std::fmt;
use std::time::Duration;

use nbody_core::StepTiming;

/// Index of one buffer slot in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    /// The index as a `usize`, for indexing per-slot storage.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for SlotIndex {
    fn from(i: usize) -> Self {
        Self(i as u32)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-slot GPU resources and the two queues they move between.
///
/// The coordinator never touches Vulkan directly. It owns the slot
/// bookkeeping and calls into the backend to submit prerecorded work and to
/// observe fences. Implementations must be usable from the simulation thread
/// and the render thread at the same time.
///
/// Fence rules follow Vulkan: a fence must be unsignaled when attached to a
/// submission, and is reset only after it has been observed signaled.
pub trait SlotBackend: Send + Sync + 'static {
    /// Error type for failed GPU calls.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Number of slots the backend was created with.
    fn slot_count(&self) -> usize;

    /// Upload `timing` into the slot's timing region and submit the slot's
    /// compute commands on the compute queue, signaling the compute fence.
    fn submit_compute(&self, slot: SlotIndex, timing: &StepTiming) -> Result<(), Self::Error>;

    /// Wait for the compute fence. Returns `false` on timeout. When it
    /// returns `true` the fence has already been reset for the next submission.
    fn wait_compute(&self, timeout: Duration) -> Result<bool, Self::Error>;

    /// Submit the slot's wake commands (release back to the compute queue
    /// family) on the render queue, signaling the slot's return fence.
    fn submit_return(&self, slot: SlotIndex) -> Result<(), Self::Error>;

    /// Non-blocking check of the slot's return fence.
    fn poll_return(&self, slot: SlotIndex) -> Result<bool, Self::Error>;

    /// Wait up to `timeout` for the slot's return fence. Returns `false` on timeout.
    fn wait_return(&self, slot: SlotIndex, timeout: Duration) -> Result<bool, Self::Error>;

    /// Reset the slot's return fence.
    fn reset_return(&self, slot: SlotIndex) -> Result<(), Self::Error>;
}

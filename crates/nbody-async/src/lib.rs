//! Mailbox coordination between an async compute thread and the render loop.
//!
//! A fixed pool of buffer slots moves between two queue families:
//! - The simulation worker dispatches compute work into a free slot, waits
//!   for it and publishes the result into a single-slot mailbox.
//! - The render loop takes the newest result each frame and hands the slot it
//!   drew last back to the compute family.
//!
//! Neither side waits on the other in steady state. The only blocking call
//! on the render side is the very first frame, which waits for the first
//! published result.
//!
//! GPU work is abstracted behind [`SlotBackend`]. With the `testing` feature,
//! `testing::HostBackend` implements it on the host.

mod backend;
pub mod config;
pub mod consumer;
pub mod error;
pub mod latch;
pub mod ledger;
pub mod mailbox;
pub mod runner;
pub mod stats;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod worker;

pub use backend::{SlotBackend, SlotIndex};
pub use config::RunnerConfig;
pub use consumer::{FrameConsumer, FrameSelection, FrameSource};
pub use error::{AsyncError, BackendError, Result};
pub use latch::Latch;
pub use ledger::{LedgerSnapshot, QueueOwner, SlotLedger, SlotState};
pub use mailbox::Mailbox;
pub use runner::AsyncRunner;
pub use stats::{RateLog, RunnerStats, StatsSnapshot};

//! Single-slot, latest-value-wins hand-off between the simulation worker and
//! the render loop.
//!
//! The render loop only ever wants the newest simulation result, so the
//! mailbox holds at most one slot. Publishing over an unconsumed result puts
//! the older slot straight back on the ready queue. Nothing is lost, but that
//! result is never drawn.
//!
//! The mailbox, the ready queue and the returned queue change together, so
//! one mutex guards all three. The first-data latch has its own lock and is
//! only touched until the first publish.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{AsyncError, Result};
use crate::latch::Latch;
use crate::ledger::{LedgerSnapshot, SlotLedger};
use crate::stats::RunnerStats;
use crate::{SlotBackend, SlotIndex};

/// Mailbox synchronizer for one producer and one consumer.
pub struct Mailbox<B: SlotBackend> {
    backend: Arc<B>,
    ledger: Mutex<SlotLedger>,
    first_data: Latch,
    stats: Arc<RunnerStats>,
}

impl<B: SlotBackend> Mailbox<B> {
    /// Create a mailbox over all of the backend's slots, every slot ready.
    pub fn new(backend: Arc<B>, stats: Arc<RunnerStats>) -> Self {
        let ledger = SlotLedger::new(backend.slot_count());
        Self {
            backend,
            ledger: Mutex::new(ledger),
            first_data: Latch::new(),
            stats,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn stats(&self) -> &Arc<RunnerStats> {
        &self.stats
    }

    /// Whether at least one result has been published, or waiters were released.
    pub fn first_data_ready(&self) -> bool {
        self.first_data.is_open()
    }

    /// Publish a finished slot. Producer side only.
    ///
    /// A result still sitting in the mailbox goes back to the ready queue.
    /// The first publish wakes a consumer blocked on its first frame.
    pub fn publish(&self, slot: SlotIndex) -> Result<()> {
        let displaced = self.ledger.lock().publish(slot)?;
        self.stats.record_publish(displaced.is_some());

        match displaced {
            Some(old) => trace!("Slot {slot} published, slot {old} dropped unrendered"),
            None => trace!("Slot {slot} published"),
        }

        self.first_data.open();
        Ok(())
    }

    /// Take the newest published slot, handing `previous` back for recycling.
    /// Consumer side only, once per frame.
    ///
    /// With `previous == None` (first frame) this blocks until the first
    /// publish; it is the only blocking call on the consumer side. Afterwards
    /// it never blocks: with nothing new in the mailbox it returns `previous`
    /// unchanged.
    ///
    /// When a newer slot is taken, `previous` is released to the compute
    /// queue by submitting its wake commands with its return fence, and is
    /// queued until that fence signals.
    pub fn try_take_and_return(&self, previous: Option<SlotIndex>) -> Result<SlotIndex> {
        if previous.is_none() {
            self.first_data.wait();
        }

        let mut ledger = self.ledger.lock();
        // A rejected slot must not reach the backend with its fence armed.
        if let Some(prev) = previous {
            ledger.ensure_rendering(prev)?;
        }
        if !ledger.has_published() {
            return previous.ok_or(AsyncError::WorkerStopped);
        }

        if let Some(prev) = previous {
            // Submit before touching the ledger so a failed submission leaves
            // the bookkeeping unchanged.
            self.backend
                .submit_return(prev)
                .map_err(AsyncError::backend)?;
            ledger.begin_return(prev)?;
        }

        let slot = ledger
            .take()?
            .ok_or_else(|| AsyncError::LedgerCorrupted("mailbox emptied under lock".into()))?;

        trace!("Render took slot {slot}, returning {previous:?}");
        Ok(slot)
    }

    /// Pop the next slot free for a compute dispatch. Producer side only.
    pub fn acquire_next(&self) -> Option<SlotIndex> {
        self.ledger.lock().acquire_next()
    }

    /// Recycle returned slots whose fences have signaled. Producer side only.
    ///
    /// Slots are checked oldest first and the scan stops at the first fence
    /// that is still pending. Never blocks. Returns how many slots became ready.
    pub fn drain_returned(&self) -> Result<usize> {
        let mut ledger = self.ledger.lock();
        let mut drained = 0;

        while let Some(slot) = ledger.oldest_returning() {
            if !self.backend.poll_return(slot).map_err(AsyncError::backend)? {
                break;
            }
            self.backend
                .reset_return(slot)
                .map_err(AsyncError::backend)?;
            ledger.finish_return()?;
            drained += 1;
        }

        if drained > 0 {
            self.stats.record_returned(drained as u64);
        }
        Ok(drained)
    }

    /// Oldest slot still waiting on its return fence.
    pub fn oldest_returning(&self) -> Option<SlotIndex> {
        self.ledger.lock().oldest_returning()
    }

    /// Wait up to `timeout` for the first publish. Returns whether data exists.
    pub fn wait_first_data_timeout(&self, timeout: Duration) -> bool {
        self.first_data.wait_timeout(timeout)
    }

    /// Unblock a consumer waiting for first data. Used when the producer stops.
    pub fn release_waiters(&self) {
        self.first_data.open();
    }

    /// Copy the current slot bookkeeping.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.lock().snapshot()
    }

    /// Verify that every slot is accounted for exactly once.
    pub fn check(&self) -> Result<()> {
        self.ledger.lock().check()
    }
}

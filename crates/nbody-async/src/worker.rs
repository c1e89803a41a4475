//! Simulation worker loop.
//!
//! Runs on its own thread and keeps the compute queue busy: wait for the
//! previous dispatch, publish it, recycle returned slots, then dispatch the
//! next step into a free slot. The render loop is never waited on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::utils::Backoff;
use nbody_core::StepTiming;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::RunnerConfig;
use crate::error::{AsyncError, Result};
use crate::mailbox::Mailbox;
use crate::stats::RateLog;
use crate::{SlotBackend, SlotIndex};

/// State shared between the runner handle and its worker thread.
pub(crate) struct Shared<B: SlotBackend> {
    pub mailbox: Mailbox<B>,
    pub exit: AtomicBool,
    pub stopped: AtomicBool,
    /// Why the worker stopped, if it failed.
    pub failure: Mutex<Option<String>>,
}

impl<B: SlotBackend> Shared<B> {
    pub fn new(mailbox: Mailbox<B>) -> Self {
        Self {
            mailbox,
            exit: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    #[inline]
    fn should_exit(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }
}

/// Thread entry point.
///
/// However the loop ends, waiters blocked on first data are released and the
/// stop is recorded, so the render loop cannot keep drawing from a dead
/// producer.
pub(crate) fn run<B: SlotBackend>(shared: Arc<Shared<B>>, config: RunnerConfig) -> Result<()> {
    debug!("Simulation worker started");

    let result = simulate(&shared, &config);
    if let Err(e) = &result {
        error!("Simulation worker failed: {e}");
        *shared.failure.lock() = Some(e.to_string());
    }

    shared.stopped.store(true, Ordering::Release);
    shared.mailbox.release_waiters();

    debug!("Simulation worker stopped");
    result
}

fn simulate<B: SlotBackend>(shared: &Shared<B>, config: &RunnerConfig) -> Result<()> {
    let mailbox = &shared.mailbox;
    let backend = mailbox.backend();
    let stats = mailbox.stats();

    let mut in_flight: Option<SlotIndex> = None;
    let mut timing: Option<StepTiming> = None;
    let mut last_step = Instant::now();
    let mut rate = RateLog::per_second(last_step);

    loop {
        if let Some(slot) = in_flight.take() {
            if !wait_for_compute(shared, config)? {
                return Ok(());
            }
            mailbox.publish(slot)?;
        }

        mailbox.drain_returned()?;

        if shared.should_exit() {
            return Ok(());
        }

        let Some(slot) = next_slot(shared, config)? else {
            return Ok(());
        };

        let now = Instant::now();
        let delta = now.duration_since(last_step).as_secs_f32();
        last_step = now;

        let step = match timing {
            Some(prev) => prev.advance(delta),
            None => StepTiming {
                frame_number: 0,
                delta_seconds: delta,
            },
        };
        timing = Some(step);

        backend
            .submit_compute(slot, &step)
            .map_err(AsyncError::backend)?;
        in_flight = Some(slot);
        stats.record_step();

        if let Some((steps, elapsed)) = rate.tick(now) {
            info!("Simulated {steps} steps in {:.3}s.", elapsed.as_secs_f32());
        }
    }
}

/// Wait for the in-flight dispatch in bounded slices.
///
/// Returns `false` if exit was requested before the fence signaled.
fn wait_for_compute<B: SlotBackend>(shared: &Shared<B>, config: &RunnerConfig) -> Result<bool> {
    let backend = shared.mailbox.backend();
    loop {
        if backend
            .wait_compute(config.compute_wait_slice)
            .map_err(AsyncError::backend)?
        {
            return Ok(true);
        }
        if shared.should_exit() {
            return Ok(false);
        }
    }
}

/// Get a free slot, waiting on returns if none is ready.
///
/// With every other slot held by the render side, the oldest returning
/// slot's fence is the only thing that can free one, so the worker blocks on
/// it briefly. With nothing returning at all it backs off instead.
fn next_slot<B: SlotBackend>(
    shared: &Shared<B>,
    config: &RunnerConfig,
) -> Result<Option<SlotIndex>> {
    let mailbox = &shared.mailbox;
    let backoff = Backoff::new();

    loop {
        if let Some(slot) = mailbox.acquire_next() {
            return Ok(Some(slot));
        }
        if shared.should_exit() {
            return Ok(None);
        }

        match mailbox.oldest_returning() {
            Some(slot) => {
                mailbox
                    .backend()
                    .wait_return(slot, config.return_poll_interval)
                    .map_err(AsyncError::backend)?;
                backoff.reset();
            }
            None => backoff.snooze(),
        }

        mailbox.drain_returned()?;
    }
}

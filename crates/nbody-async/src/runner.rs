//! Owner of the simulation worker thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::config::RunnerConfig;
use crate::consumer::FrameSource;
use crate::error::{AsyncError, Result};
use crate::ledger::LedgerSnapshot;
use crate::mailbox::Mailbox;
use crate::stats::{RunnerStats, StatsSnapshot};
use crate::worker::{self, Shared};
use crate::{SlotBackend, SlotIndex};

/// Runs the simulation on a background thread and hands its results to the
/// render loop through a mailbox.
///
/// The runner owns the worker thread. Dropping it requests exit and joins the
/// thread; GPU resources behind the backend must outlive the runner.
pub struct AsyncRunner<B: SlotBackend> {
    shared: Arc<Shared<B>>,
    config: RunnerConfig,
    worker: Option<JoinHandle<Result<()>>>,
    started: bool,
}

impl<B: SlotBackend> AsyncRunner<B> {
    /// Create a runner over `backend`. The worker is not started yet.
    pub fn new(backend: Arc<B>, config: RunnerConfig) -> Self {
        let stats = Arc::new(RunnerStats::new());
        let mailbox = Mailbox::new(backend, stats);
        Self {
            shared: Arc::new(Shared::new(mailbox)),
            config,
            worker: None,
            started: false,
        }
    }

    /// Spawn the simulation worker.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(AsyncError::AlreadyStarted);
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || worker::run(shared, config))?;

        self.worker = Some(handle);
        self.started = true;
        debug!(
            "Started simulation worker '{}' over {} slots",
            self.config.thread_name,
            self.shared.mailbox.backend().slot_count()
        );
        Ok(())
    }

    /// Exchange the slot the render loop just finished with the newest
    /// simulation result.
    ///
    /// Pass `None` on the first frame; that call blocks until the worker has
    /// published once. Every later call returns immediately, with `previous`
    /// itself if nothing newer is available.
    ///
    /// Once the worker has stopped, every call fails: with
    /// [`AsyncError::WorkerFailed`] if it stopped on an error, otherwise with
    /// [`AsyncError::WorkerStopped`].
    pub fn try_to_return_and_get_next_buffer(
        &self,
        previous: Option<SlotIndex>,
    ) -> Result<SlotIndex> {
        if !self.started {
            return Err(AsyncError::NotStarted);
        }
        if self.worker_stopped() {
            return Err(match self.shared.failure.lock().clone() {
                Some(reason) => AsyncError::WorkerFailed(reason),
                None => AsyncError::WorkerStopped,
            });
        }
        self.shared.mailbox.try_take_and_return(previous)
    }

    pub fn backend(&self) -> &Arc<B> {
        self.shared.mailbox.backend()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.mailbox.stats().snapshot()
    }

    /// The live counters, for a [`FrameConsumer`](crate::FrameConsumer) to record into.
    pub fn stats_handle(&self) -> Arc<RunnerStats> {
        Arc::clone(self.shared.mailbox.stats())
    }

    /// Current slot bookkeeping.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.shared.mailbox.snapshot()
    }

    /// Verify that every slot is accounted for exactly once.
    pub fn check(&self) -> Result<()> {
        self.shared.mailbox.check()
    }

    /// Whether the worker thread has left its loop.
    pub fn worker_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Request exit and join the worker.
    ///
    /// Returns the worker's own error if it failed. Calling it again after
    /// the worker has been joined is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        self.shared.exit.store(true, Ordering::Release);
        self.shared.mailbox.release_waiters();

        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(AsyncError::WorkerPanicked),
        }
    }
}

impl<B: SlotBackend> FrameSource for AsyncRunner<B> {
    fn try_to_return_and_get_next_buffer(&self, previous: Option<SlotIndex>) -> Result<SlotIndex> {
        AsyncRunner::try_to_return_and_get_next_buffer(self, previous)
    }
}

impl<B: SlotBackend> Drop for AsyncRunner<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Simulation worker shut down with error: {e}");
        }
    }
}

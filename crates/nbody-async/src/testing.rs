//! Host-side stand-in for the GPU.
//!
//! [`HostBackend`] keeps one fence per slot plus the compute fence and
//! enforces the same rules a Vulkan implementation would: a fence has to be
//! idle to be submitted with and signaled to be reset. Fences signal either
//! when a test calls [`HostBackend::complete_compute`] /
//! [`HostBackend::complete_return`], or after a fixed latency.

use std::time::{Duration, Instant};

use nbody_core::StepTiming;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::{SlotBackend, SlotIndex};

/// Fence misuse detected by the host backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Fence for {0} submitted while still in use")]
    FenceInUse(FenceId),
    #[error("Fence for {0} reset before it signaled")]
    ResetPending(FenceId),
    #[error("Waited on fence for {0} with nothing submitted")]
    NothingSubmitted(FenceId),
    #[error("Slot {0} out of range")]
    SlotOutOfRange(SlotIndex),
    #[error("Injected submission failure")]
    Injected,
}

/// Which fence an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceId {
    Compute,
    Return(SlotIndex),
}

impl std::fmt::Display for FenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compute => write!(f, "compute"),
            Self::Return(slot) => write!(f, "return of slot {slot}"),
        }
    }
}

/// A submission observed by the backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Submission {
    Compute { slot: SlotIndex, timing: StepTiming },
    Return { slot: SlotIndex },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fence {
    Idle,
    Pending { ready_at: Option<Instant> },
    Signaled,
}

impl Fence {
    fn settle(&mut self, now: Instant) -> bool {
        if let Self::Pending {
            ready_at: Some(at),
        } = *self
        {
            if at <= now {
                *self = Self::Signaled;
            }
        }
        *self == Self::Signaled
    }

    fn ready_at(&self) -> Option<Instant> {
        match self {
            Self::Pending { ready_at } => *ready_at,
            _ => None,
        }
    }
}

#[derive(Debug)]
struct HostState {
    compute: Fence,
    computing: Option<SlotIndex>,
    returns: Vec<Fence>,
    submissions: Vec<Submission>,
    fail_returns: bool,
}

/// Simulated GPU for exercising the coordinator without a device.
#[derive(Debug)]
pub struct HostBackend {
    slots: usize,
    latency: Option<Duration>,
    state: Mutex<HostState>,
    cond: Condvar,
}

impl HostBackend {
    /// Backend whose fences signal only when a test completes them.
    pub fn manual(slots: usize) -> Self {
        Self::build(slots, None)
    }

    /// Backend whose fences signal `latency` after each submission.
    pub fn with_latency(slots: usize, latency: Duration) -> Self {
        Self::build(slots, Some(latency))
    }

    fn build(slots: usize, latency: Option<Duration>) -> Self {
        Self {
            slots,
            latency,
            state: Mutex::new(HostState {
                compute: Fence::Idle,
                computing: None,
                returns: vec![Fence::Idle; slots],
                submissions: Vec::new(),
                fail_returns: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Signal the compute fence. Returns the slot that was being computed.
    pub fn complete_compute(&self) -> Option<SlotIndex> {
        let mut state = self.state.lock();
        if !matches!(state.compute, Fence::Pending { .. }) {
            return None;
        }
        state.compute = Fence::Signaled;
        self.cond.notify_all();
        state.computing
    }

    /// Signal a slot's return fence. Returns `false` if nothing was pending.
    pub fn complete_return(&self, slot: SlotIndex) -> bool {
        let mut state = self.state.lock();
        let Some(fence) = state.returns.get_mut(slot.index()) else {
            return false;
        };
        if !matches!(fence, Fence::Pending { .. }) {
            return false;
        }
        *fence = Fence::Signaled;
        self.cond.notify_all();
        true
    }

    /// Slot of the compute dispatch that has not signaled yet.
    pub fn pending_compute(&self) -> Option<SlotIndex> {
        let mut state = self.state.lock();
        let pending = matches!(state.compute, Fence::Pending { .. });
        if pending && !state.compute.settle(Instant::now()) {
            state.computing
        } else {
            None
        }
    }

    /// Block until a compute dispatch is pending or `timeout` elapses.
    pub fn wait_for_dispatch(&self, timeout: Duration) -> Option<SlotIndex> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if matches!(state.compute, Fence::Pending { .. }) {
                return state.computing;
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Make every following return submission fail.
    pub fn fail_returns(&self, fail: bool) {
        self.state.lock().fail_returns = fail;
    }

    /// Everything submitted so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    /// Number of compute submissions so far.
    pub fn compute_submissions(&self) -> usize {
        self.state
            .lock()
            .submissions
            .iter()
            .filter(|s| matches!(s, Submission::Compute { .. }))
            .count()
    }

    fn pending(&self) -> Fence {
        Fence::Pending {
            ready_at: self.latency.map(|l| Instant::now() + l),
        }
    }

    fn check_slot(&self, slot: SlotIndex) -> Result<usize, HostError> {
        if slot.index() < self.slots {
            Ok(slot.index())
        } else {
            Err(HostError::SlotOutOfRange(slot))
        }
    }

    /// Wait until `fence(state)` signals or `timeout` elapses.
    fn wait_on(
        &self,
        timeout: Duration,
        id: FenceId,
        fence: impl Fn(&mut HostState) -> &mut Fence,
    ) -> Result<bool, HostError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let f = fence(&mut *state);
            if *f == Fence::Idle {
                return Err(HostError::NothingSubmitted(id));
            }
            if f.settle(Instant::now()) {
                return Ok(true);
            }

            let wake = f.ready_at().map_or(deadline, |at| at.min(deadline));
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.cond.wait_until(&mut state, wake);
        }
    }
}

impl SlotBackend for HostBackend {
    type Error = HostError;

    fn slot_count(&self) -> usize {
        self.slots
    }

    fn submit_compute(&self, slot: SlotIndex, timing: &StepTiming) -> Result<(), HostError> {
        self.check_slot(slot)?;
        let pending = self.pending();
        let mut state = self.state.lock();
        if state.compute != Fence::Idle {
            return Err(HostError::FenceInUse(FenceId::Compute));
        }
        state.compute = pending;
        state.computing = Some(slot);
        state.submissions.push(Submission::Compute {
            slot,
            timing: *timing,
        });
        self.cond.notify_all();
        Ok(())
    }

    fn wait_compute(&self, timeout: Duration) -> Result<bool, HostError> {
        let signaled = self.wait_on(timeout, FenceId::Compute, |s| &mut s.compute)?;
        if signaled {
            let mut state = self.state.lock();
            state.compute = Fence::Idle;
            state.computing = None;
        }
        Ok(signaled)
    }

    fn submit_return(&self, slot: SlotIndex) -> Result<(), HostError> {
        let i = self.check_slot(slot)?;
        let pending = self.pending();
        let mut state = self.state.lock();
        if state.fail_returns {
            return Err(HostError::Injected);
        }
        if state.returns[i] != Fence::Idle {
            return Err(HostError::FenceInUse(FenceId::Return(slot)));
        }
        state.returns[i] = pending;
        state.submissions.push(Submission::Return { slot });
        Ok(())
    }

    fn poll_return(&self, slot: SlotIndex) -> Result<bool, HostError> {
        let i = self.check_slot(slot)?;
        let mut state = self.state.lock();
        Ok(state.returns[i].settle(Instant::now()))
    }

    fn wait_return(&self, slot: SlotIndex, timeout: Duration) -> Result<bool, HostError> {
        let i = self.check_slot(slot)?;
        self.wait_on(timeout, FenceId::Return(slot), |s| &mut s.returns[i])
    }

    fn reset_return(&self, slot: SlotIndex) -> Result<(), HostError> {
        let i = self.check_slot(slot)?;
        let mut state = self.state.lock();
        let fence = &mut state.returns[i];
        if matches!(fence, Fence::Pending { .. }) && !fence.settle(Instant::now()) {
            return Err(HostError::ResetPending(FenceId::Return(slot)));
        }
        *fence = Fence::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> StepTiming {
        StepTiming::default()
    }

    #[test]
    fn compute_fence_rules() {
        let backend = HostBackend::manual(2);
        assert_eq!(
            backend.wait_compute(Duration::ZERO),
            Err(HostError::NothingSubmitted(FenceId::Compute))
        );

        backend.submit_compute(SlotIndex(0), &timing()).unwrap();
        assert_eq!(
            backend.submit_compute(SlotIndex(1), &timing()),
            Err(HostError::FenceInUse(FenceId::Compute))
        );
        assert!(!backend.wait_compute(Duration::from_millis(5)).unwrap());

        assert_eq!(backend.complete_compute(), Some(SlotIndex(0)));
        assert!(backend.wait_compute(Duration::ZERO).unwrap());
        backend.submit_compute(SlotIndex(1), &timing()).unwrap();
    }

    #[test]
    fn return_fence_must_signal_before_reset() {
        let backend = HostBackend::manual(2);
        let slot = SlotIndex(1);

        backend.submit_return(slot).unwrap();
        assert!(!backend.poll_return(slot).unwrap());
        assert!(backend.reset_return(slot).is_err());

        assert!(backend.complete_return(slot));
        assert!(backend.poll_return(slot).unwrap());
        backend.reset_return(slot).unwrap();
        assert!(!backend.poll_return(slot).unwrap());
    }

    #[test]
    fn latency_signals_on_its_own() {
        let backend = HostBackend::with_latency(1, Duration::from_millis(5));
        backend.submit_return(SlotIndex(0)).unwrap();
        assert!(backend
            .wait_return(SlotIndex(0), Duration::from_secs(1))
            .unwrap());
    }

    #[test]
    fn out_of_range_slot() {
        let backend = HostBackend::manual(1);
        assert_eq!(
            backend.submit_return(SlotIndex(3)),
            Err(HostError::SlotOutOfRange(SlotIndex(3)))
        );
    }
}

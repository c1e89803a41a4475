//! Runner tests with a live simulation worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nbody_async::testing::{HostBackend, HostError, Submission};
use nbody_async::{
    AsyncError, AsyncRunner, FrameConsumer, RunnerConfig, SlotBackend, SlotIndex, SlotState,
};
use nbody_core::StepTiming;

fn config() -> RunnerConfig {
    RunnerConfig::new()
        .with_thread_name("nbody-sim-test")
        .with_compute_wait_slice(Duration::from_millis(10))
        .with_return_poll_interval(Duration::from_millis(1))
}

/// Poll `done` until it holds, failing the test after a few seconds.
fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn last_return(backend: &HostBackend) -> Option<SlotIndex> {
    backend.submissions().into_iter().rev().find_map(|s| match s {
        Submission::Return { slot } => Some(slot),
        Submission::Compute { .. } => None,
    })
}

#[test]
fn end_to_end_three_slots() {
    let backend = Arc::new(HostBackend::with_latency(3, Duration::from_micros(300)));
    let mut runner = AsyncRunner::new(Arc::clone(&backend), config());
    runner.start().unwrap();

    let mut consumer = FrameConsumer::new().with_stats(runner.stats_handle());
    let mut swaps = 0;
    for _ in 0..300 {
        let frame = consumer.next_frame(&runner).unwrap();
        if frame.swapped {
            swaps += 1;
        }

        runner.check().unwrap();
        let snap = runner.snapshot();
        assert_eq!(snap.states[frame.slot.index()], SlotState::Rendering);
        assert!(!snap.ready.contains(&frame.slot));
        assert!(!snap.returned.contains(&frame.slot));

        thread::sleep(Duration::from_micros(200));
    }

    runner.shutdown().unwrap();
    assert!(runner.worker_stopped());

    let stats = runner.stats();
    assert_eq!(stats.frames, 300);
    assert_eq!(stats.swaps, swaps);
    assert!(stats.simulated_steps > 1);
    assert!(swaps > 1);

    // Every step is dispatched into a slot with a frame counter one past the last.
    let timings: Vec<StepTiming> = backend
        .submissions()
        .into_iter()
        .filter_map(|s| match s {
            Submission::Compute { timing, .. } => Some(timing),
            Submission::Return { .. } => None,
        })
        .collect();
    for (i, timing) in timings.iter().enumerate() {
        assert_eq!(timing.frame_number, i as i32);
        assert!(timing.delta_seconds >= 0.0);
    }
}

#[test]
fn first_frame_waits_for_worker() {
    let backend = Arc::new(HostBackend::manual(3));
    let mut runner = AsyncRunner::new(Arc::clone(&backend), config());
    runner.start().unwrap();

    let slot = backend
        .wait_for_dispatch(Duration::from_secs(5))
        .expect("worker never dispatched");
    assert_eq!(runner.stats().published, 0);

    backend.complete_compute();
    let taken = runner.try_to_return_and_get_next_buffer(None).unwrap();
    assert_eq!(taken, slot);

    runner.shutdown().unwrap();
}

#[test]
fn latest_result_replaces_held_slot() {
    let backend = Arc::new(HostBackend::manual(3));
    let mut runner = AsyncRunner::new(Arc::clone(&backend), config());
    runner.start().unwrap();

    backend.wait_for_dispatch(Duration::from_secs(5)).unwrap();
    let s0 = backend.complete_compute().unwrap();
    assert_eq!(runner.try_to_return_and_get_next_buffer(None).unwrap(), s0);

    // The worker moves on to the next slot while s0 is on screen.
    wait_until("second dispatch", || backend.pending_compute().is_some());
    let s1 = backend.pending_compute().unwrap();
    assert_ne!(s1, s0);

    // Nothing newer yet: keep drawing s0 and submit no return for it.
    assert_eq!(runner.try_to_return_and_get_next_buffer(Some(s0)).unwrap(), s0);
    assert_eq!(last_return(&backend), None);
    assert_eq!(runner.snapshot().states[s0.index()], SlotState::Rendering);

    assert_eq!(backend.complete_compute(), Some(s1));
    wait_until("second publish", || runner.stats().published == 2);

    // s1 replaces s0, which goes back to the compute family.
    assert_eq!(runner.try_to_return_and_get_next_buffer(Some(s0)).unwrap(), s1);
    assert_eq!(last_return(&backend), Some(s0));
    let snap = runner.snapshot();
    assert_eq!(snap.states[s0.index()], SlotState::Returning);
    assert_eq!(snap.states[s1.index()], SlotState::Rendering);
    assert!(snap.returned.contains(&s0));
    runner.check().unwrap();

    // Once its return fence signals, s0 is recycled into a later step.
    wait_until("third dispatch", || backend.pending_compute().is_some());
    let s2 = backend.pending_compute().unwrap();
    assert!(s2 != s0 && s2 != s1);
    assert!(backend.complete_return(s0));
    assert_eq!(backend.complete_compute(), Some(s2));
    wait_until("s0 dispatched again", || backend.pending_compute() == Some(s0));

    assert_eq!(backend.compute_submissions(), 4);
    runner.check().unwrap();
    runner.shutdown().unwrap();
}

#[test]
fn stalled_render_does_not_stall_simulation() {
    let backend = Arc::new(HostBackend::with_latency(3, Duration::from_micros(200)));
    let mut runner = AsyncRunner::new(Arc::clone(&backend), config());
    runner.start().unwrap();

    // Take one slot and never hand it back.
    let held = runner.try_to_return_and_get_next_buffer(None).unwrap();
    let before = runner.stats().simulated_steps;

    let deadline = Instant::now() + Duration::from_secs(5);
    while runner.stats().dropped < 10 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    let stats = runner.stats();
    assert!(stats.simulated_steps > before);
    assert!(stats.dropped >= 10);
    assert_eq!(runner.snapshot().states[held.index()], SlotState::Rendering);

    runner.shutdown().unwrap();
}

#[test]
fn shutdown_while_dispatch_in_flight() {
    let backend = Arc::new(HostBackend::manual(3));
    let mut runner = AsyncRunner::new(Arc::clone(&backend), config());
    runner.start().unwrap();
    backend.wait_for_dispatch(Duration::from_secs(5)).unwrap();

    // The compute fence never signals; the worker notices exit between waits.
    let start = Instant::now();
    runner.shutdown().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(runner.worker_stopped());

    // Nothing was ever published, so a first-frame request does not hang.
    assert!(matches!(
        runner.try_to_return_and_get_next_buffer(None),
        Err(AsyncError::WorkerStopped)
    ));
}

#[test]
fn start_rules() {
    let backend = Arc::new(HostBackend::with_latency(2, Duration::from_micros(100)));
    let mut runner = AsyncRunner::new(backend, config());

    assert!(matches!(
        runner.try_to_return_and_get_next_buffer(None),
        Err(AsyncError::NotStarted)
    ));

    runner.start().unwrap();
    assert!(matches!(runner.start(), Err(AsyncError::AlreadyStarted)));
    runner.shutdown().unwrap();
    runner.shutdown().unwrap();
}

#[test]
fn drop_joins_worker() {
    let backend = Arc::new(HostBackend::with_latency(3, Duration::from_micros(100)));
    {
        let mut runner = AsyncRunner::new(Arc::clone(&backend), config());
        runner.start().unwrap();
        runner.try_to_return_and_get_next_buffer(None).unwrap();
    }
    assert_eq!(Arc::strong_count(&backend), 1);
}

/// Backend whose compute submissions always fail.
struct BrokenCompute;

#[derive(Debug, thiserror::Error)]
#[error("device lost")]
struct DeviceLost;

impl SlotBackend for BrokenCompute {
    type Error = DeviceLost;

    fn slot_count(&self) -> usize {
        3
    }

    fn submit_compute(&self, _: SlotIndex, _: &StepTiming) -> Result<(), DeviceLost> {
        Err(DeviceLost)
    }

    fn wait_compute(&self, _: Duration) -> Result<bool, DeviceLost> {
        Ok(true)
    }

    fn submit_return(&self, _: SlotIndex) -> Result<(), DeviceLost> {
        Ok(())
    }

    fn poll_return(&self, _: SlotIndex) -> Result<bool, DeviceLost> {
        Ok(true)
    }

    fn wait_return(&self, _: SlotIndex, _: Duration) -> Result<bool, DeviceLost> {
        Ok(true)
    }

    fn reset_return(&self, _: SlotIndex) -> Result<(), DeviceLost> {
        Ok(())
    }
}

#[test]
fn worker_error_surfaces_on_shutdown() {
    let mut runner = AsyncRunner::new(Arc::new(BrokenCompute), config());
    runner.start().unwrap();

    // The consumer is released instead of blocking forever.
    assert!(matches!(
        runner.try_to_return_and_get_next_buffer(None),
        Err(AsyncError::WorkerStopped | AsyncError::WorkerFailed(_))
    ));

    let err = runner.shutdown().unwrap_err();
    assert!(matches!(err, AsyncError::Backend(_)));
    assert!(err.to_string().contains("device lost"));
}

/// Host backend whose compute submissions start failing on request.
struct FailingCompute {
    inner: HostBackend,
    fail: AtomicBool,
}

impl SlotBackend for FailingCompute {
    type Error = HostError;

    fn slot_count(&self) -> usize {
        self.inner.slot_count()
    }

    fn submit_compute(&self, slot: SlotIndex, timing: &StepTiming) -> Result<(), HostError> {
        if self.fail.load(Ordering::Acquire) {
            return Err(HostError::Injected);
        }
        self.inner.submit_compute(slot, timing)
    }

    fn wait_compute(&self, timeout: Duration) -> Result<bool, HostError> {
        self.inner.wait_compute(timeout)
    }

    fn submit_return(&self, slot: SlotIndex) -> Result<(), HostError> {
        self.inner.submit_return(slot)
    }

    fn poll_return(&self, slot: SlotIndex) -> Result<bool, HostError> {
        self.inner.poll_return(slot)
    }

    fn wait_return(&self, slot: SlotIndex, timeout: Duration) -> Result<bool, HostError> {
        self.inner.wait_return(slot, timeout)
    }

    fn reset_return(&self, slot: SlotIndex) -> Result<(), HostError> {
        self.inner.reset_return(slot)
    }
}

#[test]
fn failure_after_first_frame_stops_render_loop() {
    let backend = Arc::new(FailingCompute {
        inner: HostBackend::manual(3),
        fail: AtomicBool::new(false),
    });
    let mut runner = AsyncRunner::new(Arc::clone(&backend), config());
    runner.start().unwrap();

    backend
        .inner
        .wait_for_dispatch(Duration::from_secs(5))
        .unwrap();
    backend.inner.complete_compute();
    let held = runner.try_to_return_and_get_next_buffer(None).unwrap();

    // The step after the next one fails to submit.
    wait_until("second dispatch", || backend.inner.pending_compute().is_some());
    backend.fail.store(true, Ordering::Release);
    backend.inner.complete_compute();
    wait_until("worker stop", || runner.worker_stopped());

    match runner.try_to_return_and_get_next_buffer(Some(held)) {
        Err(AsyncError::WorkerFailed(reason)) => assert!(reason.contains("Injected")),
        other => panic!("expected WorkerFailed, got {other:?}"),
    }

    let mut consumer = FrameConsumer::new();
    assert!(matches!(
        consumer.next_frame(&runner),
        Err(AsyncError::WorkerFailed(_))
    ));

    let err = runner.shutdown().unwrap_err();
    assert!(matches!(err, AsyncError::Backend(_)));
    assert!(err.to_string().contains("Injected"));
}

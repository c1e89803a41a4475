//! Mailbox behavior driven step by step against the host backend.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nbody_async::testing::{HostBackend, Submission};
use nbody_async::{AsyncError, Mailbox, RunnerStats, SlotBackend, SlotIndex, SlotState};
use nbody_core::XorShift64;

fn mailbox(slots: usize) -> (Arc<HostBackend>, Mailbox<HostBackend>) {
    let backend = Arc::new(HostBackend::manual(slots));
    let mailbox = Mailbox::new(Arc::clone(&backend), Arc::new(RunnerStats::new()));
    (backend, mailbox)
}

/// One producer step without a worker thread: take a ready slot and publish it.
fn produce(mailbox: &Mailbox<HostBackend>) -> Option<SlotIndex> {
    mailbox.drain_returned().unwrap();
    let slot = mailbox.acquire_next()?;
    mailbox.publish(slot).unwrap();
    Some(slot)
}

#[test]
fn random_interleavings_keep_every_slot_accounted() {
    for seed in 1..=32 {
        let slots = 2 + (seed as usize % 4);
        let (backend, mailbox) = mailbox(slots);
        let mut rng = XorShift64::new(seed);
        let mut held: Option<SlotIndex> = None;

        for _ in 0..400 {
            match rng.below(4) {
                0 => {
                    produce(&mailbox);
                }
                1 => {
                    if held.is_some() || mailbox.first_data_ready() {
                        let slot = mailbox.try_take_and_return(held).unwrap();
                        held = Some(slot);
                    }
                }
                2 => {
                    // Signal a random returning fence, possibly out of order.
                    let returned = mailbox.snapshot().returned;
                    if !returned.is_empty() {
                        let pick = rng.below(returned.len() as u64) as usize;
                        backend.complete_return(returned[pick]);
                    }
                }
                _ => {
                    mailbox.drain_returned().unwrap();
                }
            }

            mailbox.check().unwrap();
            let snap = mailbox.snapshot();
            if let Some(slot) = held {
                assert_eq!(snap.states[slot.index()], SlotState::Rendering);
            }
            assert!(snap.in_state(SlotState::Rendering).len() <= 1);
        }
    }
}

#[test]
fn consumer_gets_latest_publish() {
    let (_backend, mailbox) = mailbox(3);

    let a = produce(&mailbox).unwrap();
    let b = produce(&mailbox).unwrap();
    assert_ne!(a, b);

    assert_eq!(mailbox.try_take_and_return(None).unwrap(), b);

    // The displaced result went back to the ready queue, not to the consumer.
    let snap = mailbox.snapshot();
    assert_eq!(snap.states[a.index()], SlotState::Ready);
    assert!(snap.ready.contains(&a));
    assert_eq!(mailbox.stats().snapshot().dropped, 1);
}

#[test]
fn first_take_blocks_until_publish() {
    let (_backend, mailbox) = mailbox(3);
    let mailbox = Arc::new(mailbox);

    let consumer = {
        let mailbox = Arc::clone(&mailbox);
        thread::spawn(move || mailbox.try_take_and_return(None))
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!consumer.is_finished());

    let slot = produce(&mailbox).unwrap();
    assert_eq!(consumer.join().unwrap().unwrap(), slot);
}

#[test]
fn later_takes_never_block() {
    let (backend, mailbox) = mailbox(3);
    let first = produce(&mailbox).unwrap();
    let held = mailbox.try_take_and_return(None).unwrap();
    assert_eq!(held, first);

    // Nothing new: the same slot comes back and nothing is returned.
    for _ in 0..10 {
        assert_eq!(mailbox.try_take_and_return(Some(held)).unwrap(), held);
    }
    assert!(backend
        .submissions()
        .iter()
        .all(|s| !matches!(s, Submission::Return { .. })));
    assert_eq!(mailbox.snapshot().states[held.index()], SlotState::Rendering);
}

#[test]
fn returned_slot_recycled_only_after_fence() {
    let (backend, mailbox) = mailbox(2);

    let a = produce(&mailbox).unwrap();
    assert_eq!(mailbox.try_take_and_return(None).unwrap(), a);
    let b = produce(&mailbox).unwrap();
    assert_eq!(mailbox.try_take_and_return(Some(a)).unwrap(), b);

    assert_eq!(backend.submissions().last(), Some(&Submission::Return { slot: a }));
    assert_eq!(mailbox.oldest_returning(), Some(a));

    // Fence still pending: no slot can be acquired.
    assert_eq!(mailbox.drain_returned().unwrap(), 0);
    assert_eq!(mailbox.acquire_next(), None);

    assert!(backend.complete_return(a));
    assert_eq!(mailbox.drain_returned().unwrap(), 1);
    assert_eq!(mailbox.acquire_next(), Some(a));

    // The fence was reset when the slot was recycled.
    assert!(!backend.poll_return(a).unwrap());
}

#[test]
fn drain_stops_at_first_pending_fence() {
    let (backend, mailbox) = mailbox(4);

    let mut held = None;
    for _ in 0..3 {
        produce(&mailbox).unwrap();
        held = Some(mailbox.try_take_and_return(held).unwrap());
    }
    let returned = mailbox.snapshot().returned;
    assert_eq!(returned.len(), 2);

    // Signal the younger one only.
    backend.complete_return(returned[1]);
    assert_eq!(mailbox.drain_returned().unwrap(), 0);

    backend.complete_return(returned[0]);
    assert_eq!(mailbox.drain_returned().unwrap(), 2);
    assert!(mailbox.snapshot().returned.is_empty());
    mailbox.check().unwrap();
}

#[test]
fn failed_return_leaves_ledger_unchanged() {
    let (backend, mailbox) = mailbox(3);
    produce(&mailbox).unwrap();
    let held = mailbox.try_take_and_return(None).unwrap();
    produce(&mailbox).unwrap();

    let before = mailbox.snapshot();
    backend.fail_returns(true);
    let err = mailbox.try_take_and_return(Some(held)).unwrap_err();
    assert!(matches!(err, AsyncError::Backend(_)));
    assert_eq!(mailbox.snapshot(), before);

    backend.fail_returns(false);
    assert_ne!(mailbox.try_take_and_return(Some(held)).unwrap(), held);
}

#[test]
fn rejected_previous_is_never_submitted() {
    let (backend, mailbox) = mailbox(3);
    let a = produce(&mailbox).unwrap();
    assert_eq!(mailbox.try_take_and_return(None).unwrap(), a);
    let b = produce(&mailbox).unwrap();

    let idle = SlotIndex(2);
    assert_eq!(mailbox.snapshot().states[idle.index()], SlotState::Ready);

    let before = mailbox.snapshot();
    let err = mailbox.try_take_and_return(Some(idle)).unwrap_err();
    assert!(matches!(
        err,
        AsyncError::InvalidTransition {
            slot,
            from: SlotState::Ready,
            to: SlotState::Returning,
        } if slot == idle
    ));
    assert!(matches!(
        mailbox.try_take_and_return(Some(SlotIndex(7))),
        Err(AsyncError::LedgerCorrupted(_))
    ));
    assert_eq!(mailbox.snapshot(), before);
    assert!(backend
        .submissions()
        .iter()
        .all(|s| !matches!(s, Submission::Return { .. })));

    // The slot that really was rendering still returns normally.
    assert_eq!(mailbox.try_take_and_return(Some(a)).unwrap(), b);
    assert_eq!(backend.submissions().last(), Some(&Submission::Return { slot: a }));
    mailbox.check().unwrap();
}

#[test]
fn released_waiter_sees_worker_stopped() {
    let (_backend, mailbox) = mailbox(3);
    mailbox.release_waiters();
    assert!(matches!(
        mailbox.try_take_and_return(None),
        Err(AsyncError::WorkerStopped)
    ));
}

#[test]
fn bounded_first_data_wait() {
    let (_backend, mailbox) = mailbox(3);
    assert!(!mailbox.wait_first_data_timeout(Duration::from_millis(10)));
    produce(&mailbox).unwrap();
    assert!(mailbox.wait_first_data_timeout(Duration::ZERO));
}

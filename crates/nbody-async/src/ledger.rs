//! Slot bookkeeping.
//!
//! The ledger tracks where every slot is in its lifecycle:
//!
//! ```text
//! Ready -> Computing -> Published -> Rendering -> Returning -> Ready
//!                           |
//!                           +-- displaced by a newer result --> Ready
//! ```
//!
//! It is plain data with no locking or GPU access; the [`Mailbox`](crate::Mailbox)
//! wraps it in a mutex and pairs each transition with the matching backend call.

use std::collections::VecDeque;

use crate::error::{AsyncError, Result};
use crate::SlotIndex;

/// Lifecycle state of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Free, queued for the next compute dispatch.
    Ready,
    /// Being written by the compute queue.
    Computing,
    /// Finished, sitting in the mailbox.
    Published,
    /// Held by the render loop.
    Rendering,
    /// Released by the render queue, waiting on its return fence.
    Returning,
}

/// Queue family that currently owns a slot's buffer.
///
/// Moving between families takes a release barrier on one queue and an
/// acquire barrier on the other; the `To*` states sit between the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueOwner {
    Compute,
    /// Released by the compute queue, not yet acquired by the render queue.
    ToRender,
    Render,
    /// Released by the render queue, not yet acquired by the compute queue.
    ToCompute,
}

impl SlotState {
    /// The queue family owning the buffer in this state.
    ///
    /// A displaced mailbox result goes back to `Ready` without ever being
    /// acquired by the render queue. Its contents are discarded, so it is
    /// treated as owned by compute again.
    pub const fn owner(self) -> QueueOwner {
        match self {
            Self::Ready | Self::Computing => QueueOwner::Compute,
            Self::Published => QueueOwner::ToRender,
            Self::Rendering => QueueOwner::Render,
            Self::Returning => QueueOwner::ToCompute,
        }
    }
}

/// Point-in-time copy of the ledger, for tests and diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub states: Vec<SlotState>,
    pub ready: Vec<SlotIndex>,
    pub returned: Vec<SlotIndex>,
    pub mailbox: Option<SlotIndex>,
}

impl LedgerSnapshot {
    /// Slots in the given state, in index order.
    pub fn in_state(&self, state: SlotState) -> Vec<SlotIndex> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == state)
            .map(|(i, _)| SlotIndex::from(i))
            .collect()
    }
}

/// Location of every slot.
#[derive(Debug)]
pub struct SlotLedger {
    states: Vec<SlotState>,
    ready: VecDeque<SlotIndex>,
    returned: VecDeque<SlotIndex>,
    mailbox: Option<SlotIndex>,
}

impl SlotLedger {
    /// Create a ledger with `count` slots, all ready in index order.
    pub fn new(count: usize) -> Self {
        Self {
            states: vec![SlotState::Ready; count],
            ready: (0..count).map(SlotIndex::from).collect(),
            returned: VecDeque::new(),
            mailbox: None,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State of a slot.
    pub fn state(&self, slot: SlotIndex) -> SlotState {
        self.states[slot.index()]
    }

    /// Slot currently in the mailbox.
    pub fn mailbox(&self) -> Option<SlotIndex> {
        self.mailbox
    }

    /// Oldest slot waiting on its return fence.
    pub fn oldest_returning(&self) -> Option<SlotIndex> {
        self.returned.front().copied()
    }

    /// Take the next ready slot for a compute dispatch.
    pub fn acquire_next(&mut self) -> Option<SlotIndex> {
        let slot = self.ready.pop_front()?;
        self.states[slot.index()] = SlotState::Computing;
        Some(slot)
    }

    /// Place a finished slot in the mailbox.
    ///
    /// Returns the slot it displaced, which is already back on the ready queue.
    pub fn publish(&mut self, slot: SlotIndex) -> Result<Option<SlotIndex>> {
        self.transition(slot, SlotState::Computing, SlotState::Published)?;

        let displaced = self.mailbox.replace(slot);
        if let Some(old) = displaced {
            self.transition(old, SlotState::Published, SlotState::Ready)?;
            self.ready.push_back(old);
        }
        Ok(displaced)
    }

    /// Whether `take` would return a slot.
    pub fn has_published(&self) -> bool {
        self.mailbox.is_some()
    }

    /// Take the slot out of the mailbox for rendering.
    pub fn take(&mut self) -> Result<Option<SlotIndex>> {
        let Some(slot) = self.mailbox.take() else {
            return Ok(None);
        };
        self.transition(slot, SlotState::Published, SlotState::Rendering)?;
        Ok(Some(slot))
    }

    /// Fail unless `slot` is the one held by the render loop. Changes nothing.
    pub fn ensure_rendering(&self, slot: SlotIndex) -> Result<()> {
        match self.states.get(slot.index()) {
            None => Err(AsyncError::LedgerCorrupted(format!(
                "slot {slot} out of range"
            ))),
            Some(SlotState::Rendering) => Ok(()),
            Some(&from) => Err(AsyncError::InvalidTransition {
                slot,
                from,
                to: SlotState::Returning,
            }),
        }
    }

    /// Queue a slot the render loop no longer uses for return.
    pub fn begin_return(&mut self, slot: SlotIndex) -> Result<()> {
        self.transition(slot, SlotState::Rendering, SlotState::Returning)?;
        self.returned.push_back(slot);
        Ok(())
    }

    /// Move the oldest returning slot back to the ready queue.
    ///
    /// Only call once its return fence is known to be signaled.
    pub fn finish_return(&mut self) -> Result<Option<SlotIndex>> {
        let Some(slot) = self.returned.pop_front() else {
            return Ok(None);
        };
        self.transition(slot, SlotState::Returning, SlotState::Ready)?;
        self.ready.push_back(slot);
        Ok(Some(slot))
    }

    /// Verify that every slot is accounted for exactly once and that the
    /// queues agree with the per-slot states.
    pub fn check(&self) -> Result<()> {
        let mut seen = vec![0u32; self.states.len()];
        let mut note = |slot: SlotIndex, expected: SlotState| -> Result<()> {
            let Some(count) = seen.get_mut(slot.index()) else {
                return Err(AsyncError::LedgerCorrupted(format!(
                    "slot {slot} out of range"
                )));
            };
            *count += 1;
            let actual = self.states[slot.index()];
            if actual != expected {
                return Err(AsyncError::LedgerCorrupted(format!(
                    "slot {slot} queued as {expected:?} but marked {actual:?}"
                )));
            }
            Ok(())
        };

        for &slot in &self.ready {
            note(slot, SlotState::Ready)?;
        }
        for &slot in &self.returned {
            note(slot, SlotState::Returning)?;
        }
        if let Some(slot) = self.mailbox {
            note(slot, SlotState::Published)?;
        }

        // Computing and Rendering slots live outside the queues.
        let mut computing = 0;
        let mut rendering = 0;
        for (i, state) in self.states.iter().enumerate() {
            match state {
                SlotState::Computing => {
                    seen[i] += 1;
                    computing += 1;
                }
                SlotState::Rendering => {
                    seen[i] += 1;
                    rendering += 1;
                }
                _ => {}
            }
        }

        if computing > 1 || rendering > 1 {
            return Err(AsyncError::LedgerCorrupted(format!(
                "{computing} computing and {rendering} rendering slots"
            )));
        }

        if let Some(i) = seen.iter().position(|&c| c != 1) {
            return Err(AsyncError::LedgerCorrupted(format!(
                "slot {i} accounted for {} times",
                seen[i]
            )));
        }

        Ok(())
    }

    /// Copy the current bookkeeping.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            states: self.states.clone(),
            ready: self.ready.iter().copied().collect(),
            returned: self.returned.iter().copied().collect(),
            mailbox: self.mailbox,
        }
    }

    fn transition(&mut self, slot: SlotIndex, from: SlotState, to: SlotState) -> Result<()> {
        let Some(state) = self.states.get_mut(slot.index()) else {
            return Err(AsyncError::LedgerCorrupted(format!(
                "slot {slot} out of range"
            )));
        };
        if *state != from {
            return Err(AsyncError::InvalidTransition {
                slot,
                from: *state,
                to,
            });
        }
        *state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(i: u32) -> SlotIndex {
        SlotIndex(i)
    }

    #[test]
    fn new_ledger_is_all_ready() {
        let ledger = SlotLedger::new(3);
        let snap = ledger.snapshot();
        assert_eq!(snap.ready, vec![s(0), s(1), s(2)]);
        assert!(snap.returned.is_empty());
        assert_eq!(snap.mailbox, None);
        ledger.check().unwrap();
    }

    #[test]
    fn full_cycle() {
        let mut ledger = SlotLedger::new(3);

        let a = ledger.acquire_next().unwrap();
        assert_eq!(ledger.state(a), SlotState::Computing);
        assert_eq!(ledger.publish(a).unwrap(), None);
        assert_eq!(ledger.state(a).owner(), QueueOwner::ToRender);

        assert_eq!(ledger.take().unwrap(), Some(a));
        assert_eq!(ledger.state(a).owner(), QueueOwner::Render);
        ledger.check().unwrap();

        ledger.begin_return(a).unwrap();
        assert_eq!(ledger.state(a).owner(), QueueOwner::ToCompute);
        assert_eq!(ledger.oldest_returning(), Some(a));

        assert_eq!(ledger.finish_return().unwrap(), Some(a));
        assert_eq!(ledger.state(a).owner(), QueueOwner::Compute);
        ledger.check().unwrap();
    }

    #[test]
    fn publish_displaces_to_ready() {
        let mut ledger = SlotLedger::new(3);
        let a = ledger.acquire_next().unwrap();
        let b = ledger.acquire_next().unwrap();

        ledger.publish(a).unwrap();
        assert_eq!(ledger.publish(b).unwrap(), Some(a));

        let snap = ledger.snapshot();
        assert_eq!(snap.mailbox, Some(b));
        assert_eq!(snap.ready, vec![s(2), a]);
        ledger.check().unwrap();
    }

    #[test]
    fn take_from_empty_mailbox() {
        let mut ledger = SlotLedger::new(2);
        assert_eq!(ledger.take().unwrap(), None);
    }

    #[test]
    fn rejects_invalid_transitions() {
        let mut ledger = SlotLedger::new(2);

        // Publishing a slot that was never dispatched.
        let err = ledger.publish(s(0)).unwrap_err();
        assert!(matches!(
            err,
            AsyncError::InvalidTransition {
                from: SlotState::Ready,
                to: SlotState::Published,
                ..
            }
        ));

        // Returning a slot that is not being rendered.
        assert!(ledger.begin_return(s(1)).is_err());

        // Out of range.
        assert!(matches!(
            ledger.publish(s(9)),
            Err(AsyncError::LedgerCorrupted(_))
        ));
    }

    #[test]
    fn finish_return_is_fifo() {
        let mut ledger = SlotLedger::new(3);
        for _ in 0..2 {
            let slot = ledger.acquire_next().unwrap();
            ledger.publish(slot).unwrap();
            let taken = ledger.take().unwrap().unwrap();
            ledger.begin_return(taken).unwrap();
        }

        assert_eq!(ledger.finish_return().unwrap(), Some(s(0)));
        assert_eq!(ledger.finish_return().unwrap(), Some(s(1)));
        assert_eq!(ledger.finish_return().unwrap(), None);
        ledger.check().unwrap();
    }

    #[test]
    fn ensure_rendering_only_accepts_held_slot() {
        let mut ledger = SlotLedger::new(2);
        let slot = ledger.acquire_next().unwrap();
        ledger.publish(slot).unwrap();
        ledger.take().unwrap();

        ledger.ensure_rendering(slot).unwrap();
        assert!(matches!(
            ledger.ensure_rendering(s(1)),
            Err(AsyncError::InvalidTransition {
                from: SlotState::Ready,
                ..
            })
        ));
        assert!(matches!(
            ledger.ensure_rendering(s(5)),
            Err(AsyncError::LedgerCorrupted(_))
        ));
        assert_eq!(ledger.state(s(1)), SlotState::Ready);
    }
}

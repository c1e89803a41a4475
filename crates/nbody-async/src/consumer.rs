//! Render-side view of the mailbox.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::stats::{RateLog, RunnerStats};
use crate::{SlotBackend, SlotIndex};

/// Anything the render loop can exchange slots with.
pub trait FrameSource {
    /// Hand back `previous` and get the newest published slot, or `previous`
    /// again when nothing newer exists. Blocks only when `previous` is `None`.
    fn try_to_return_and_get_next_buffer(&self, previous: Option<SlotIndex>) -> Result<SlotIndex>;
}

impl<B: SlotBackend> FrameSource for Mailbox<B> {
    fn try_to_return_and_get_next_buffer(&self, previous: Option<SlotIndex>) -> Result<SlotIndex> {
        self.try_take_and_return(previous)
    }
}

/// Slot chosen for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSelection {
    /// Slot to draw from.
    pub slot: SlotIndex,
    /// Slot drawn last frame.
    pub previous: Option<SlotIndex>,
    /// Whether `slot` differs from last frame's.
    ///
    /// A swapped-in slot was released by the compute queue and needs an
    /// acquire barrier on the render queue before it is read.
    pub swapped: bool,
}

/// Tracks the slot held by the render loop across frames.
#[derive(Debug)]
pub struct FrameConsumer {
    current: Option<SlotIndex>,
    rate: RateLog,
    stats: Option<Arc<RunnerStats>>,
}

impl Default for FrameConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameConsumer {
    pub fn new() -> Self {
        Self {
            current: None,
            rate: RateLog::per_second(Instant::now()),
            stats: None,
        }
    }

    /// Count frames and swaps into `stats`.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<RunnerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Slot currently held for rendering.
    pub fn current(&self) -> Option<SlotIndex> {
        self.current
    }

    /// Pick the slot to draw this frame.
    ///
    /// The first call blocks until data is available.
    pub fn next_frame(&mut self, source: &impl FrameSource) -> Result<FrameSelection> {
        let previous = self.current;
        let slot = source.try_to_return_and_get_next_buffer(previous)?;
        let swapped = previous != Some(slot);
        self.current = Some(slot);

        if let Some(stats) = &self.stats {
            stats.record_frame(swapped);
        }
        if let Some((frames, elapsed)) = self.rate.tick(Instant::now()) {
            info!("Rendered {frames} frames in {:.3}s", elapsed.as_secs_f32());
        }

        Ok(FrameSelection {
            slot,
            previous,
            swapped,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::error::AsyncError;

    /// Replays a fixed sequence of answers and records the slots handed back.
    struct Scripted {
        answers: RefCell<VecDeque<SlotIndex>>,
        returned: RefCell<Vec<Option<SlotIndex>>>,
    }

    impl Scripted {
        fn new(answers: &[u32]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().map(|&i| SlotIndex(i)).collect()),
                returned: RefCell::new(Vec::new()),
            }
        }
    }

    impl FrameSource for Scripted {
        fn try_to_return_and_get_next_buffer(&self, previous: Option<SlotIndex>) -> Result<SlotIndex> {
            self.returned.borrow_mut().push(previous);
            self.answers
                .borrow_mut()
                .pop_front()
                .ok_or(AsyncError::WorkerStopped)
        }
    }

    #[test]
    fn tracks_held_slot_and_swaps() {
        let source = Scripted::new(&[0, 0, 2, 1]);
        let stats = Arc::new(RunnerStats::new());
        let mut consumer = FrameConsumer::new().with_stats(Arc::clone(&stats));

        let first = consumer.next_frame(&source).unwrap();
        assert_eq!(first.previous, None);
        assert!(first.swapped);

        let same = consumer.next_frame(&source).unwrap();
        assert_eq!(same.previous, Some(SlotIndex(0)));
        assert!(!same.swapped);

        assert!(consumer.next_frame(&source).unwrap().swapped);
        assert!(consumer.next_frame(&source).unwrap().swapped);
        assert_eq!(consumer.current(), Some(SlotIndex(1)));

        assert_eq!(
            *source.returned.borrow(),
            vec![None, Some(SlotIndex(0)), Some(SlotIndex(0)), Some(SlotIndex(2))]
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames, 4);
        assert_eq!(snapshot.swaps, 3);
    }

    #[test]
    fn source_error_keeps_held_slot() {
        let source = Scripted::new(&[1]);
        let mut consumer = FrameConsumer::new();

        consumer.next_frame(&source).unwrap();
        assert!(matches!(
            consumer.next_frame(&source),
            Err(AsyncError::WorkerStopped)
        ));
        assert_eq!(consumer.current(), Some(SlotIndex(1)));
    }
}

//! Pending GPIO edges, counted down in PWM data-request cycles.
//!
//! The serializer does not emit a word until two further data requests
//! after the one that wrote it, so an edge meant to coincide with a given
//! word has to fire that many requests late. Edges wait here with a
//! remaining-request count and come due together with the data word whose
//! request they ride.

use alloc::vec::Vec;

use crate::bitstream::GpioEvent;

/// Data requests between a FIFO write and that word reaching the track.
pub const OUTPUT_DELAY: u32 = 2;

/// Ordered queue of `(event, remaining)` pairs, ascending by remaining.
///
/// The ascending order holds because every insertion uses the same
/// [`OUTPUT_DELAY`] and [`countdown`](Self::countdown) decrements uniformly;
/// if mixed delays are ever introduced this must become a real priority
/// queue. Equality is structural, over the whole pair sequence: the
/// compiler's loop detection depends on it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DelayedEventQueue {
    entries: Vec<(GpioEvent, u32)>,
}

impl DelayedEventQueue {
    pub fn new() -> DelayedEventQueue {
        DelayedEventQueue::default()
    }

    /// True when no edges are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue an edge to fire after [`OUTPUT_DELAY`] data requests.
    pub fn add(&mut self, event: GpioEvent) {
        self.entries.push((event, OUTPUT_DELAY));
    }

    /// Advance by one data request: remove and return the edges now due, in
    /// arrival order, and decrement the rest.
    pub fn countdown(&mut self) -> Vec<GpioEvent> {
        let cut = self
            .entries
            .iter()
            .position(|&(_, remaining)| remaining > 1)
            .unwrap_or(self.entries.len());
        let due = self.entries.drain(..cut).map(|(event, _)| event).collect();
        for entry in self.entries.iter_mut() {
            entry.1 -= 1;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::GpioEvent::*;

    #[test]
    fn edge_comes_due_after_output_delay() {
        let mut q = DelayedEventQueue::new();
        q.add(RailComCutoutStart);
        assert_eq!(q.countdown(), vec![]);
        assert_eq!(q.countdown(), vec![RailComCutoutStart]);
        assert!(q.is_empty());
    }

    #[test]
    fn due_edges_keep_arrival_order() {
        let mut q = DelayedEventQueue::new();
        q.add(RailComCutoutStart);
        q.add(DebugStart);
        q.countdown();
        assert_eq!(q.countdown(), vec![RailComCutoutStart, DebugStart]);
    }

    #[test]
    fn staggered_edges_fire_separately() {
        let mut q = DelayedEventQueue::new();
        q.add(DebugStart);
        assert_eq!(q.countdown(), vec![]);
        q.add(DebugEnd);
        assert_eq!(q.countdown(), vec![DebugStart]);
        assert_eq!(q.countdown(), vec![DebugEnd]);
        assert!(q.is_empty());
    }

    #[test]
    fn remaining_never_drops_below_one() {
        let mut q = DelayedEventQueue::new();
        q.add(RailComCutoutEnd);
        q.countdown();
        assert_eq!(q, {
            let mut expected = DelayedEventQueue::new();
            expected.entries.push((RailComCutoutEnd, 1));
            expected
        });
    }

    #[test]
    fn equality_is_structural() {
        let mut a = DelayedEventQueue::new();
        let mut b = DelayedEventQueue::new();
        assert_eq!(a, b);
        a.add(RailComCutoutStart);
        assert_ne!(a, b);
        b.add(RailComCutoutStart);
        assert_eq!(a, b);
        // Same event at a different remaining count is a different state.
        a.countdown();
        assert_ne!(a, b);
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        fn arb_event() -> impl Strategy<Value = GpioEvent> {
            prop_oneof![
                Just(GpioEvent::RailComCutoutStart),
                Just(GpioEvent::RailComCutoutEnd),
                Just(GpioEvent::DebugStart),
                Just(GpioEvent::DebugEnd),
            ]
        }

        proptest! {
            #[test]
            fn everything_drains_within_the_delay(
                events in proptest::collection::vec(arb_event(), 0..8)
            ) {
                let mut q = DelayedEventQueue::new();
                for &e in &events {
                    q.add(e);
                }
                let mut due = Vec::new();
                for _ in 0..OUTPUT_DELAY {
                    due.extend(q.countdown());
                }
                prop_assert!(q.is_empty());
                prop_assert_eq!(due, events);
            }
        }
    }
}

//! Handing committed graphs to the running DMA engine.
//!
//! The first graph starts the channel outright. Every later graph is
//! spliced in by rewriting the current graph's end-sentinel next pointer,
//! so the engine walks off the old graph and into the new one when it
//! finishes a traversal. The new graph's sentinel slot tells how far it has
//! got: nonzero once its start sentinel fires, negative once it has looped.
//! Both waits are expected to last microseconds (the engine is already
//! running towards its end sentinel), so they spin rather than yield.

use core::hint::spin_loop;

use crate::commit::{CommittedGraph, UncachedRegion};

/// Minimal control over the DMA channel: aim it and set it running.
pub trait WaveChannel {
    /// Point the channel's control-block register at `bus_address` and
    /// activate the channel.
    fn start(&mut self, bus_address: u32);
}

/// Owns the transmitting graph and swaps in successors.
pub struct QueueController<C, R: UncachedRegion> {
    channel: C,
    current: Option<CommittedGraph<R>>,
}

impl<C: WaveChannel, R: UncachedRegion> QueueController<C, R> {
    pub fn new(channel: C) -> QueueController<C, R> {
        QueueController {
            channel,
            current: None,
        }
    }

    /// True once some graph has been handed to the channel.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Make `graph` the transmitting graph.
    ///
    /// Returns once the engine has entered the graph and completed one full
    /// traversal. The predecessor's memory is released as soon as the
    /// engine has moved past its end sentinel, which is what the first wait
    /// observes.
    pub fn enqueue(&mut self, graph: CommittedGraph<R>) {
        match &self.current {
            None => self.channel.start(graph.bus_address()),
            Some(current) => current.rewrite_next(graph.bus_address()),
        }
        while !graph.is_transmitting() {
            spin_loop();
        }
        // The old graph can never be revisited; dropping it frees the
        // backing region.
        let graph = self.current.insert(graph);
        while !graph.is_repeating() {
            spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{Bitstream, Event};
    use crate::block::PeripheralMap;
    use crate::commit::testutil::TestAlloc;
    use crate::commit::{commit, CommittedGraph};
    use crate::compile::compile;
    use core::ptr;

    const MAP: PeripheralMap = PeripheralMap {
        peripheral_base: 0x7E00_0000,
        pwm_fifo: 0x7E20_C018,
        pwm_range1: 0x7E20_C010,
        gpio_set0: 0x7E20_001C,
        railcom_pin: 17,
        debug_pin: 27,
    };

    #[derive(Default)]
    struct RecordingChannel {
        started: Vec<u32>,
    }

    impl WaveChannel for &mut RecordingChannel {
        fn start(&mut self, bus_address: u32) {
            self.started.push(bus_address);
        }
    }

    fn committed(
        alloc: &mut TestAlloc,
        word: u32,
    ) -> CommittedGraph<crate::commit::testutil::TestRegion> {
        let bs = Bitstream::new(vec![Event::Data { word, size: 32 }], 58);
        let graph = compile(&bs, &MAP).unwrap();
        commit(graph, &MAP, alloc).unwrap()
    }

    /// Mark a committed graph's sentinel slot as already looping, standing
    /// in for the engine the unit tests do not run.
    fn mark_repeating<R: UncachedRegion>(alloc: &TestAlloc, graph: &CommittedGraph<R>) {
        // Data slot 0 follows the four blocks of a one-word graph.
        let slot = alloc.cpu_at(graph.bus_address() + 4 * 32);
        unsafe { ptr::write_volatile(slot, 0xFFFF_FFFF) };
    }

    #[test]
    fn first_enqueue_starts_the_channel() {
        let mut alloc = TestAlloc::new();
        let graph = committed(&mut alloc, 0xAAAA_AAAA);
        let bus = graph.bus_address();
        mark_repeating(&alloc, &graph);

        let mut channel = RecordingChannel::default();
        let mut controller = QueueController::new(&mut channel);
        assert!(!controller.is_active());
        controller.enqueue(graph);
        assert!(controller.is_active());
        drop(controller);
        assert_eq!(channel.started, vec![bus]);
    }

    #[test]
    fn second_enqueue_rewires_instead_of_restarting() {
        let mut alloc = TestAlloc::new();
        let first = committed(&mut alloc, 0xAAAA_AAAA);
        let second = committed(&mut alloc, 0x5555_5555);
        let first_bus = first.bus_address();
        let second_bus = second.bus_address();
        mark_repeating(&alloc, &first);
        mark_repeating(&alloc, &second);

        let mut channel = RecordingChannel::default();
        let mut controller = QueueController::new(&mut channel);
        controller.enqueue(first);
        controller.enqueue(second);
        drop(controller);

        // The channel was only started once.
        assert_eq!(channel.started, vec![first_bus]);
        // The first graph's end sentinel now fetches the second graph.
        let next_field = alloc.cpu_at(first_bus + 3 * 32 + 20);
        assert_eq!(unsafe { ptr::read_volatile(next_field) }, second_bus);
    }
}

//! The bitstream compiler: logical events in, DMA program out.
//!
//! # Concept of operation
//!
//! The compiler walks the bitstream accumulating data words, flushing them
//! into FIFO burst blocks at the points where something else has to happen:
//! the word size changes (the accumulated words go out, then a range-write
//! retunes the serializer), or queued GPIO edges come due (the burst goes
//! out including the word whose data request the edges must ride, then the
//! edge block). GPIO events never flush by themselves; they wait in the
//! [`DelayedEventQueue`] for the serializer's two-request output latency.
//!
//! The bitstream repeats forever, so the emitted blocks must close into a
//! cycle. The repeating section can only loop back onto a block that was
//! emitted under the same pending-edge state, otherwise edges would fire in
//! the wrong place on later cycles. The compiler therefore snapshots the
//! queue each time an accumulation begins and keeps re-walking the
//! repeating section, unrolling it into the graph, until it reaches a
//! bitstream position whose snapshot equals the live queue. The queue can
//! only take finitely many values and every pass visits the same positions,
//! so a repeat is guaranteed; with no pending edges at the loop point the
//! very first revisit closes the loop and nothing is unrolled.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::bitstream::{Bitstream, Event};
use crate::block::{ControlBlock, ControlBlockBuilder, PeripheralMap};
use crate::queue::DelayedEventQueue;

/// Compilation failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompileError {
    /// A traversal of the bitstream contains no data words, so there is no
    /// data request to hang the waveform on. The producer should prepend
    /// idle bits.
    BitstreamContainsNoData,
}

impl core::fmt::Display for CompileError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            CompileError::BitstreamContainsNoData => {
                write!(f, "bitstream contains no data words")
            }
        }
    }
}

/// A compiled DMA program, internal addresses still relative.
///
/// Execution enters at block 0 (the start sentinel) and cycles through the
/// block the end sentinel points back at. [`crate::commit`] turns it into
/// something the engine can run.
#[derive(Clone, Debug)]
pub struct CompiledGraph {
    pub blocks: Vec<ControlBlock>,
    pub data: Vec<u32>,
    /// Block index the end sentinel loops back to.
    pub loop_target: usize,
    /// One traversal's duration on the track, in microseconds.
    pub duration_us: u64,
}

/// Compile `bitstream` into a control-block graph targeting `map`.
pub fn compile(
    bitstream: &Bitstream,
    map: &PeripheralMap,
) -> Result<CompiledGraph, CompileError> {
    Compiler::new(map).run(bitstream)
}

struct Compiler<'a> {
    builder: ControlBlockBuilder<'a>,
    /// Range register value as programmed so far, 0 meaning never set.
    range: u32,
    /// Words accumulated but not yet emitted as a burst.
    pending: Vec<u32>,
    /// Word size shared by everything in `pending`.
    pending_size: u32,
    /// Bitstream index at which `pending` began.
    pending_start: usize,
    /// Live queue of edges waiting out the output latency.
    delayed: DelayedEventQueue,
    /// Bitstream index to burst block emitted for the accumulation that
    /// began there.
    block_for_index: BTreeMap<usize, usize>,
    /// Bitstream index to queue snapshot taken when accumulation began
    /// there. Snapshot equality with the live queue is the loop-close test.
    events_for_index: BTreeMap<usize, DelayedEventQueue>,
}

impl<'a> Compiler<'a> {
    fn new(map: &'a PeripheralMap) -> Compiler<'a> {
        Compiler {
            builder: ControlBlockBuilder::new(map),
            range: 0,
            pending: Vec::new(),
            pending_size: 0,
            pending_start: 0,
            delayed: DelayedEventQueue::new(),
            block_for_index: BTreeMap::new(),
            events_for_index: BTreeMap::new(),
        }
    }

    fn run(mut self, bitstream: &Bitstream) -> Result<CompiledGraph, CompileError> {
        self.builder.start_sentinel();
        let events = bitstream.events();
        let mut restart_from = 0;
        let loop_target;

        'close: loop {
            let mut saw_data = false;
            let mut i = restart_from;
            while i < events.len() {
                match events[i] {
                    Event::Data { word, size } => {
                        saw_data = true;
                        if let Some(target) = self.data_event(i, word, size) {
                            loop_target = target;
                            break 'close;
                        }
                    }
                    Event::Gpio(event) => self.delayed.add(event),
                    Event::LoopStart => {
                        restart_from = i + 1;
                        if !self.pending.is_empty() {
                            // Clean block boundary at the loop point; later
                            // passes never cross it, so no index is
                            // recorded for the flushed burst.
                            self.flush_pending();
                        }
                    }
                }
                i += 1;
            }
            if !saw_data {
                return Err(CompileError::BitstreamContainsNoData);
            }
        }

        if !self.pending.is_empty() {
            self.flush_pending();
        }
        self.builder.end_sentinel(loop_target);
        let (blocks, data) = self.builder.into_parts();
        Ok(CompiledGraph {
            blocks,
            data,
            loop_target,
            duration_us: bitstream.duration_us(),
        })
    }

    /// Handle the data word at bitstream index `i`. Returns the loop-close
    /// target once the traversal state repeats.
    fn data_event(&mut self, i: usize, word: u32, size: u32) -> Option<usize> {
        // Close the loop if this position was previously reached with the
        // same pending-edge state: everything from here on is already in
        // the graph.
        if self.events_for_index.get(&i) == Some(&self.delayed) {
            if let Some(&block) = self.block_for_index.get(&i) {
                return Some(block);
            }
            if i == self.pending_start && !self.pending.is_empty() {
                // The accumulation wrapped back onto its own start without
                // ever hitting a block boundary.
                return Some(self.flush_pending());
            }
        }

        if !self.pending.is_empty() && size != self.pending_size {
            let block = self.flush_pending();
            self.block_for_index.insert(self.pending_start, block);
        }
        if self.pending.is_empty() {
            self.pending_start = i;
            self.events_for_index.insert(i, self.delayed.clone());
        }
        self.pending.push(word);
        self.pending_size = size;

        let due = self.delayed.countdown();
        if !due.is_empty() {
            // The edges ride this word's data request: the burst must end
            // with it, and the edge block follows immediately.
            let block = self.flush_pending();
            self.block_for_index.insert(self.pending_start, block);
            self.builder.gpio_edges(&due);
        }
        None
    }

    /// Emit the pending words as a burst, followed by a range-write when
    /// their size differs from the programmed range. Returns the burst's
    /// block index.
    fn flush_pending(&mut self) -> usize {
        let block = self.builder.data_burst(&self.pending);
        self.pending.clear();
        if self.pending_size != self.range {
            self.builder.range_write(self.pending_size);
            self.range = self.pending_size;
        }
        block
    }
}

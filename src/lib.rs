//! # Trackwave
//!
//! Core of a DCC (Digital Command Control) waveform driver for boards whose
//! programmable I/O is a PWM serializer fed by a DMA engine.
//!
//! # Concept of operation
//!
//! The track signal is produced by the PWM peripheral in serializer mode:
//! every word the DMA engine writes to its FIFO is shifted out bit by bit at
//! a fixed bit rate, and the range register says how many bits of each word
//! to shift. A DCC one-bit is the two serializer bits `10`, a zero-bit is
//! `1100`. RailCom cutouts and debug markers are GPIO edges that must land
//! on exact bit boundaries within that stream.
//!
//! Two hardware facts shape everything here. First, the serializer does not
//! emit a word until two further data requests after the one that wrote it,
//! so a GPIO edge meant to coincide with a word has to be issued two
//! requests late; [`queue::DelayedEventQueue`] holds edges for exactly that
//! long. Second, the DMA engine runs a linked list of control blocks with no
//! CPU involvement, so the whole repeating waveform (FIFO writes, range
//! retunes, GPIO edges) is compiled up front by [`compile::compile`] into
//! one self-contained cyclic graph. When the pending-edge state at the loop
//! point differs between the first and later traversals the loop cannot
//! close immediately and the compiler unrolls the repeating section until a
//! previously seen state recurs.
//!
//! A compiled graph still refers to itself by byte offsets. [`commit`]
//! relocates it into DMA-visible uncached memory, and
//! [`schedule::QueueController`] either starts the channel on it or splices
//! it after the currently transmitting graph by rewriting a single next
//! pointer, watching the graph's sentinel slot to see the engine arrive.
//!
//! The crate is hardware-free: the memory allocator and the DMA channel are
//! traits, and the peripheral addresses travel in a [`block::PeripheralMap`]
//! supplied by the platform layer.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bitstream;
pub mod block;
pub mod commit;
pub mod compile;
pub mod packet;
pub mod queue;
pub mod schedule;

pub use bitstream::{Bitstream, BitstreamBuilder, Event, GpioEvent};
pub use block::{ControlBlock, PeripheralMap};
pub use commit::{commit, CommittedGraph, UncachedAlloc, UncachedRegion};
pub use compile::{compile, CompileError, CompiledGraph};
pub use packet::Packet;
pub use queue::DelayedEventQueue;
pub use schedule::{QueueController, WaveChannel};

//! Logical DCC bitstreams: what the track should carry, before compilation
//! into a DMA program.
//!
//! A bitstream is a flat sequence of events: packed data words for the PWM
//! serializer, GPIO edges pinned to the boundary between two words, and an
//! optional loop point. [`BitstreamBuilder`] produces that form from DCC
//! bits: a one-bit is the two serializer bits `10`, a zero-bit is `1100`,
//! one serializer bit lasting [`BIT_PERIOD_US`] microseconds. A partial
//! word is flushed before any GPIO event so the edge lands exactly on a
//! word boundary; that is what gives data words their variable size.

use alloc::vec::Vec;

use crate::packet::Packet;

/// Serializer bit period in microseconds.
///
/// A DCC one-bit is two serializer bits (58 µs halves) and a zero-bit four
/// (116 µs halves), both inside the decoder acceptance windows.
pub const BIT_PERIOD_US: u64 = 58;

/// Width of a PWM data word in bits.
pub const WORD_BITS: u32 = 32;

/// One-bits in the preamble ahead of every packet.
const PREAMBLE_BITS: usize = 14;

/// One-bits bridged by the RailCom cutout window (4 x 116 µs = 464 µs).
const CUTOUT_ONE_BITS: usize = 4;

/// A point-in-time GPIO edge carried by the bitstream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GpioEvent {
    /// RailCom cutout opens: cutout pin driven low.
    RailComCutoutStart,
    /// RailCom cutout closes: cutout pin driven high.
    RailComCutoutEnd,
    /// Scope trigger on: debug pin driven high.
    DebugStart,
    /// Scope trigger off: debug pin driven low.
    DebugEnd,
}

/// One bitstream event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// `size` significant bits of `word`, serialized MSB-first. The
    /// significant bits occupy the top of the word.
    Data { word: u32, size: u32 },
    /// A GPIO edge, due on the boundary reached by the preceding word.
    Gpio(GpioEvent),
    /// Traversal restarts after this point on every cycle but the first.
    LoopStart,
}

/// A finite event sequence plus its duration on the track.
#[derive(Clone, Debug, Default)]
pub struct Bitstream {
    events: Vec<Event>,
    duration_us: u64,
}

impl Bitstream {
    /// Assemble a bitstream directly from events.
    ///
    /// For producers that compute their own word packing;
    /// [`BitstreamBuilder`] is the usual route.
    pub fn new(events: Vec<Event>, duration_us: u64) -> Bitstream {
        Bitstream { events, duration_us }
    }

    /// The event sequence, in track order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Time one full traversal occupies on the track, in microseconds.
    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }
}

/// Packs DCC bits, edges, and the loop point into a [`Bitstream`].
#[derive(Debug, Default)]
pub struct BitstreamBuilder {
    events: Vec<Event>,
    acc: u32,
    acc_bits: u32,
    duration_us: u64,
    seen_loop: bool,
}

impl BitstreamBuilder {
    pub fn new() -> BitstreamBuilder {
        BitstreamBuilder::default()
    }

    /// Append one DCC one-bit: 58 µs high, 58 µs low.
    pub fn one(&mut self) {
        self.push_bit(true);
        self.push_bit(false);
    }

    /// Append one DCC zero-bit: 116 µs high, 116 µs low.
    pub fn zero(&mut self) {
        self.push_bit(true);
        self.push_bit(true);
        self.push_bit(false);
        self.push_bit(false);
    }

    /// Append a framed packet: preamble, zero-framed bytes, one end bit.
    pub fn packet(&mut self, packet: &Packet) {
        for _ in 0..PREAMBLE_BITS {
            self.one();
        }
        for &byte in packet.bytes() {
            self.zero();
            for i in (0..8).rev() {
                if byte & (1 << i) != 0 {
                    self.one();
                } else {
                    self.zero();
                }
            }
        }
        self.one();
    }

    /// Append a RailCom cutout window.
    ///
    /// The window opens on the boundary this call is made at, typically the
    /// packet end bit, and closes four one-bits (464 µs) later. The stream
    /// keeps carrying ordinary one-bits underneath; the cutout circuit
    /// shorts the track while the pin is low.
    pub fn railcom_cutout(&mut self) {
        self.gpio(GpioEvent::RailComCutoutStart);
        for _ in 0..CUTOUT_ONE_BITS {
            self.one();
        }
        self.gpio(GpioEvent::RailComCutoutEnd);
    }

    /// Append a GPIO edge, flushing any partial word first so the edge
    /// stays pinned to its bit position.
    pub fn gpio(&mut self, event: GpioEvent) {
        self.flush_word();
        self.events.push(Event::Gpio(event));
    }

    /// Mark the loop point: traversal restarts here on every cycle after
    /// the first. At most one per bitstream.
    pub fn loop_start(&mut self) {
        assert!(!self.seen_loop, "bitstream already has a loop point");
        self.seen_loop = true;
        self.flush_word();
        self.events.push(Event::LoopStart);
    }

    /// Finish the bitstream, flushing any partial word.
    pub fn finish(mut self) -> Bitstream {
        self.flush_word();
        Bitstream {
            events: self.events,
            duration_us: self.duration_us,
        }
    }

    fn push_bit(&mut self, bit: bool) {
        self.acc = (self.acc << 1) | bit as u32;
        self.acc_bits += 1;
        self.duration_us += BIT_PERIOD_US;
        if self.acc_bits == WORD_BITS {
            self.flush_word();
        }
    }

    fn flush_word(&mut self) {
        if self.acc_bits > 0 {
            self.events.push(Event::Data {
                word: self.acc << (WORD_BITS - self.acc_bits),
                size: self.acc_bits,
            });
            self.acc = 0;
            self.acc_bits = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_events(b: &Bitstream) -> Vec<(u32, u32)> {
        b.events()
            .iter()
            .filter_map(|e| match *e {
                Event::Data { word, size } => Some((word, size)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ones_and_zeros_pack_msb_first() {
        let mut b = BitstreamBuilder::new();
        b.one();
        b.zero();
        let bs = b.finish();
        // `10` then `1100`, six significant bits at the top of the word.
        assert_eq!(data_events(&bs), vec![(0b101100 << 26, 6)]);
        assert_eq!(bs.duration_us(), 6 * BIT_PERIOD_US);
    }

    #[test]
    fn full_words_flush_at_32_bits() {
        let mut b = BitstreamBuilder::new();
        for _ in 0..16 {
            b.one();
        }
        let bs = b.finish();
        assert_eq!(data_events(&bs), vec![(0xAAAA_AAAA, 32)]);
    }

    #[test]
    fn gpio_event_flushes_partial_word() {
        let mut b = BitstreamBuilder::new();
        b.one();
        b.gpio(GpioEvent::DebugStart);
        b.one();
        let bs = b.finish();
        assert_eq!(
            bs.events(),
            &[
                Event::Data { word: 0b10 << 30, size: 2 },
                Event::Gpio(GpioEvent::DebugStart),
                Event::Data { word: 0b10 << 30, size: 2 },
            ]
        );
    }

    #[test]
    fn packet_framing() {
        let mut b = BitstreamBuilder::new();
        b.packet(&Packet::idle());
        let bs = b.finish();
        // Idle packet 0xFF 0x00 0xFF: 14 preamble ones plus 17 data ones
        // (two 0xFF bytes and the end bit), 11 zeros (three start bits and
        // the 0x00 byte).
        let ones: u64 = 14 + 8 + 8 + 1;
        let zeros: u64 = 3 + 8;
        let serializer_bits = ones * 2 + zeros * 4;
        let packed: u64 = data_events(&bs).iter().map(|&(_, size)| size as u64).sum();
        assert_eq!(packed, serializer_bits);
        assert_eq!(bs.duration_us(), serializer_bits * BIT_PERIOD_US);
    }

    #[test]
    fn cutout_duration() {
        let mut b = BitstreamBuilder::new();
        b.railcom_cutout();
        let bs = b.finish();
        assert_eq!(bs.events().len(), 3);
        assert_eq!(bs.duration_us(), 4 * 2 * BIT_PERIOD_US);
    }

    #[test]
    #[should_panic(expected = "loop point")]
    fn second_loop_start_panics() {
        let mut b = BitstreamBuilder::new();
        b.loop_start();
        b.loop_start();
    }
}

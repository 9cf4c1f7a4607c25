//! DMA control blocks and the builder that emits them.
//!
//! A control block is one node of the DMA engine's program: a fixed-layout
//! record the engine fetches, executes as a single transfer, and follows to
//! the next. During compilation every internal address is a byte offset
//! (into the data vector, or for the sentinel literals into the
//! control-block vector itself) and only becomes a bus address at commit
//! time. Offsets and peripheral registers are told apart by comparison
//! against the peripheral bus base: anything below it is an offset.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::bitstream::GpioEvent;

/// Size of one control block in bytes, reserved words included.
pub const CONTROL_BLOCK_SIZE: u32 = 32;

/// Bytes per data word.
pub const WORD_SIZE: u32 = 4;

/// Literal the start sentinel writes to data slot 0.
pub const SENTINEL_RUNNING: u32 = 1;

/// Literal the end sentinel writes to data slot 0.
pub const SENTINEL_LOOPED: u32 = -1i32 as u32;

/// Byte offset of a block's first reserved word, where sentinels keep the
/// literal they write.
const LITERAL_OFFSET: u32 = 24;

bitflags! {
    /// Transfer-information flags, matching the engine's TI register field.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct TransferInfo: u32 {
        /// Interrupt when the transfer completes.
        const INTEN = 1 << 0;
        /// Two-dimensional transfer: length holds rows and bytes per row,
        /// stride is added at the end of each row.
        const TD_MODE = 1 << 1;
        /// Wait for the write response before proceeding.
        const WAIT_RESP = 1 << 3;
        /// Increment the destination address per write.
        const DEST_INC = 1 << 4;
        /// Gate destination writes on the mapped peripheral's data request.
        const DEST_DREQ = 1 << 6;
        /// Increment the source address per read.
        const SRC_INC = 1 << 8;
        /// Peripheral mapping: pace transfers with the PWM's data requests.
        const PERMAP_PWM = 5 << 16;
        /// Never issue writes wider than 32 bits.
        const NO_WIDE_BURSTS = 1 << 26;
    }
}

/// One DMA control block, hardware layout.
///
/// Six live fields and two reserved words, 32-byte aligned on the bus,
/// little-endian. The engine ignores the reserved words; the start and end
/// sentinels use the first one to hold the literal they write.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlBlock {
    pub transfer_information: u32,
    pub source_address: u32,
    pub destination_address: u32,
    pub transfer_length: u32,
    pub td_mode_stride: u32,
    pub next_control_block_address: u32,
    pub reserved: [u32; 2],
}

/// Encode a two-dimensional transfer length: `rows` rows of `row_bytes`.
pub fn td_transfer_length(rows: u16, row_bytes: u16) -> u32 {
    ((rows as u32) << 16) | row_bytes as u32
}

/// Encode the signed per-row strides, destination in the high half.
pub fn td_stride(dest: i16, src: i16) -> u32 {
    ((dest as u16 as u32) << 16) | src as u16 as u32
}

/// Bus addresses and pin assignment the compiled graph targets.
///
/// Values are board-specific and supplied by the platform layer. The
/// compiler only requires every register address to be at or above
/// `peripheral_base`, so relative offsets stay distinguishable.
#[derive(Copy, Clone, Debug)]
pub struct PeripheralMap {
    /// Lowest peripheral bus address; anything below is a relative offset.
    pub peripheral_base: u32,
    /// PWM FIFO input register.
    pub pwm_fifo: u32,
    /// PWM channel-1 range register.
    pub pwm_range1: u32,
    /// GPIO output-set register for pins 0-31. The set pair, one reserved
    /// word, then the clear pair follow contiguously.
    pub gpio_set0: u32,
    /// Pin driving the RailCom cutout circuit, low while the cutout is open.
    pub railcom_pin: u8,
    /// Pin raised between DebugStart and DebugEnd.
    pub debug_pin: u8,
}

/// Appends typed control blocks and their backing data words.
///
/// A pure appender: block references are vector indices until relocation
/// and the builder never revisits what it has emitted. Data slot 0 is the
/// sentinel slot, zero until the start sentinel first fires.
#[derive(Debug)]
pub struct ControlBlockBuilder<'a> {
    map: &'a PeripheralMap,
    blocks: Vec<ControlBlock>,
    data: Vec<u32>,
}

impl<'a> ControlBlockBuilder<'a> {
    pub fn new(map: &'a PeripheralMap) -> ControlBlockBuilder<'a> {
        let mut data = Vec::new();
        data.push(0);
        ControlBlockBuilder {
            map,
            blocks: Vec::new(),
            data,
        }
    }

    /// Index the next emitted block will occupy.
    pub fn next_index(&self) -> usize {
        self.blocks.len()
    }

    /// Emit the start sentinel: writes 1 to the sentinel slot and continues
    /// to the following block.
    pub fn start_sentinel(&mut self) -> usize {
        let next = self.blocks.len() + 1;
        self.sentinel(SENTINEL_RUNNING, next)
    }

    /// Emit the end sentinel: writes −1 to the sentinel slot and loops back
    /// to `loop_target`.
    pub fn end_sentinel(&mut self, loop_target: usize) -> usize {
        self.sentinel(SENTINEL_LOOPED, loop_target)
    }

    fn sentinel(&mut self, literal: u32, next: usize) -> usize {
        let index = self.blocks.len();
        self.blocks.push(ControlBlock {
            transfer_information: TransferInfo::WAIT_RESP.bits(),
            // The literal lives in this block's own reserved word, so the
            // source offset is into the control-block vector.
            source_address: index as u32 * CONTROL_BLOCK_SIZE + LITERAL_OFFSET,
            destination_address: 0,
            transfer_length: WORD_SIZE,
            td_mode_stride: 0,
            next_control_block_address: next as u32 * CONTROL_BLOCK_SIZE,
            reserved: [literal, 0],
        });
        index
    }

    /// Emit a burst writing `words` to the PWM FIFO, one per data request.
    pub fn data_burst(&mut self, words: &[u32]) -> usize {
        assert!(!words.is_empty(), "empty data burst");
        let source = self.push_data(words);
        let dest = self.map.pwm_fifo;
        self.push_block(
            TransferInfo::NO_WIDE_BURSTS
                | TransferInfo::PERMAP_PWM
                | TransferInfo::SRC_INC
                | TransferInfo::DEST_DREQ
                | TransferInfo::WAIT_RESP,
            source,
            dest,
            words.len() as u32 * WORD_SIZE,
            0,
        )
    }

    /// Emit a write of `size` to the PWM channel-1 range register, retuning
    /// how many bits of each following word are serialized.
    pub fn range_write(&mut self, size: u32) -> usize {
        let source = self.push_data(&[size]);
        let dest = self.map.pwm_range1;
        self.push_block(TransferInfo::WAIT_RESP, source, dest, WORD_SIZE, 0)
    }

    /// Emit a GPIO edge block for the events in `due`: one two-dimensional
    /// transfer covering the set pair and, skipping the reserved register
    /// between them, the clear pair.
    pub fn gpio_edges(&mut self, due: &[GpioEvent]) -> usize {
        assert!(!due.is_empty(), "GPIO block with nothing due");
        let (set, clear) = self.masks(due);
        let source = self.push_data(&[
            set as u32,
            (set >> 32) as u32,
            clear as u32,
            (clear >> 32) as u32,
        ]);
        let dest = self.map.gpio_set0;
        self.push_block(
            TransferInfo::TD_MODE
                | TransferInfo::SRC_INC
                | TransferInfo::DEST_INC
                | TransferInfo::WAIT_RESP,
            source,
            dest,
            td_transfer_length(2, 2 * WORD_SIZE as u16),
            td_stride(WORD_SIZE as i16, 0),
        )
    }

    /// Tear down into the block and data vectors.
    pub fn into_parts(self) -> (Vec<ControlBlock>, Vec<u32>) {
        (self.blocks, self.data)
    }

    /// 64-pin set and clear masks for `due`, later events superseding
    /// earlier ones for the same pin.
    fn masks(&self, due: &[GpioEvent]) -> (u64, u64) {
        let mut set = 0u64;
        let mut clear = 0u64;
        for &event in due {
            let (pin, high) = match event {
                GpioEvent::RailComCutoutStart => (self.map.railcom_pin, false),
                GpioEvent::RailComCutoutEnd => (self.map.railcom_pin, true),
                GpioEvent::DebugStart => (self.map.debug_pin, true),
                GpioEvent::DebugEnd => (self.map.debug_pin, false),
            };
            let bit = 1u64 << pin;
            if high {
                clear &= !bit;
                set |= bit;
            } else {
                set &= !bit;
                clear |= bit;
            }
        }
        (set, clear)
    }

    fn push_data(&mut self, words: &[u32]) -> u32 {
        let offset = self.data.len() as u32 * WORD_SIZE;
        self.data.extend_from_slice(words);
        offset
    }

    fn push_block(
        &mut self,
        info: TransferInfo,
        source: u32,
        dest: u32,
        length: u32,
        stride: u32,
    ) -> usize {
        let index = self.blocks.len();
        self.blocks.push(ControlBlock {
            transfer_information: info.bits(),
            source_address: source,
            destination_address: dest,
            transfer_length: length,
            td_mode_stride: stride,
            next_control_block_address: (index as u32 + 1) * CONTROL_BLOCK_SIZE,
            reserved: [0, 0],
        });
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::GpioEvent::*;

    pub(crate) const TEST_MAP: PeripheralMap = PeripheralMap {
        peripheral_base: 0x7E00_0000,
        pwm_fifo: 0x7E20_C018,
        pwm_range1: 0x7E20_C010,
        gpio_set0: 0x7E20_001C,
        railcom_pin: 17,
        debug_pin: 27,
    };

    #[test]
    fn control_block_matches_hardware_layout() {
        assert_eq!(core::mem::size_of::<ControlBlock>(), 32);
        assert_eq!(core::mem::align_of::<ControlBlock>(), 4);
    }

    #[test]
    fn sentinels_write_their_reserved_literal_to_slot_zero() {
        let mut b = ControlBlockBuilder::new(&TEST_MAP);
        b.start_sentinel();
        b.end_sentinel(1);
        let (blocks, data) = b.into_parts();
        assert_eq!(data, vec![0]);

        let start = &blocks[0];
        assert_eq!(start.reserved[0], SENTINEL_RUNNING);
        assert_eq!(start.source_address, LITERAL_OFFSET);
        assert_eq!(start.destination_address, 0);
        assert_eq!(start.transfer_length, 4);
        assert_eq!(start.next_control_block_address, CONTROL_BLOCK_SIZE);

        let end = &blocks[1];
        assert_eq!(end.reserved[0], SENTINEL_LOOPED);
        assert_eq!(end.source_address, CONTROL_BLOCK_SIZE + LITERAL_OFFSET);
        assert_eq!(end.next_control_block_address, CONTROL_BLOCK_SIZE);
    }

    #[test]
    fn data_burst_targets_fifo_with_dreq_pacing() {
        let mut b = ControlBlockBuilder::new(&TEST_MAP);
        b.data_burst(&[0xAAAA_AAAA, 0x5555_5555]);
        let (blocks, data) = b.into_parts();
        assert_eq!(data, vec![0, 0xAAAA_AAAA, 0x5555_5555]);
        let burst = &blocks[0];
        assert_eq!(burst.source_address, 4);
        assert_eq!(burst.destination_address, TEST_MAP.pwm_fifo);
        assert_eq!(burst.transfer_length, 8);
        let info = TransferInfo::from_bits(burst.transfer_information).unwrap();
        assert!(info.contains(TransferInfo::DEST_DREQ));
        assert!(info.contains(TransferInfo::PERMAP_PWM));
        assert!(info.contains(TransferInfo::SRC_INC));
        assert!(info.contains(TransferInfo::NO_WIDE_BURSTS));
        assert!(!info.contains(TransferInfo::DEST_INC));
    }

    #[test]
    fn range_write_targets_range_register() {
        let mut b = ControlBlockBuilder::new(&TEST_MAP);
        b.range_write(24);
        let (blocks, data) = b.into_parts();
        assert_eq!(data, vec![0, 24]);
        assert_eq!(blocks[0].destination_address, TEST_MAP.pwm_range1);
        assert_eq!(blocks[0].transfer_length, 4);
    }

    #[test]
    fn gpio_block_is_two_rows_skipping_reserved_register() {
        let mut b = ControlBlockBuilder::new(&TEST_MAP);
        b.gpio_edges(&[RailComCutoutStart, DebugStart]);
        let (blocks, data) = b.into_parts();
        // Set mask raises the debug pin, clear mask drops the cutout pin.
        assert_eq!(data, vec![0, 1 << 27, 0, 1 << 17, 0]);
        let gpio = &blocks[0];
        assert_eq!(gpio.destination_address, TEST_MAP.gpio_set0);
        assert_eq!(gpio.transfer_length, td_transfer_length(2, 8));
        assert_eq!(gpio.td_mode_stride, td_stride(4, 0));
        let info = TransferInfo::from_bits(gpio.transfer_information).unwrap();
        assert!(info.contains(TransferInfo::TD_MODE));
        assert!(info.contains(TransferInfo::DEST_INC));
    }

    #[test]
    fn later_edge_supersedes_earlier_for_same_pin() {
        let b = ControlBlockBuilder::new(&TEST_MAP);
        let (set, clear) = b.masks(&[RailComCutoutStart, RailComCutoutEnd]);
        assert_eq!(set, 1 << 17);
        assert_eq!(clear, 0);
        let (set, clear) = b.masks(&[DebugStart, DebugEnd]);
        assert_eq!(set, 0);
        assert_eq!(clear, 1 << 27);
    }

    #[test]
    fn no_pin_in_both_masks() {
        let b = ControlBlockBuilder::new(&TEST_MAP);
        let due = [RailComCutoutStart, DebugStart, RailComCutoutEnd, DebugEnd];
        let (set, clear) = b.masks(&due);
        assert_eq!(set & clear, 0);
    }

    #[test]
    #[should_panic(expected = "nothing due")]
    fn empty_due_list_panics() {
        let mut b = ControlBlockBuilder::new(&TEST_MAP);
        b.gpio_edges(&[]);
    }
}

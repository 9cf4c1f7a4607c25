//! Committing a compiled graph into DMA-visible memory.
//!
//! Compilation leaves every internal address as a byte offset; the engine
//! needs bus addresses. Committing allocates one uncached region, laid out
//! control blocks first and data after, rewrites each offset against the
//! region's bus address, and copies the graph in. Sentinel blocks are the
//! one special case: their destination is internal (the sentinel slot), and
//! their source points at the literal carried in their own reserved word,
//! so it relocates against the block area rather than the data area.
//!
//! From the moment the engine is pointed at the region, software touches it
//! in exactly two ways: reading the sentinel slot, and the single aligned
//! store that rewrites the end sentinel's next pointer at handoff.

use core::sync::atomic::{fence, Ordering};

use crate::block::{PeripheralMap, CONTROL_BLOCK_SIZE, WORD_SIZE};
use crate::compile::CompiledGraph;

/// Words per control block.
const BLOCK_WORDS: usize = (CONTROL_BLOCK_SIZE / WORD_SIZE) as usize;

/// Allocator for DMA-coherent memory, provided by the platform.
pub trait UncachedAlloc {
    type Region: UncachedRegion;
    type Error;

    /// Allocate at least `min_size` bytes of uncached bus-addressable
    /// memory, 32-byte aligned. Writes through the bus address must be
    /// observable through the word accessors without cache maintenance,
    /// and the other way round.
    fn allocate(&mut self, min_size: usize) -> Result<Self::Region, Self::Error>;
}

/// One uncached allocation. Dropping the region releases the memory.
///
/// All CPU access goes through the word accessors, so each platform picks
/// the primitive that is race-free against its engine: volatile MMIO loads
/// and stores on hardware, an atomic cell per word in the simulator. A
/// [`write_word`](Self::write_word) of one aligned word must be atomic
/// with respect to the engine's fetches.
pub trait UncachedRegion {
    /// Address the DMA engine uses.
    fn bus_address(&self) -> u32;
    /// Usable size in bytes.
    fn size(&self) -> usize;
    /// Read the word at word index `index` through the CPU view.
    fn read_word(&self, index: usize) -> u32;
    /// Write the word at word index `index` through the CPU view.
    fn write_word(&self, index: usize, value: u32);
}

/// A graph resident in DMA-visible memory, every address rewritten.
pub struct CommittedGraph<R: UncachedRegion> {
    region: R,
    block_count: usize,
    duration_us: u64,
}

/// Relocate `graph` into memory obtained from `alloc`.
///
/// Allocation failures propagate unchanged; the graph is dropped and
/// nothing is left behind.
pub fn commit<A: UncachedAlloc>(
    graph: CompiledGraph,
    map: &PeripheralMap,
    alloc: &mut A,
) -> Result<CommittedGraph<A::Region>, A::Error> {
    let block_bytes = graph.blocks.len() * CONTROL_BLOCK_SIZE as usize;
    let data_bytes = graph.data.len() * WORD_SIZE as usize;
    let region = alloc.allocate(block_bytes + data_bytes)?;
    let base = region.bus_address();
    assert!(
        base % CONTROL_BLOCK_SIZE == 0,
        "uncached region not 32-byte aligned"
    );
    assert!(region.size() >= block_bytes + data_bytes);
    let data_base = base + block_bytes as u32;

    for (index, block) in graph.blocks.iter().enumerate() {
        let mut b = *block;
        if b.destination_address < map.peripheral_base {
            // Sentinel: destination is a data-vector offset, source is the
            // literal in the block vector.
            b.destination_address += data_base;
            b.source_address += base;
        } else if b.source_address < map.peripheral_base {
            b.source_address += data_base;
        }
        b.next_control_block_address += base;

        let words = [
            b.transfer_information,
            b.source_address,
            b.destination_address,
            b.transfer_length,
            b.td_mode_stride,
            b.next_control_block_address,
            b.reserved[0],
            b.reserved[1],
        ];
        for (i, &word) in words.iter().enumerate() {
            region.write_word(index * BLOCK_WORDS + i, word);
        }
    }
    let data_start = graph.blocks.len() * BLOCK_WORDS;
    for (i, &word) in graph.data.iter().enumerate() {
        region.write_word(data_start + i, word);
    }
    // The graph must be fully visible before the engine can be pointed at it.
    fence(Ordering::Release);

    Ok(CommittedGraph {
        region,
        block_count: graph.blocks.len(),
        duration_us: graph.duration_us,
    })
}

impl<R: UncachedRegion> CommittedGraph<R> {
    /// Bus address of the first control block.
    pub fn bus_address(&self) -> u32 {
        self.region.bus_address()
    }

    /// One traversal's duration on the track, in microseconds.
    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    /// True once the start sentinel has fired: the engine has entered this
    /// graph and will never revisit its predecessor.
    pub fn is_transmitting(&self) -> bool {
        self.sentinel() != 0
    }

    /// True once the end sentinel has fired: the engine has completed at
    /// least one traversal and is looping.
    pub fn is_repeating(&self) -> bool {
        (self.sentinel() as i32) < 0
    }

    /// Point the end sentinel's next fetch at `bus_address`.
    ///
    /// A single aligned word store into uncached memory, atomic with
    /// respect to the engine's block fetch.
    pub(crate) fn rewrite_next(&self, bus_address: u32) {
        fence(Ordering::Release);
        self.region
            .write_word((self.block_count - 1) * BLOCK_WORDS + 5, bus_address);
    }

    fn sentinel(&self) -> u32 {
        // Data slot 0 sits right after the blocks; the engine writes it
        // while this side reads.
        self.region.read_word(self.block_count * BLOCK_WORDS)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Heap-backed fake of the uncached allocator for unit tests.

    use super::*;
    use core::ptr;
    use std::convert::Infallible;

    pub struct TestRegion {
        ptr: *mut u32,
        words: usize,
        bus: u32,
    }

    impl TestRegion {
        fn new(words: usize, bus: u32) -> TestRegion {
            let boxed = vec![0u32; words].into_boxed_slice();
            TestRegion {
                ptr: Box::into_raw(boxed) as *mut u32,
                words,
                bus,
            }
        }
    }

    // Regions deliberately leak: tests inspect committed memory through the
    // allocator's recorded pointers after the owning graph is gone.

    impl UncachedRegion for TestRegion {
        fn bus_address(&self) -> u32 {
            self.bus
        }

        fn size(&self) -> usize {
            self.words * 4
        }

        fn read_word(&self, index: usize) -> u32 {
            assert!(index < self.words);
            // NOTE(unsafe): in-bounds; unit tests are single-threaded.
            unsafe { ptr::read_volatile(self.ptr.add(index)) }
        }

        fn write_word(&self, index: usize, value: u32) {
            assert!(index < self.words);
            // NOTE(unsafe): in-bounds; unit tests are single-threaded.
            unsafe { ptr::write_volatile(self.ptr.add(index), value) }
        }
    }

    /// Hands out bump-allocated regions and remembers their CPU pointers so
    /// tests can inspect and poke committed memory.
    pub struct TestAlloc {
        next_bus: u32,
        pub handed_out: Vec<(u32, *mut u32, usize)>,
    }

    impl TestAlloc {
        pub fn new() -> TestAlloc {
            TestAlloc {
                next_bus: 0x0004_0000,
                handed_out: Vec::new(),
            }
        }

        /// CPU word pointer behind the region at `bus`.
        pub fn cpu_at(&self, bus: u32) -> *mut u32 {
            for &(base, ptr, words) in &self.handed_out {
                if bus >= base && bus < base + (words as u32) * 4 {
                    // NOTE(unsafe): in-bounds by the check above.
                    return unsafe { ptr.add(((bus - base) / 4) as usize) };
                }
            }
            panic!("no region contains {bus:#x}");
        }
    }

    impl UncachedAlloc for TestAlloc {
        type Region = TestRegion;
        type Error = Infallible;

        fn allocate(&mut self, min_size: usize) -> Result<TestRegion, Infallible> {
            let words = min_size.div_ceil(4);
            let region = TestRegion::new(words, self.next_bus);
            self.handed_out.push((self.next_bus, region.ptr, words));
            self.next_bus += ((min_size as u32 + 31) & !31) + 32;
            Ok(region)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::TestAlloc;
    use super::*;
    use core::ptr;
    use crate::bitstream::{Bitstream, Event};
    use crate::compile::compile;

    const MAP: PeripheralMap = PeripheralMap {
        peripheral_base: 0x7E00_0000,
        pwm_fifo: 0x7E20_C018,
        pwm_range1: 0x7E20_C010,
        gpio_set0: 0x7E20_001C,
        railcom_pin: 17,
        debug_pin: 27,
    };

    fn committed_words(alloc: &TestAlloc, bus: u32, count: usize) -> Vec<u32> {
        let ptr = alloc.cpu_at(bus);
        (0..count)
            .map(|i| unsafe { ptr::read_volatile(ptr.add(i)) })
            .collect()
    }

    fn one_word_graph() -> CompiledGraph {
        let bs = Bitstream::new(vec![Event::Data { word: 0xDEAD_BEEF, size: 32 }], 58);
        compile(&bs, &MAP).unwrap()
    }

    #[test]
    fn relocation_rewrites_internal_addresses_only() {
        // P5: after commit, every address is a peripheral register or lands
        // inside the allocated region.
        let graph = one_word_graph();
        let blocks = graph.blocks.len();
        let data = graph.data.len();
        let mut alloc = TestAlloc::new();
        let committed = commit(graph, &MAP, &mut alloc).unwrap();
        let base = committed.bus_address();
        let end = base + (blocks as u32) * 32 + (data as u32) * 4;

        let words = committed_words(&alloc, base, blocks * 8);
        for block in words.chunks(8) {
            let (src, dst, next) = (block[1], block[2], block[5]);
            for addr in [src, dst] {
                assert!(
                    addr >= MAP.peripheral_base || (addr >= base && addr < end),
                    "address {addr:#x} escapes region and peripherals"
                );
            }
            assert!(next >= base && next < end);
            assert_eq!(next % 32, 0);
        }
    }

    #[test]
    fn sentinel_blocks_point_at_their_own_literal() {
        let graph = one_word_graph();
        let blocks = graph.blocks.len();
        let mut alloc = TestAlloc::new();
        let committed = commit(graph, &MAP, &mut alloc).unwrap();
        let base = committed.bus_address();
        let words = committed_words(&alloc, base, blocks * 8);

        // Start sentinel: src is its own reserved word, dst is data slot 0.
        assert_eq!(words[1], base + 24);
        assert_eq!(words[2], base + (blocks as u32) * 32);
        assert_eq!(words[6], 1);
        // End sentinel likewise, writing the negative literal.
        let last = &words[(blocks - 1) * 8..];
        assert_eq!(last[1], base + ((blocks as u32) - 1) * 32 + 24);
        assert_eq!(last[2], base + (blocks as u32) * 32);
        assert_eq!(last[6], 0xFFFF_FFFF);
    }

    #[test]
    fn data_vector_follows_blocks() {
        let graph = one_word_graph();
        let expected = graph.data.clone();
        let blocks = graph.blocks.len();
        let mut alloc = TestAlloc::new();
        let committed = commit(graph, &MAP, &mut alloc).unwrap();
        let data_bus = committed.bus_address() + (blocks as u32) * 32;
        let words = committed_words(&alloc, data_bus, expected.len());
        assert_eq!(words, expected);
    }

    #[test]
    fn sentinel_slot_drives_progress_queries() {
        let graph = one_word_graph();
        let blocks = graph.blocks.len();
        let mut alloc = TestAlloc::new();
        let committed = commit(graph, &MAP, &mut alloc).unwrap();
        assert!(!committed.is_transmitting());
        assert!(!committed.is_repeating());

        let slot = alloc.cpu_at(committed.bus_address() + (blocks as u32) * 32);
        unsafe { ptr::write_volatile(slot, 1) };
        assert!(committed.is_transmitting());
        assert!(!committed.is_repeating());

        unsafe { ptr::write_volatile(slot, 0xFFFF_FFFF) };
        assert!(committed.is_transmitting());
        assert!(committed.is_repeating());
    }

    #[test]
    fn rewrite_next_targets_last_block() {
        let graph = one_word_graph();
        let blocks = graph.blocks.len();
        let mut alloc = TestAlloc::new();
        let committed = commit(graph, &MAP, &mut alloc).unwrap();
        committed.rewrite_next(0x0badc0de & !31);
        let field = alloc.cpu_at(committed.bus_address() + ((blocks as u32) - 1) * 32 + 20);
        assert_eq!(unsafe { ptr::read_volatile(field) }, 0x0badc0de & !31);
    }
}

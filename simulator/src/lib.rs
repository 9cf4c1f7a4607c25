//! Software model of the hardware the trackwave core drives.
//!
//! Provides simulated counterparts of the two collaborator seams: an
//! uncached-memory allocator over plain heap memory with synthetic bus
//! addresses, and a DMA channel that latches the head address for the
//! [`engine`] to pick up. The engine itself interprets committed control
//! blocks the way the real engine would, including the serializer's
//! two-request output latency, so tests can check where edges land on the
//! reconstructed track waveform.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use trackwave::block::PeripheralMap;
use trackwave::commit::{UncachedAlloc, UncachedRegion};
use trackwave::schedule::WaveChannel;

pub mod engine;

pub use engine::{spawn, Engine, Output};

/// Bus addresses and pins of the board the simulator mimics.
pub const BOARD: PeripheralMap = PeripheralMap {
    peripheral_base: 0x7E00_0000,
    pwm_fifo: 0x7E20_C018,
    pwm_range1: 0x7E20_C010,
    gpio_set0: 0x7E20_001C,
    railcom_pin: 17,
    debug_pin: 27,
};

/// One simulated uncached allocation, shared by committer and engine.
pub struct SimMemory {
    base: u32,
    cells: Box<[AtomicU32]>,
}

impl SimMemory {
    /// True when `bus` falls inside this allocation.
    pub fn contains(&self, bus: u32) -> bool {
        bus >= self.base && bus < self.base + (self.cells.len() as u32) * 4
    }

    pub fn read(&self, bus: u32) -> u32 {
        self.cells[((bus - self.base) / 4) as usize].load(Ordering::SeqCst)
    }

    pub fn write(&self, bus: u32, value: u32) {
        self.cells[((bus - self.base) / 4) as usize].store(value, Ordering::SeqCst);
    }
}

/// Region handle handed to the committer. The backing memory stays in the
/// registry, so the engine can keep resolving a region after the owning
/// graph is dropped, exactly as real uncached memory outlives a free for
/// the engine's purposes until it stops being fetched.
///
/// Every word access is an atomic load or store on the shared cells, the
/// same primitive the engine uses, so committer and engine may touch a
/// region from different threads.
pub struct SimRegion {
    mem: Arc<SimMemory>,
}

impl UncachedRegion for SimRegion {
    fn bus_address(&self) -> u32 {
        self.mem.base
    }

    fn size(&self) -> usize {
        self.mem.cells.len() * 4
    }

    fn read_word(&self, index: usize) -> u32 {
        self.mem.cells[index].load(Ordering::SeqCst)
    }

    fn write_word(&self, index: usize, value: u32) {
        self.mem.cells[index].store(value, Ordering::SeqCst);
    }
}

/// Registry of every live simulated region, shared with the engine.
pub type Regions = Arc<Mutex<Vec<Arc<SimMemory>>>>;

/// Bump allocator handing out simulated uncached regions.
pub struct SimAlloc {
    regions: Regions,
    next_base: u32,
}

impl SimAlloc {
    pub fn new() -> SimAlloc {
        SimAlloc {
            regions: Arc::new(Mutex::new(Vec::new())),
            // Synthetic bus addresses: 32-byte aligned, far below the
            // peripheral window.
            next_base: 0x0004_0000,
        }
    }

    /// Registry handle for an engine to resolve bus addresses through.
    pub fn regions(&self) -> Regions {
        self.regions.clone()
    }
}

impl Default for SimAlloc {
    fn default() -> SimAlloc {
        SimAlloc::new()
    }
}

impl UncachedAlloc for SimAlloc {
    type Region = SimRegion;
    type Error = std::convert::Infallible;

    fn allocate(&mut self, min_size: usize) -> Result<SimRegion, Self::Error> {
        let words = min_size.div_ceil(4).max(1);
        let cells = (0..words).map(|_| AtomicU32::new(0)).collect();
        let mem = Arc::new(SimMemory {
            base: self.next_base,
            cells,
        });
        self.next_base += ((min_size as u32 + 31) & !31) + 64;
        self.regions.lock().unwrap().push(mem.clone());
        Ok(SimRegion { mem })
    }
}

/// Simulated DMA channel: latches the head address for the engine.
#[derive(Clone)]
pub struct SimChannel {
    head: Arc<AtomicU32>,
}

impl SimChannel {
    pub fn new() -> SimChannel {
        SimChannel {
            head: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The latched head register, shared with a spawned engine.
    pub fn head(&self) -> Arc<AtomicU32> {
        self.head.clone()
    }
}

impl Default for SimChannel {
    fn default() -> SimChannel {
        SimChannel::new()
    }
}

impl WaveChannel for SimChannel {
    fn start(&mut self, bus_address: u32) {
        self.head.store(bus_address, Ordering::SeqCst);
    }
}

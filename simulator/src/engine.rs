//! Control-block interpreter with the serializer's output latency.
//!
//! Executes a committed graph the way the hardware would: fetches blocks
//! through the region registry, models the PWM FIFO so a word written at
//! one data request reaches the track two requests later, applies range
//! writes to the words of the burst they trail, decodes GPIO set/clear
//! pairs into pin edges, performs sentinel stores into region memory, and
//! follows next pointers, re-reading them on every traversal so a handoff
//! rewrite takes effect exactly like a hardware fetch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use trackwave::block::{PeripheralMap, SENTINEL_LOOPED};
use trackwave::queue::OUTPUT_DELAY;

use crate::{Regions, SimMemory};

/// Cap on recorded output so a free-running engine stays bounded.
const OUTPUT_CAP: usize = 1 << 16;

/// One observable step of track output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Output {
    /// `size` bits of `word`, serialized MSB-first.
    Bits { word: u32, size: u32 },
    /// A GPIO edge, between the surrounding bit groups.
    Edge { pin: u8, high: bool },
}

/// A word sitting in the simulated FIFO.
struct Queued {
    word: u32,
    /// Range at push time, used unless a later write retunes this burst.
    fallback: u32,
    /// Range assigned by the range write trailing this word's burst.
    assigned: Option<u32>,
    /// Burst this word arrived in.
    burst: u64,
}

pub struct Engine {
    map: PeripheralMap,
    regions: Regions,
    fifo: VecDeque<Queued>,
    range: u32,
    burst: u64,
    end_sentinels: u64,
    output: VecDeque<Output>,
}

impl Engine {
    pub fn new(map: PeripheralMap, regions: Regions) -> Engine {
        Engine {
            map,
            regions,
            fifo: VecDeque::new(),
            range: 0,
            burst: 0,
            end_sentinels: 0,
            output: VecDeque::new(),
        }
    }

    /// Execute from `head` until the end sentinel has fired `traversals`
    /// more times.
    pub fn run(&mut self, head: u32, traversals: u64) {
        let target = self.end_sentinels + traversals;
        let mut pc = head;
        while self.end_sentinels < target {
            pc = self.step(pc);
        }
    }

    /// Execute the block at `pc`; returns the next block's address.
    pub fn step(&mut self, pc: u32) -> u32 {
        let source = self.read_bus(pc + 4);
        let dest = self.read_bus(pc + 8);
        let length = self.read_bus(pc + 12);
        let next = self.read_bus(pc + 20);

        if dest == self.map.pwm_fifo {
            self.burst += 1;
            for i in 0..length / 4 {
                let word = self.read_bus(source + i * 4);
                self.push_fifo(word);
            }
        } else if dest == self.map.pwm_range1 {
            let value = self.read_bus(source);
            let burst = self.burst;
            for q in self.fifo.iter_mut().filter(|q| q.burst == burst) {
                q.assigned = Some(value);
            }
            self.range = value;
        } else if dest == self.map.gpio_set0 {
            let set = self.read_bus(source) as u64 | (self.read_bus(source + 4) as u64) << 32;
            let clear =
                self.read_bus(source + 8) as u64 | (self.read_bus(source + 12) as u64) << 32;
            assert_eq!(set & clear, 0, "pin both set and cleared");
            self.edges(set, true);
            self.edges(clear, false);
        } else if dest < self.map.peripheral_base {
            // Sentinel store into graph memory.
            let value = self.read_bus(source);
            self.write_bus(dest, value);
            if value == SENTINEL_LOOPED {
                self.end_sentinels += 1;
            }
        } else {
            panic!("write to unmodelled peripheral register {dest:#x}");
        }
        next
    }

    /// Traversals completed so far.
    pub fn traversals(&self) -> u64 {
        self.end_sentinels
    }

    /// What reached the simulated track, oldest first, capped at the most
    /// recent `OUTPUT_CAP` entries.
    pub fn output(&mut self) -> &[Output] {
        self.output.make_contiguous()
    }

    fn push_fifo(&mut self, word: u32) {
        self.fifo.push_back(Queued {
            word,
            fallback: self.range,
            assigned: None,
            burst: self.burst,
        });
        while self.fifo.len() > OUTPUT_DELAY as usize {
            let q = self.fifo.pop_front().expect("fifo nonempty");
            let size = q.assigned.unwrap_or(q.fallback);
            self.emit(Output::Bits { word: q.word, size });
        }
    }

    fn edges(&mut self, mask: u64, high: bool) {
        for pin in 0..64 {
            if mask & (1 << pin) != 0 {
                self.emit(Output::Edge { pin, high });
            }
        }
    }

    fn emit(&mut self, out: Output) {
        if self.output.len() == OUTPUT_CAP {
            self.output.pop_front();
        }
        self.output.push_back(out);
    }

    fn read_bus(&self, bus: u32) -> u32 {
        self.resolve(bus).read(bus)
    }

    fn write_bus(&self, bus: u32, value: u32) {
        self.resolve(bus).write(bus, value);
    }

    fn resolve(&self, bus: u32) -> Arc<SimMemory> {
        let regions = self.regions.lock().expect("region registry");
        for region in regions.iter() {
            if region.contains(bus) {
                return region.clone();
            }
        }
        panic!("bus address {bus:#x} outside every region");
    }
}

/// Run an engine on its own thread, mimicking the real engine's autonomy.
///
/// The thread idles until `head` is set (the simulated channel's
/// control-block register), then executes blocks until `stop` is raised,
/// and hands the engine back through the join handle.
pub fn spawn(
    map: PeripheralMap,
    regions: Regions,
    head: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<Engine> {
    thread::spawn(move || {
        let mut engine = Engine::new(map, regions);
        let mut pc = loop {
            let head = head.load(Ordering::SeqCst);
            if head != 0 {
                break head;
            }
            if stop.load(Ordering::SeqCst) {
                return engine;
            }
            thread::yield_now();
        };
        while !stop.load(Ordering::SeqCst) {
            pc = engine.step(pc);
        }
        engine
    })
}

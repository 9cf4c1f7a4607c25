//! DMA channel driver.
//!
//! The channel is entirely program-counter driven: point its control-block
//! register at the head of a committed graph, set it active, and it runs
//! the graph unattended. The driver never touches a running channel again
//! except to read status or, through the watchdog, to abort it.

use trackwave::schedule::WaveChannel;

use crate::periph::{Peripherals, DMA_BASE};

const CS: u32 = 0x00;
const CONBLK_AD: u32 = 0x04;
const DEBUG: u32 = 0x20;

const CS_ACTIVE: u32 = 1 << 0;
const CS_END: u32 = 1 << 1; // write to clear
const CS_INT: u32 = 1 << 2; // write to clear
const CS_ERROR: u32 = 1 << 8;
const CS_PRIORITY: u32 = 7 << 16;
const CS_PANIC_PRIORITY: u32 = 15 << 20;
const CS_ABORT: u32 = 1 << 30;
const CS_RESET: u32 = 1 << 31;

/// Read-last-not-set, FIFO and read error bits, write to clear.
const DEBUG_ERRORS: u32 = 0b111;

#[derive(Clone)]
pub struct Channel {
    p: Peripherals,
    base: u32,
}

impl Channel {
    /// Claim channel `index`. Keep clear of channels the firmware uses.
    pub fn new(p: Peripherals, index: u32) -> Channel {
        assert!(index < 15);
        Channel {
            p,
            base: DMA_BASE + index * 0x100,
        }
    }

    /// Reset the channel, dropping whatever it was doing.
    pub fn reset(&self) {
        self.p.write(self.base + CS, CS_RESET);
        while self.p.read(self.base + CS) & CS_RESET != 0 {}
        self.p.write(self.base + DEBUG, DEBUG_ERRORS);
    }

    /// Abort the current control block and stop the channel.
    pub fn abort(&self) {
        self.p.write(self.base + CS, CS_ABORT);
    }

    /// Control block the engine is currently executing.
    pub fn control_block(&self) -> u32 {
        self.p.read(self.base + CONBLK_AD)
    }

    /// True when the channel has latched an error.
    pub fn error(&self) -> bool {
        self.p.read(self.base + CS) & CS_ERROR != 0
    }

    /// Latched debug error bits.
    pub fn debug_errors(&self) -> u32 {
        self.p.read(self.base + DEBUG) & DEBUG_ERRORS
    }

    /// Clear latched debug errors.
    pub fn clear_errors(&self) {
        self.p.write(self.base + DEBUG, DEBUG_ERRORS);
    }
}

impl WaveChannel for Channel {
    fn start(&mut self, bus_address: u32) {
        self.reset();
        self.p.write(self.base + CONBLK_AD, bus_address);
        self.p.write(
            self.base + CS,
            CS_PANIC_PRIORITY | CS_PRIORITY | CS_END | CS_INT | CS_ACTIVE,
        );
    }
}

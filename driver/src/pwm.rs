#![allow(dead_code)]

//! PWM channel 1 in serializer mode.

use trackwave::queue::OUTPUT_DELAY;

use crate::periph::{Peripherals, PWM_BASE};

const CTL: u32 = PWM_BASE;
const STA: u32 = PWM_BASE + 0x04;
const DMAC: u32 = PWM_BASE + 0x08;
const RNG1: u32 = PWM_BASE + 0x10;

const CTL_PWEN1: u32 = 1 << 0;
const CTL_MODE1: u32 = 1 << 1; // serializer
const CTL_USEF1: u32 = 1 << 5;
const CTL_CLRF1: u32 = 1 << 6;

const STA_WERR1: u32 = 1 << 2;
const STA_RERR1: u32 = 1 << 3;
const STA_GAPO1: u32 = 1 << 4;
const STA_BERR: u32 = 1 << 8;
const STA_ERRORS: u32 = STA_WERR1 | STA_RERR1 | STA_GAPO1 | STA_BERR;

const DMAC_ENAB: u32 = 1 << 31;
const DMAC_PANIC: u32 = 7 << 8;

#[derive(Clone)]
pub struct Pwm {
    p: Peripherals,
}

impl Pwm {
    pub fn new(p: Peripherals) -> Pwm {
        Pwm { p }
    }

    /// Put channel 1 into serializer mode reading from the FIFO.
    ///
    /// The DREQ threshold equals the compiler's [`OUTPUT_DELAY`]: the FIFO
    /// keeps that many words in flight, which is exactly the latency the
    /// compiled GPIO edge blocks are scheduled around.
    pub fn setup_serializer(&self) {
        self.p.write(CTL, 0);
        self.p.write(STA, STA_ERRORS);
        self.p.write(DMAC, DMAC_ENAB | DMAC_PANIC | OUTPUT_DELAY);
        self.p.write(CTL, CTL_CLRF1);
        self.p.write(RNG1, 32);
        self.p.write(CTL, CTL_PWEN1 | CTL_MODE1 | CTL_USEF1);
    }

    /// Stop serializing.
    pub fn disable(&self) {
        self.p.write(CTL, 0);
    }

    /// Error flags currently raised.
    pub fn errors(&self) -> u32 {
        self.p.read(STA) & STA_ERRORS
    }

    /// Clear raised error flags.
    pub fn clear_errors(&self) {
        self.p.write(STA, STA_ERRORS);
    }
}

//! Error watchdog.
//!
//! The engine runs without interrupts, so faults only show up in status
//! bits: the DMA channel latches bus and FIFO errors, the PWM flags gap
//! and register-write errors. The watchdog polls both on a timer, logs and
//! clears what it finds, and watches the control-block register move to
//! tell a healthy loop from a stalled one. It only reports; the caller
//! decides recovery, which for this driver means aborting the channel and
//! restarting transmission.

use log::warn;

use crate::dma::Channel;
use crate::pwm::Pwm;

/// Consecutive identical control-block samples before calling a stall. A
/// healthy graph cycles in microseconds, so repeated samples of the same
/// block across quarter-second polls mean fetching has stopped.
const STALL_POLLS: u32 = 4;

pub struct Watchdog {
    channel: Channel,
    pwm: Pwm,
    last_block: u32,
    stalled_polls: u32,
}

impl Watchdog {
    pub fn new(channel: Channel, pwm: Pwm) -> Watchdog {
        Watchdog {
            channel,
            pwm,
            last_block: 0,
            stalled_polls: 0,
        }
    }

    /// Poll once; true while everything looks healthy.
    pub fn check(&mut self) -> bool {
        let mut healthy = true;

        if self.channel.error() {
            warn!(
                "dma channel error, debug bits {:#05b}",
                self.channel.debug_errors()
            );
            self.channel.clear_errors();
            healthy = false;
        }

        let pwm_errors = self.pwm.errors();
        if pwm_errors != 0 {
            warn!("pwm error flags {pwm_errors:#x}");
            self.pwm.clear_errors();
            healthy = false;
        }

        let block = self.channel.control_block();
        if block != 0 && block == self.last_block {
            self.stalled_polls += 1;
            if self.stalled_polls >= STALL_POLLS {
                warn!("dma channel stalled at control block {block:#010x}");
                healthy = false;
            }
        } else {
            self.stalled_polls = 0;
        }
        self.last_block = block;

        healthy
    }
}

//! Raspberry Pi DCC waveform driver.
//!
//! Brings up the PWM serializer and its clock, compiles the track
//! bitstream, commits it to mailbox-allocated uncached memory, points a
//! DMA channel at it, and then sits in a watchdog loop. The waveform
//! compiler itself lives in the `trackwave` crate; everything here is the
//! board: register access, memory allocation, and bring-up order.

mod clk;
mod dma;
mod gpio;
mod mailbox;
mod periph;
mod pwm;
mod watchdog;

use std::thread;
use std::time::Duration;

use log::{info, warn};
use trackwave::{commit, compile, Bitstream, BitstreamBuilder, Packet, QueueController};

use crate::periph::{Peripherals, BOARD_MAP};

/// DMA channel this driver owns. Channels 0-4 and 6 are best avoided:
/// the firmware and the SD controller use them.
const DMA_CHANNEL: u32 = 5;

/// PWM channel 1 output pin, alternate function 5.
const PWM_PIN: u8 = 18;

/// Serializer bit clock: 19.2 MHz crystal down to 58 µs per bit
/// (19.2e6 * 58e-6 = 1113.6, fraction in 1/4096 steps).
const CLOCK_DIVI: u32 = 1113;
const CLOCK_DIVF: u32 = 2458;

/// Demo locomotive short address.
const LOCO: u8 = 3;

fn main() {
    env_logger::init();
    info!("trackwave driver starting");

    let p = Peripherals::map().expect("mapping /dev/mem (run as root)");

    let io = gpio::Gpio::new(p);
    io.function_select(PWM_PIN, gpio::Function::Alt5);
    io.function_select(BOARD_MAP.railcom_pin, gpio::Function::Output);
    io.set(BOARD_MAP.railcom_pin); // cutout closed
    io.function_select(BOARD_MAP.debug_pin, gpio::Function::Output);
    io.clear(BOARD_MAP.debug_pin);
    info!("gpio routed");

    clk::PwmClock::new(p).configure(CLOCK_DIVI, CLOCK_DIVF);
    let pwm = pwm::Pwm::new(p);
    pwm.setup_serializer();
    info!("pwm serializing at {} µs per bit", trackwave::bitstream::BIT_PERIOD_US);

    let channel = dma::Channel::new(p, DMA_CHANNEL);
    channel.reset();
    let mut mailbox = mailbox::Mailbox::open().expect("opening /dev/vcio");
    let mut controller = QueueController::new(channel.clone());

    // Idle loop keeps the track energised until someone is addressed.
    let idle = idle_bitstream();
    info!("transmitting idle loop, {} µs per cycle", idle.duration_us());
    transmit(&mut controller, &mut mailbox, &idle);

    // Demo hand-off: after a moment, roll the demo locomotive forward at
    // half speed. The running graph is replaced without a glitch on the
    // rails.
    thread::sleep(Duration::from_secs(2));
    let running = speed_bitstream(LOCO, 14, true);
    transmit(&mut controller, &mut mailbox, &running);
    info!("locomotive {LOCO} running");

    let mut watchdog = watchdog::Watchdog::new(channel.clone(), pwm.clone());
    loop {
        thread::sleep(Duration::from_millis(250));
        if watchdog.check() {
            continue;
        }
        // The waveform is already suspect, so stop the channel, clear the
        // serializer, and start over on a freshly committed graph.
        // Replacing the controller drops the dead graph's memory now that
        // the channel no longer fetches it.
        warn!("waveform fault, restarting transmission");
        channel.abort();
        channel.reset();
        pwm.setup_serializer();
        controller = QueueController::new(channel.clone());
        transmit(&mut controller, &mut mailbox, &running);
        info!("transmission restarted");
    }
}

/// Compile `bitstream`, commit it to mailbox memory, and hand it to the
/// channel.
fn transmit(
    controller: &mut QueueController<dma::Channel, mailbox::DmaRegion>,
    mailbox: &mut mailbox::Mailbox,
    bitstream: &Bitstream,
) {
    let graph = compile(bitstream, &BOARD_MAP).expect("bitstream rejected");
    let committed = commit(graph, &BOARD_MAP, mailbox).expect("allocating dma memory");
    controller.enqueue(committed);
}

/// Power-on prefix of plain ones, then an idle packet with a RailCom
/// cutout forever.
fn idle_bitstream() -> Bitstream {
    let mut b = BitstreamBuilder::new();
    for _ in 0..32 {
        b.one();
    }
    b.loop_start();
    b.packet(&Packet::idle());
    b.railcom_cutout();
    b.finish()
}

/// A speed order interleaved with idle packets, cutout after each packet.
fn speed_bitstream(address: u8, speed: u8, forward: bool) -> Bitstream {
    let mut b = BitstreamBuilder::new();
    for _ in 0..32 {
        b.one();
    }
    b.loop_start();
    b.packet(&Packet::speed_and_direction(address, speed, forward));
    b.railcom_cutout();
    b.packet(&Packet::idle());
    b.railcom_cutout();
    b.finish()
}

//! Host-side dry run: compile the demo bitstream and print the waveform
//! the DMA engine would put on the track.

use trackwave::bitstream::BIT_PERIOD_US;
use trackwave::{commit, compile, BitstreamBuilder, Packet};
use trackwave_simulator::{Engine, Output, SimAlloc, BOARD};

pub fn main() {
    let mut b = BitstreamBuilder::new();
    // Power-on prefix: a stretch of ones while the booster settles.
    for _ in 0..16 {
        b.one();
    }
    b.loop_start();
    b.packet(&Packet::idle());
    b.railcom_cutout();
    let bitstream = b.finish();
    println!(
        "bitstream: {} events, {} µs per traversal",
        bitstream.events().len(),
        bitstream.duration_us()
    );

    let graph = compile(&bitstream, &BOARD).expect("bitstream rejected");
    println!(
        "compiled: {} blocks, {} data words, loop closes on block {}",
        graph.blocks.len(),
        graph.data.len(),
        graph.loop_target
    );

    let mut alloc = SimAlloc::new();
    let regions = alloc.regions();
    let committed = commit(graph, &BOARD, &mut alloc).expect("sim allocation");
    println!("committed at bus address {:#010x}", committed.bus_address());

    let mut engine = Engine::new(BOARD, regions);
    engine.run(committed.bus_address(), 3);
    assert!(committed.is_repeating());
    println!("three traversals:");

    let mut at_us: u64 = 0;
    for out in engine.output() {
        match *out {
            Output::Bits { word, size } => {
                print!("{at_us:9} µs  ");
                for i in (32 - size..32).rev() {
                    print!("{}", (word >> i) & 1);
                }
                println!();
                at_us += size as u64 * BIT_PERIOD_US;
            }
            Output::Edge { pin, high } => {
                println!(
                    "{at_us:9} µs  GPIO{pin} {}",
                    if high { "high" } else { "low" }
                );
            }
        }
    }
}

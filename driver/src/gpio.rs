#![allow(dead_code)]

//! GPIO function select and static output levels.
//!
//! Only the setup side lives here: at runtime the compiled DMA graph
//! writes the set/clear registers itself, so the driver just routes the
//! PWM output to its pin and parks the cutout and debug pins at their
//! resting levels before transmission starts.

use crate::periph::{Peripherals, GPIO_BASE};

const FSEL0: u32 = GPIO_BASE; // ten pins per select register
const SET0: u32 = GPIO_BASE + 0x1C;
const CLR0: u32 = GPIO_BASE + 0x28;

/// Pin function, by select-field value.
#[derive(Copy, Clone, Debug)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    /// Alternate function 5; PWM0 on pin 18.
    Alt5 = 0b010,
}

pub struct Gpio {
    p: Peripherals,
}

impl Gpio {
    pub fn new(p: Peripherals) -> Gpio {
        Gpio { p }
    }

    /// Select `function` for `pin`.
    pub fn function_select(&self, pin: u8, function: Function) {
        let reg = FSEL0 + (pin as u32 / 10) * 4;
        let shift = (pin as u32 % 10) * 3;
        let mut value = self.p.read(reg);
        value &= !(0b111 << shift);
        value |= (function as u32) << shift;
        self.p.write(reg, value);
    }

    /// Drive `pin` high.
    pub fn set(&self, pin: u8) {
        self.p.write(SET0 + (pin as u32 / 32) * 4, 1 << (pin % 32));
    }

    /// Drive `pin` low.
    pub fn clear(&self, pin: u8) {
        self.p.write(CLR0 + (pin as u32 / 32) * 4, 1 << (pin % 32));
    }
}

//! Peripheral window access.
//!
//! Maps the BCM283x peripheral window from `/dev/mem` once and hands out
//! volatile word access keyed by bus address. The DMA engine sees every
//! peripheral at the `0x7E00_0000` bus alias regardless of where the ARM
//! physical window sits, so bus addresses are the common currency
//! throughout the driver and the physical base is just a mapping detail.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr;

use trackwave::block::PeripheralMap;

/// Bus address of the peripheral window, as the DMA engine sees it.
pub const BUS_PERIPHERAL_BASE: u32 = 0x7E00_0000;

/// ARM physical address of the peripheral window: 0x3F00_0000 on the
/// BCM2836/7 (Pi 2 and 3). The original BCM2835 uses 0x2000_0000.
pub const PHYS_PERIPHERAL_BASE: i64 = 0x3F00_0000;

/// Size of the mapped window.
const WINDOW_SIZE: usize = 0x0100_0000;

/// Peripheral block bases, as bus addresses.
pub const DMA_BASE: u32 = BUS_PERIPHERAL_BASE + 0x0000_7000;
pub const CM_BASE: u32 = BUS_PERIPHERAL_BASE + 0x0010_1000;
pub const GPIO_BASE: u32 = BUS_PERIPHERAL_BASE + 0x0020_0000;
pub const PWM_BASE: u32 = BUS_PERIPHERAL_BASE + 0x0020_C000;

/// Pin driving the RailCom cutout circuit, low while the cutout is open.
pub const RAILCOM_PIN: u8 = 17;

/// Scope trigger pin for debug markers.
pub const DEBUG_PIN: u8 = 27;

/// Addresses and pins the waveform compiler targets on this board.
pub const BOARD_MAP: PeripheralMap = PeripheralMap {
    peripheral_base: BUS_PERIPHERAL_BASE,
    pwm_fifo: PWM_BASE + 0x18,
    pwm_range1: PWM_BASE + 0x10,
    gpio_set0: GPIO_BASE + 0x1C,
    railcom_pin: RAILCOM_PIN,
    debug_pin: DEBUG_PIN,
};

/// Memory-mapped peripheral window.
///
/// Cheap to copy; the mapping lives for the whole process.
#[derive(Copy, Clone)]
pub struct Peripherals {
    base: *mut u32,
}

impl Peripherals {
    /// Map the peripheral window. Needs access to `/dev/mem`.
    pub fn map() -> io::Result<Peripherals> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")?;
        // NOTE(unsafe): MAP_SHARED mapping of the peripheral window. The
        // file may close after mmap; the mapping stays.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                WINDOW_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                PHYS_PERIPHERAL_BASE as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Peripherals {
            base: base as *mut u32,
        })
    }

    fn reg(&self, bus_address: u32) -> *mut u32 {
        debug_assert!(bus_address >= BUS_PERIPHERAL_BASE);
        let offset = (bus_address - BUS_PERIPHERAL_BASE) as usize;
        debug_assert!(offset < WINDOW_SIZE);
        // NOTE(unsafe): in-bounds word offset within the mapped window.
        unsafe { self.base.add(offset / 4) }
    }

    /// Volatile read of the register at `bus_address`.
    pub fn read(&self, bus_address: u32) -> u32 {
        // NOTE(unsafe): aligned MMIO read inside the window.
        unsafe { ptr::read_volatile(self.reg(bus_address)) }
    }

    /// Volatile write of the register at `bus_address`.
    pub fn write(&self, bus_address: u32, value: u32) {
        // NOTE(unsafe): aligned MMIO write inside the window.
        unsafe { ptr::write_volatile(self.reg(bus_address), value) }
    }
}

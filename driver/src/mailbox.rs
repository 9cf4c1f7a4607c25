//! VideoCore property mailbox: uncached DMA-visible memory.
//!
//! The firmware owns physical memory it can hand out over the property
//! channel: an allocate call returns a handle, locking the handle pins the
//! memory and returns its bus address in the uncached alias, and mapping
//! the matching physical pages through `/dev/mem` gives the CPU the same
//! bytes. Writes by the DMA engine are then visible to the CPU without
//! cache maintenance, which is the allocator contract the committer
//! depends on.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr;

use log::warn;
use trackwave::commit::{UncachedAlloc, UncachedRegion};

/// The property-channel ioctl on `/dev/vcio`: `_IOWR(100, 0, char *)`.
const fn property_ioctl() -> libc::c_ulong {
    let dir: libc::c_ulong = 3; // read and write
    let size = core::mem::size_of::<*mut libc::c_char>() as libc::c_ulong;
    (dir << 30) | (size << 16) | (100 << 8)
}

const TAG_ALLOCATE: u32 = 0x0003_000C;
const TAG_LOCK: u32 = 0x0003_000D;
const TAG_UNLOCK: u32 = 0x0003_000E;
const TAG_RELEASE: u32 = 0x0003_000F;

/// Allocation in the uncached ("direct") bus alias.
const MEM_FLAG_DIRECT: u32 = 1 << 2;
/// Zero the allocation before handing it out.
const MEM_FLAG_ZERO: u32 = 1 << 4;

/// Mask stripping the bus alias off a locked address, leaving the ARM
/// physical address for mmap.
const BUS_ALIAS_MASK: u32 = 0x3FFF_FFFF;

/// Property-mailbox client. Also the driver's [`UncachedAlloc`].
pub struct Mailbox {
    vcio: File,
}

impl Mailbox {
    pub fn open() -> io::Result<Mailbox> {
        Ok(Mailbox {
            vcio: OpenOptions::new().read(true).write(true).open("/dev/vcio")?,
        })
    }

    /// One property call with up to three value words; returns the first
    /// response value word.
    fn property(&self, tag: u32, values: &[u32]) -> io::Result<u32> {
        let mut msg = [0u32; 12];
        let len = values.len();
        msg[0] = ((6 + len) * 4) as u32;
        msg[1] = 0; // process request
        msg[2] = tag;
        msg[3] = (len * 4) as u32;
        msg[4] = (len * 4) as u32;
        msg[5..5 + len].copy_from_slice(values);
        msg[5 + len] = 0; // end tag
        // NOTE(unsafe): ioctl on /dev/vcio with a property buffer of the
        // declared size.
        let rc = unsafe {
            libc::ioctl(self.vcio.as_raw_fd(), property_ioctl(), msg.as_mut_ptr())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if msg[1] != 0x8000_0000 {
            return Err(io::Error::other("mailbox request failed"));
        }
        Ok(msg[5])
    }
}

impl UncachedAlloc for Mailbox {
    type Region = DmaRegion;
    type Error = io::Error;

    fn allocate(&mut self, min_size: usize) -> io::Result<DmaRegion> {
        // Page granularity: mmap cannot do less, and the firmware rounds
        // up anyway.
        let size = ((min_size + 4095) & !4095) as u32;
        let handle = self.property(TAG_ALLOCATE, &[size, 4096, MEM_FLAG_DIRECT | MEM_FLAG_ZERO])?;
        if handle == 0 {
            return Err(io::Error::other("mailbox allocation refused"));
        }
        let bus = match self.property(TAG_LOCK, &[handle]) {
            Ok(bus) => bus,
            Err(e) => {
                let _ = self.property(TAG_RELEASE, &[handle]);
                return Err(e);
            }
        };

        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")?;
        // NOTE(unsafe): maps exactly the locked physical pages.
        let cpu = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                mem.as_raw_fd(),
                (bus & BUS_ALIAS_MASK) as libc::off_t,
            )
        };
        if cpu == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            let _ = self.property(TAG_UNLOCK, &[handle]);
            let _ = self.property(TAG_RELEASE, &[handle]);
            return Err(err);
        }

        Ok(DmaRegion {
            mailbox: Mailbox {
                vcio: self.vcio.try_clone()?,
            },
            handle,
            bus,
            cpu: cpu as *mut u32,
            size: size as usize,
        })
    }
}

/// One locked, mapped, uncached allocation. Dropping it unmaps and
/// releases the firmware memory.
pub struct DmaRegion {
    mailbox: Mailbox,
    handle: u32,
    bus: u32,
    cpu: *mut u32,
    size: usize,
}

impl UncachedRegion for DmaRegion {
    fn bus_address(&self) -> u32 {
        self.bus
    }

    fn size(&self) -> usize {
        self.size
    }

    fn read_word(&self, index: usize) -> u32 {
        debug_assert!(index * 4 < self.size);
        // NOTE(unsafe): aligned in-bounds word of the mapped allocation.
        unsafe { ptr::read_volatile(self.cpu.add(index)) }
    }

    fn write_word(&self, index: usize, value: u32) {
        debug_assert!(index * 4 < self.size);
        // NOTE(unsafe): aligned in-bounds word of the mapped allocation.
        unsafe { ptr::write_volatile(self.cpu.add(index), value) }
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        // NOTE(unsafe): unmaps the mapping created in `allocate`.
        unsafe {
            libc::munmap(self.cpu as *mut libc::c_void, self.size);
        }
        if self.mailbox.property(TAG_UNLOCK, &[self.handle]).is_err()
            || self.mailbox.property(TAG_RELEASE, &[self.handle]).is_err()
        {
            warn!("leaked mailbox allocation {:#x}", self.handle);
        }
    }
}

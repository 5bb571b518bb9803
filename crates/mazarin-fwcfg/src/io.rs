//! Register access seam for the fw_cfg MMIO window.
//!
//! On the AArch64 `virt` machine the device is exposed as MMIO at:
//!   - base + 0x00: data register (1/2/4/8 byte accesses, read/write)
//!   - base + 0x08: selector register (2 bytes, write, big-endian)
//!   - base + 0x10: DMA address register (8 bytes, write; reads back "QEMU CFG")
//!
//! Transports only talk to the device through [`RegisterIo`], so the same
//! protocol code drives real hardware ([`Mmio`]) and the simulated device
//! used by the host tests.

use core::ptr::{read_volatile, write_volatile};

use crate::codec::DmaAccess;

/// Default fw_cfg MMIO base on QEMU's AArch64 `virt` machine.
pub const VIRT_FW_CFG_BASE: usize = 0x0902_0000;

/// DTB `compatible` string of the MMIO fw_cfg node.
pub const FW_CFG_COMPATIBLE: &str = "qemu,fw-cfg-mmio";

const DATA_OFFSET: usize = 0x00;
const SELECTOR_OFFSET: usize = 0x08;
const DMA_OFFSET: usize = 0x10;

/// Width of a single data register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    Byte,
    Half,
    Word,
    Double,
}

impl DataWidth {
    pub const fn bytes(self) -> usize {
        match self {
            DataWidth::Byte => 1,
            DataWidth::Half => 2,
            DataWidth::Word => 4,
            DataWidth::Double => 8,
        }
    }
}

/// Raw access to the three fw_cfg registers.
///
/// Values are passed exactly as stored to or loaded from the register:
/// no byte order conversion happens at this level.
pub trait RegisterIo {
    /// Stores `raw` into the selector register.
    fn write_selector(&mut self, raw: u16);

    /// Loads one value of `width` bytes from the data register.
    fn read_data(&mut self, width: DataWidth) -> u64;

    /// Stores the low `width` bytes of `value` into the data register.
    fn write_data(&mut self, width: DataWidth, value: u64);

    /// Stores `raw` into the DMA address register.
    fn write_dma_address(&mut self, raw: u64);

    /// Loads the DMA address register. QEMU answers with a fixed signature.
    fn read_dma_address(&mut self) -> u64;

    /// Full memory barrier ordering descriptor stores, register writes and
    /// completion loads.
    fn barrier(&mut self);

    /// Physical address the device must use to reach `vaddr`.
    fn dma_address(&self, vaddr: usize) -> u64 {
        vaddr as u64
    }

    /// Loads a descriptor the device may be rewriting concurrently.
    ///
    /// # Safety
    /// `desc` must point to a live, aligned descriptor.
    unsafe fn observe(&mut self, desc: *const DmaAccess) -> DmaAccess {
        unsafe { read_volatile(desc) }
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &mut T {
    fn write_selector(&mut self, raw: u16) {
        (**self).write_selector(raw)
    }

    fn read_data(&mut self, width: DataWidth) -> u64 {
        (**self).read_data(width)
    }

    fn write_data(&mut self, width: DataWidth, value: u64) {
        (**self).write_data(width, value)
    }

    fn write_dma_address(&mut self, raw: u64) {
        (**self).write_dma_address(raw)
    }

    fn read_dma_address(&mut self) -> u64 {
        (**self).read_dma_address()
    }

    fn barrier(&mut self) {
        (**self).barrier()
    }

    fn dma_address(&self, vaddr: usize) -> u64 {
        (**self).dma_address(vaddr)
    }

    unsafe fn observe(&mut self, desc: *const DmaAccess) -> DmaAccess {
        unsafe { (**self).observe(desc) }
    }
}

/// Data synchronization barrier across the full system.
#[inline]
pub fn dsb() {
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: dsb has no side effects beyond ordering memory accesses
        unsafe { core::arch::asm!("dsb sy", options(nostack, preserves_flags)) };
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

/// fw_cfg registers behind a memory-mapped window.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    /// `base` must be the address of a mapped fw_cfg MMIO window that
    /// nothing else accesses while this value exists.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

impl RegisterIo for Mmio {
    fn write_selector(&mut self, raw: u16) {
        // SAFETY: selector register inside the window promised by `new`
        unsafe { write_volatile((self.base + SELECTOR_OFFSET) as *mut u16, raw) }
    }

    fn read_data(&mut self, width: DataWidth) -> u64 {
        let addr = self.base + DATA_OFFSET;
        // SAFETY: data register inside the window promised by `new`
        unsafe {
            match width {
                DataWidth::Byte => read_volatile(addr as *const u8) as u64,
                DataWidth::Half => read_volatile(addr as *const u16) as u64,
                DataWidth::Word => read_volatile(addr as *const u32) as u64,
                DataWidth::Double => read_volatile(addr as *const u64),
            }
        }
    }

    fn write_data(&mut self, width: DataWidth, value: u64) {
        let addr = self.base + DATA_OFFSET;
        // SAFETY: data register inside the window promised by `new`
        unsafe {
            match width {
                DataWidth::Byte => write_volatile(addr as *mut u8, value as u8),
                DataWidth::Half => write_volatile(addr as *mut u16, value as u16),
                DataWidth::Word => write_volatile(addr as *mut u32, value as u32),
                DataWidth::Double => write_volatile(addr as *mut u64, value),
            }
        }
    }

    fn write_dma_address(&mut self, raw: u64) {
        // SAFETY: DMA register inside the window promised by `new`
        unsafe { write_volatile((self.base + DMA_OFFSET) as *mut u64, raw) }
    }

    fn read_dma_address(&mut self) -> u64 {
        // SAFETY: DMA register inside the window promised by `new`
        unsafe { read_volatile((self.base + DMA_OFFSET) as *const u64) }
    }

    fn barrier(&mut self) {
        dsb();
    }
}

//! QEMU fw_cfg transport and ramfb configuration.
//!
//! fw_cfg is QEMU's channel for passing configuration between the host and
//! a guest that has no other bus. On the AArch64 `virt` machine it is three
//! MMIO registers: a 16-bit selector, a data register and a 64-bit DMA
//! address register. This crate speaks both the traditional selector/data
//! interface and the DMA interface, resolves named entries through the file
//! directory, and uses it to point QEMU's ramfb display at a guest buffer.
//!
//! Register access sits behind [`io::RegisterIo`], so everything above it
//! runs unchanged against real MMIO ([`io::Mmio`]) or a test double.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod codec;
pub mod device;
pub mod directory;
pub mod dma;
pub mod error;
pub mod io;
pub mod legacy;
pub mod poll;
pub mod ramfb;

#[cfg(test)]
mod sim;

pub use codec::{DmaAccess, FileRecord, RamfbConfig};
pub use device::{FwCfg, Options};
pub use directory::{DirectoryTransport, FileEntry};
pub use dma::{Completion, DmaControl, DmaOp, DmaRequest};
pub use error::{ConfigError, ProbeError, TransportError};
pub use io::{DataWidth, Mmio, RegisterIo};
pub use poll::{PollPolicy, Spin};
pub use ramfb::{PixelFormat, Ramfb};

//! Kernel configuration constants
//!
//! This module contains tunable parameters for the kernel.
//! Modify these values to adjust kernel behavior.

use log::LevelFilter;
use mazarin_fwcfg::{DataWidth, DirectoryTransport};

// ============================================================================
// Platform
// ============================================================================

/// PL011 UART on the QEMU virt machine
pub const UART_BASE: usize = 0x0900_0000;

/// fw_cfg MMIO window used when the DTB has no `qemu,fw-cfg-mmio` node
pub const FW_CFG_BASE_FALLBACK: usize = mazarin_fwcfg::io::VIRT_FW_CFG_BASE;

/// RAM assumed when no DTB can be found. Must match QEMU's `-m`.
pub const DEFAULT_RAM_BASE: usize = 0x4000_0000;
pub const DEFAULT_RAM_SIZE: usize = 256 * 1024 * 1024;

/// Extra place to look for a DTB when x0 is zero at entry.
///
/// Load one there with:
/// `-device loader,file=virt.dtb,addr=0x4ff00000,force-raw=on`
pub const DTB_FIXED_ADDR: usize = 0x4ff0_0000;

// ============================================================================
// Memory
// ============================================================================

/// Kernel heap size, placed directly after the kernel image.
/// Holds the framebuffer, so it must cover FB_WIDTH * FB_HEIGHT * 4.
pub const HEAP_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// fw_cfg
// ============================================================================

/// Data register access width for the traditional interface
pub const FW_CFG_DATA_WIDTH: DataWidth = DataWidth::Double;

/// Selector of the file directory. 0x19 on every QEMU release with
/// named files.
pub const FW_CFG_DIRECTORY_KEY: u16 = mazarin_fwcfg::directory::DEFAULT_DIRECTORY_KEY;

/// Interface used to scan the file directory.
///
/// Legacy is the known-good choice: sequential DMA reads of directory
/// records lost their offset on at least one QEMU build.
pub const FW_CFG_DIRECTORY_TRANSPORT: DirectoryTransport = DirectoryTransport::Legacy;

/// Polls of a DMA descriptor before giving up on the transfer
pub const FW_CFG_DMA_POLL_BUDGET: u32 = 50_000;

// ============================================================================
// Framebuffer
// ============================================================================

/// Set to false to boot without touching ramfb
pub const ENABLE_RAMFB: bool = true;

pub const FB_WIDTH: u32 = 640;
pub const FB_HEIGHT: u32 = 480;

/// Draw colour bars after configuring the display. Only shown when the
/// text console is off, since the console takes over the whole screen.
pub const DRAW_TEST_PATTERN: bool = true;

/// Turn the framebuffer into a text console once it is configured
pub const FB_TEXT_CONSOLE: bool = true;

/// Echo log records to the framebuffer console as well as the UART
pub const LOG_TO_FRAMEBUFFER: bool = true;

// ============================================================================
// Boot behaviour
// ============================================================================

/// Skip the boot-time self-tests
pub const DISABLE_ALL_TESTS: bool = false;

/// Exit QEMU via semihosting once boot finishes instead of idling.
/// Requires `-semihosting`; without it the kernel idles anyway.
pub const EXIT_AFTER_BOOT: bool = false;

/// Maximum level passed to the UART logger
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;

use core::fmt::Write;

use crate::config;

// ============================================================================
// UART Driver - Encapsulates all MMIO access
// ============================================================================

/// PL011 UART register offsets
const DR_OFFSET: usize = 0x00; // Data register
const FR_OFFSET: usize = 0x18; // Flag register

/// Transmit FIFO full flag
const TXFF: u32 = 1 << 5;

/// UART driver that encapsulates all MMIO access
struct Uart {
    base: usize,
}

impl Uart {
    const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Write a byte, waiting for FIFO space
    #[inline]
    fn write(&self, byte: u8) {
        while self.flags() & TXFF != 0 {
            core::hint::spin_loop();
        }
        // SAFETY: Writing to UART data register at known address
        unsafe {
            ((self.base + DR_OFFSET) as *mut u8).write_volatile(byte);
        }
    }

    #[inline]
    fn flags(&self) -> u32 {
        // SAFETY: Reading from UART flag register at known address
        unsafe { ((self.base + FR_OFFSET) as *const u32).read_volatile() }
    }
}

static UART: Uart = Uart::new(config::UART_BASE);

// ============================================================================
// Public API - Safe wrappers around UART operations
// ============================================================================

/// Print a string to the console.
/// IRQs are masked so a message is never split by a handler's output.
pub fn print(s: &str) {
    crate::irq::with_irqs_disabled(|| {
        for c in s.bytes() {
            if c == b'\n' {
                UART.write(b'\r');
            }
            UART.write(c);
        }
    });
}

/// Print a number in decimal (no heap allocation)
pub fn print_dec(n: usize) {
    let mut buf = [0u8; 20];
    let mut i = 20;
    let mut val = n;

    if val == 0 {
        UART.write(b'0');
        return;
    }

    while val > 0 && i > 0 {
        i -= 1;
        buf[i] = b'0' + (val % 10) as u8;
        val /= 10;
    }

    for c in &buf[i..] {
        UART.write(*c);
    }
}

// ============================================================================
// Stack-based formatting (no heap allocation, panic-safe)
// ============================================================================

/// A stack-allocated buffer for formatting without heap allocation.
/// Use with `core::fmt::Write`.
pub struct StackWriter<const N: usize> {
    buf: [u8; N],
    pos: usize,
}

impl<const N: usize> StackWriter<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            pos: 0,
        }
    }

    /// Get the formatted string (returns empty on invalid UTF-8)
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.pos]).unwrap_or("")
    }

    /// Print the buffer contents to console and clear
    pub fn flush(&mut self) {
        print(self.as_str());
        self.pos = 0;
    }
}

impl<const N: usize> Write for StackWriter<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let mut to_copy = bytes.len().min(remaining);
        // Never cut a UTF-8 sequence in half
        while to_copy > 0 && !s.is_char_boundary(to_copy) {
            to_copy -= 1;
        }
        self.buf[self.pos..self.pos + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.pos += to_copy;
        Ok(())
    }
}

/// Safe formatting macro that writes to a stack buffer and prints.
/// Unlike `format!`, this cannot panic from allocation failures.
///
/// Usage:
/// ```ignore
/// safe_print!(64, "[fw_cfg] selector={:#x} size={}\n", sel, size);
/// ```
#[macro_export]
macro_rules! safe_print {
    ($size:expr, $($arg:tt)*) => {{
        use core::fmt::Write;
        let mut writer = $crate::console::StackWriter::<$size>::new();
        let _ = write!(writer, $($arg)*);
        writer.flush();
    }};
}

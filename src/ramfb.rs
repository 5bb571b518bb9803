//! QEMU ramfb (RAM-based framebuffer) driver
//!
//! The kernel allocates a framebuffer in RAM and hands its address to the
//! device through fw_cfg `etc/ramfb`. From then on writes to that memory
//! show up on the QEMU display window.
//!
//! The device keeps scanning the buffer out for as long as the VM runs,
//! so the buffer is never freed.
//!
//! Reference: <https://wiki.osdev.org/Ramfb>

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use mazarin_fwcfg::{ConfigError, PixelFormat, Ramfb, TransportError};
use spinning_top::Spinlock;

use crate::{allocator, fw_cfg};

const FORMAT: PixelFormat = PixelFormat::Xrgb8888;

/// Global framebuffer state
struct FramebufferState {
    device: Ramfb,
    /// Physical (and virtual, due to identity mapping) address of pixel data
    addr: usize,
    width: u32,
    height: u32,
    stride: u32,
    /// Total size in bytes
    size: usize,
}

static FB_STATE: Spinlock<Option<FramebufferState>> = Spinlock::new(None);
static FB_INITIALIZED: AtomicBool = AtomicBool::new(false);
static FB_ADDR: AtomicUsize = AtomicUsize::new(0);
static FB_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Buffer from the last `init` attempt, `(addr, size)`.
///
/// Kept even when configuration fails so a retry reuses it. It is never
/// freed: a write that timed out may still hand its address to the device.
static FB_BUFFER: Spinlock<Option<(usize, usize)>> = Spinlock::new(None);

/// Failure of a framebuffer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbError {
    /// `init` has not succeeded yet
    NotInitialized,
    /// The device rejected or never saw the configuration
    Config(ConfigError),
}

impl From<ConfigError> for FbError {
    fn from(err: ConfigError) -> Self {
        FbError::Config(err)
    }
}

impl core::fmt::Display for FbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FbError::NotInitialized => write!(f, "framebuffer not initialized"),
            FbError::Config(err) => write!(f, "{}", err),
        }
    }
}

/// Hand out a zeroed buffer of at least `size` bytes, reusing the one
/// from an earlier attempt when it is big enough.
pub fn framebuffer_memory(size: usize) -> Option<usize> {
    let mut buffer = FB_BUFFER.lock();
    if let Some((addr, len)) = *buffer {
        if len >= size {
            // SAFETY: `addr` is a live allocation of `len` bytes owned by FB_BUFFER
            unsafe { core::ptr::write_bytes(addr as *mut u8, 0, size) };
            return Some(addr);
        }
    }
    let addr = allocator::alloc_pages_zeroed(size)?.as_ptr() as usize;
    *buffer = Some((addr, size));
    Some(addr)
}

/// Initialize the ramfb device with the given resolution.
///
/// Allocates framebuffer memory inside `ram` (the range the device can
/// reach), configures the device and leaves the screen black.
pub fn init(width: u32, height: u32, ram: core::ops::Range<usize>) -> Result<(), &'static str> {
    if FB_INITIALIZED.load(Ordering::Relaxed) {
        return Ok(());
    }
    if !fw_cfg::is_present() {
        return Err("fw_cfg not available");
    }

    let stride = width
        .checked_mul(FORMAT.bytes_per_pixel())
        .ok_or("framebuffer too wide")?;
    let fb_size = (stride as usize)
        .checked_mul(height as usize)
        .ok_or("framebuffer too large")?;

    let fb_addr = framebuffer_memory(fb_size).ok_or("failed to allocate framebuffer memory")?;
    if fb_addr < ram.start || fb_addr + fb_size > ram.end {
        return Err("framebuffer outside device-visible RAM");
    }

    // Identity mapping: virtual address == physical address
    let configured = fw_cfg::with_device(|dev| {
        Ramfb::configure(dev, fb_addr as u64, width, height, FORMAT)
    })
    .ok_or("fw_cfg not available")?;

    let device = match configured {
        Ok(device) => device,
        Err(e) => {
            log::error!("[ramfb] {}", e);
            return Err(match e {
                ConfigError::NotFound => "etc/ramfb missing (add -device ramfb to QEMU)",
                ConfigError::DmaUnavailable => "fw_cfg DMA not supported",
                ConfigError::UnexpectedEntrySize(_) => "etc/ramfb has an unexpected size",
                ConfigError::InvalidGeometry => "invalid framebuffer geometry",
                ConfigError::TransferFailed(TransportError::Timeout) => "fw_cfg DMA timed out",
                ConfigError::TransferFailed(_) => "fw_cfg DMA transfer failed",
            });
        }
    };

    {
        let mut state = FB_STATE.lock();
        *state = Some(FramebufferState {
            device,
            addr: fb_addr,
            width,
            height,
            stride,
            size: fb_size,
        });
    }
    FB_ADDR.store(fb_addr, Ordering::Release);
    FB_SIZE.store(fb_size, Ordering::Release);
    FB_INITIALIZED.store(true, Ordering::Release);

    crate::safe_print!(
        96,
        "[ramfb] Framebuffer initialized: {}x{} XRGB8888 at 0x{:x}\n",
        width,
        height,
        fb_addr
    );
    Ok(())
}

/// Copy an XRGB8888 pixel buffer into the framebuffer.
///
/// Returns the number of bytes copied, or 0 if there is no framebuffer.
pub fn draw(src: &[u8]) -> usize {
    let fb_addr = FB_ADDR.load(Ordering::Acquire);
    let fb_size = FB_SIZE.load(Ordering::Acquire);

    if fb_addr == 0 || fb_size == 0 {
        return 0;
    }

    let copy_len = src.len().min(fb_size);
    // SAFETY: the framebuffer is a live allocation of `fb_size` bytes that
    // is never freed
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), fb_addr as *mut u8, copy_len);
    }
    copy_len
}

/// Set one pixel; out of range coordinates are ignored.
pub fn put_pixel(x: u32, y: u32, color: u32) {
    let state = FB_STATE.lock();
    let Some(fb) = state.as_ref() else {
        return;
    };
    if x >= fb.width || y >= fb.height {
        return;
    }
    let offset = y as usize * fb.stride as usize + x as usize * 4;
    // SAFETY: offset is inside the framebuffer and 4-byte aligned
    unsafe { ((fb.addr + offset) as *mut u32).write_volatile(color) };
}

/// Read back one pixel.
pub fn get_pixel(x: u32, y: u32) -> Option<u32> {
    let state = FB_STATE.lock();
    let fb = state.as_ref()?;
    if x >= fb.width || y >= fb.height {
        return None;
    }
    let offset = y as usize * fb.stride as usize + x as usize * 4;
    // SAFETY: offset is inside the framebuffer and 4-byte aligned
    Some(unsafe { ((fb.addr + offset) as *const u32).read_volatile() })
}

/// Fill a rectangle, clipped to the screen.
pub fn fill_rect(x: u32, y: u32, w: u32, h: u32, color: u32) {
    let state = FB_STATE.lock();
    let Some(fb) = state.as_ref() else {
        return;
    };
    let x_end = x.saturating_add(w).min(fb.width);
    let y_end = y.saturating_add(h).min(fb.height);
    for row in y.min(y_end)..y_end {
        let line = fb.addr + row as usize * fb.stride as usize;
        for col in x.min(x_end)..x_end {
            // SAFETY: row/col are clipped to the framebuffer
            unsafe { ((line + col as usize * 4) as *mut u32).write_volatile(color) };
        }
    }
}

pub fn clear(color: u32) {
    let (w, h) = match info() {
        Some(info) => (info.width, info.height),
        None => return,
    };
    fill_rect(0, 0, w, h, color);
}

/// Eight vertical colour bars.
pub fn test_pattern() {
    const BARS: [u32; 8] = [
        0x00ff_ffff, // white
        0x00ff_ff00, // yellow
        0x0000_ffff, // cyan
        0x0000_ff00, // green
        0x00ff_00ff, // magenta
        0x00ff_0000, // red
        0x0000_00ff, // blue
        0x0000_0000, // black
    ];
    let Some(info) = info() else {
        return;
    };
    let bar = info.width.div_ceil(BARS.len() as u32);
    for (i, color) in BARS.iter().enumerate() {
        fill_rect(i as u32 * bar, 0, bar, info.height, *color);
    }
}

/// Send the stored configuration to the device again.
pub fn reapply() -> Result<(), FbError> {
    let device = FB_STATE
        .lock()
        .as_ref()
        .map(|fb| fb.device)
        .ok_or(FbError::NotInitialized)?;
    fw_cfg::with_device(|dev| device.reapply(dev))
        .ok_or(FbError::NotInitialized)?
        .map_err(FbError::from)
}

/// Framebuffer geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FBInfo {
    pub addr: usize,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32, // fourcc code
    pub size: usize,
}

/// Return framebuffer information, or `None` if not initialized.
pub fn info() -> Option<FBInfo> {
    let state = FB_STATE.lock();
    state.as_ref().map(|s| FBInfo {
        addr: s.addr,
        width: s.width,
        height: s.height,
        stride: s.stride,
        format: s.device.config().fourcc(),
        size: s.size,
    })
}

pub fn is_initialized() -> bool {
    FB_INITIALIZED.load(Ordering::Relaxed)
}

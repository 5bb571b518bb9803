//! QEMU ramfb (RAM-based framebuffer) configuration.
//!
//! ramfb scans out a linear pixel buffer in guest RAM. The guest tells the
//! device where that buffer is by writing one 28-byte [`RamfbConfig`] to
//! the `etc/ramfb` fw_cfg file; QEMU only accepts that write through DMA.
//!
//! There is no teardown: once configured the device reads the buffer until
//! it is reconfigured, so the buffer must stay allocated for good.
//!
//! Reference: <https://wiki.osdev.org/Ramfb>

use crate::codec::{RAMFB_CONFIG_SIZE, RamfbConfig};
use crate::device::FwCfg;
use crate::error::ConfigError;
use crate::io::RegisterIo;

/// fw_cfg file holding the ramfb configuration.
pub const RAMFB_FILE: &str = "etc/ramfb";

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// DRM pixel formats ramfb understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit `[X:8][R:8][G:8][B:8]`, fourcc "XR24"
    Xrgb8888,
    /// 32-bit `[A:8][R:8][G:8][B:8]`, fourcc "AR24"
    Argb8888,
    /// 24-bit packed, fourcc "RG24"
    Rgb888,
    /// 16-bit `[R:5][G:6][B:5]`, fourcc "RG16"
    Rgb565,
}

impl PixelFormat {
    pub const fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Xrgb8888 => fourcc(b"XR24"),
            PixelFormat::Argb8888 => fourcc(b"AR24"),
            PixelFormat::Rgb888 => fourcc(b"RG24"),
            PixelFormat::Rgb565 => fourcc(b"RG16"),
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Xrgb8888 | PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 => 2,
        }
    }

    pub fn from_fourcc(code: u32) -> Option<Self> {
        [
            PixelFormat::Xrgb8888,
            PixelFormat::Argb8888,
            PixelFormat::Rgb888,
            PixelFormat::Rgb565,
        ]
        .into_iter()
        .find(|f| f.fourcc() == code)
    }
}

/// Builds the configuration record for a linear, unpadded buffer.
pub fn build_config(
    buffer_addr: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<RamfbConfig, ConfigError> {
    if width == 0 || height == 0 {
        return Err(ConfigError::InvalidGeometry);
    }
    let stride = width
        .checked_mul(format.bytes_per_pixel())
        .ok_or(ConfigError::InvalidGeometry)?;
    stride
        .checked_mul(height)
        .ok_or(ConfigError::InvalidGeometry)?;

    let mut cfg = RamfbConfig::zeroed();
    cfg.set_address(buffer_addr);
    cfg.set_fourcc(format.fourcc());
    cfg.set_flags(0);
    cfg.set_width(width);
    cfg.set_height(height);
    cfg.set_stride(stride);
    Ok(cfg)
}

/// A configured ramfb device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ramfb {
    selector: u16,
    config: RamfbConfig,
}

impl Ramfb {
    /// Points the display at `buffer_addr`.
    ///
    /// `buffer_addr` is a physical address the device can reach. The caller
    /// keeps the buffer alive for as long as the device may scan it out.
    /// Nothing is sent unless every check passes.
    pub fn configure<I: RegisterIo>(
        dev: &mut FwCfg<I>,
        buffer_addr: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, ConfigError> {
        let config = build_config(buffer_addr, width, height, format)?;

        let entry = dev.find_file(RAMFB_FILE)?.ok_or(ConfigError::NotFound)?;
        if entry.size() as usize != RAMFB_CONFIG_SIZE {
            return Err(ConfigError::UnexpectedEntrySize(entry.size()));
        }
        if !dev.has_dma() {
            return Err(ConfigError::DmaUnavailable);
        }

        let ramfb = Self {
            selector: entry.selector(),
            config,
        };
        ramfb.send(dev)?;

        log::info!(
            "[ramfb] {}x{} fourcc={:#010x} stride={} at {:#x}",
            width,
            height,
            config.fourcc(),
            config.stride(),
            buffer_addr
        );
        Ok(ramfb)
    }

    /// Sends the same configuration again, e.g. after the display blanked.
    pub fn reapply<I: RegisterIo>(&self, dev: &mut FwCfg<I>) -> Result<(), ConfigError> {
        self.send(dev)
    }

    fn send<I: RegisterIo>(&self, dev: &mut FwCfg<I>) -> Result<(), ConfigError> {
        dev.dma_write(self.selector, self.config.as_bytes())?;
        Ok(())
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn config(&self) -> &RamfbConfig {
        &self.config
    }

    pub fn format(&self) -> Option<PixelFormat> {
        PixelFormat::from_fourcc(self.config.fourcc())
    }

    /// Size in bytes of the buffer the device scans out.
    pub fn buffer_len(&self) -> usize {
        self.config.stride() as usize * self.config.height() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FEATURE_TRADITIONAL, Options};
    use crate::directory::DirectoryTransport;
    use crate::error::TransportError;
    use crate::sim::SimDevice;

    fn ramfb_device() -> (FwCfg<SimDevice>, u16) {
        let mut sim = SimDevice::new();
        sim.insert_named("etc/fdt", &[0u8; 16]);
        let sel = sim.insert_named(RAMFB_FILE, &[0u8; RAMFB_CONFIG_SIZE]);
        sim.insert_named("opt/other", &[0u8; 2]);
        (FwCfg::probe(sim, Options::default()).unwrap(), sel)
    }

    #[test]
    fn xrgb_fourcc_matches_drm_code() {
        assert_eq!(PixelFormat::Xrgb8888.fourcc(), 0x3432_5258);
        assert_eq!(PixelFormat::Rgb565.fourcc(), 0x3631_4752);
        assert_eq!(PixelFormat::from_fourcc(0x3432_5258), Some(PixelFormat::Xrgb8888));
        assert_eq!(PixelFormat::from_fourcc(0), None);
    }

    #[test]
    fn stride_is_width_times_bytes_per_pixel() {
        let cfg = build_config(0x5000_0000, 640, 480, PixelFormat::Xrgb8888).unwrap();
        assert_eq!(cfg.stride(), 2560);
        assert_eq!(cfg.fourcc(), 0x3432_5258);
        assert_eq!(cfg.flags(), 0);
        let cfg = build_config(0, 641, 1, PixelFormat::Rgb888).unwrap();
        assert_eq!(cfg.stride(), 1923);
        assert!(cfg.stride() >= cfg.width() * PixelFormat::Rgb888.bytes_per_pixel());
    }

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(
            build_config(0, 0, 480, PixelFormat::Xrgb8888),
            Err(ConfigError::InvalidGeometry)
        );
        assert_eq!(
            build_config(0, u32::MAX, 1, PixelFormat::Xrgb8888),
            Err(ConfigError::InvalidGeometry)
        );
        assert_eq!(
            build_config(0, 65536, 65536, PixelFormat::Xrgb8888),
            Err(ConfigError::InvalidGeometry)
        );
    }

    #[test]
    fn configure_writes_expected_wire_bytes() {
        let (mut dev, sel) = ramfb_device();
        let ramfb = Ramfb::configure(&mut dev, 0x5000_0000, 640, 480, PixelFormat::Xrgb8888).unwrap();
        assert_eq!(ramfb.selector(), sel);
        assert_eq!(ramfb.buffer_len(), 2560 * 480);
        assert_eq!(ramfb.format(), Some(PixelFormat::Xrgb8888));

        let expected: [u8; 28] = [
            0x00, 0x00, 0x00, 0x00, 0x50, 0x00, 0x00, 0x00, // address
            0x34, 0x32, 0x52, 0x58, // fourcc
            0x00, 0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x02, 0x80, // width
            0x00, 0x00, 0x01, 0xe0, // height
            0x00, 0x00, 0x0a, 0x00, // stride
        ];
        assert_eq!(dev.io().entry(sel).unwrap(), &expected);

        let desc = dev.io().last_descriptor().unwrap();
        assert_eq!(desc.control(), ((sel as u32) << 16) | 0x18);
        assert_eq!(desc.length(), 28);
    }

    #[test]
    fn missing_entry_is_not_found() {
        let mut dev = FwCfg::probe(SimDevice::new(), Options::default()).unwrap();
        assert_eq!(
            Ramfb::configure(&mut dev, 0x5000_0000, 640, 480, PixelFormat::Xrgb8888),
            Err(ConfigError::NotFound)
        );
        assert_eq!(dev.io().dma_kicks(), 0);
    }

    #[test]
    fn wrong_entry_size_is_refused() {
        let mut sim = SimDevice::new();
        sim.insert_named(RAMFB_FILE, &[0u8; 32]);
        let mut dev = FwCfg::probe(sim, Options::default()).unwrap();
        assert_eq!(
            Ramfb::configure(&mut dev, 0x5000_0000, 640, 480, PixelFormat::Xrgb8888),
            Err(ConfigError::UnexpectedEntrySize(32))
        );
    }

    #[test]
    fn requires_dma() {
        let mut sim = SimDevice::new();
        sim.set_features(FEATURE_TRADITIONAL);
        sim.insert_named(RAMFB_FILE, &[0u8; RAMFB_CONFIG_SIZE]);
        let mut dev = FwCfg::probe(sim, Options::default()).unwrap();
        assert_eq!(
            Ramfb::configure(&mut dev, 0x5000_0000, 640, 480, PixelFormat::Xrgb8888),
            Err(ConfigError::DmaUnavailable)
        );
    }

    #[test]
    fn device_error_becomes_transfer_failed() {
        let (mut dev, _) = ramfb_device();
        dev.io_mut().fail_next_dma();
        assert_eq!(
            Ramfb::configure(&mut dev, 0x5000_0000, 640, 480, PixelFormat::Xrgb8888),
            Err(ConfigError::TransferFailed(TransportError::DeviceError))
        );
    }

    #[test]
    fn directory_transfer_error_is_not_reported_as_missing() {
        let options = Options {
            directory_transport: DirectoryTransport::Dma,
            dma_poll_budget: 3,
            ..Options::default()
        };

        let mut sim = SimDevice::new();
        sim.insert_named(RAMFB_FILE, &[0u8; RAMFB_CONFIG_SIZE]);
        let mut dev = FwCfg::probe(sim, options).unwrap();
        dev.io_mut().fail_next_dma();
        assert_eq!(
            Ramfb::configure(&mut dev, 0x5000_0000, 640, 480, PixelFormat::Xrgb8888),
            Err(ConfigError::TransferFailed(TransportError::DeviceError))
        );

        let mut sim = SimDevice::new();
        sim.insert_named(RAMFB_FILE, &[0u8; RAMFB_CONFIG_SIZE]);
        let mut dev = FwCfg::probe(sim, options).unwrap();
        dev.io_mut().never_complete();
        assert_eq!(
            Ramfb::configure(&mut dev, 0x5000_0000, 640, 480, PixelFormat::Xrgb8888),
            Err(ConfigError::TransferFailed(TransportError::Timeout))
        );
        assert!(!dev.has_dma());
    }

    #[test]
    fn reapply_resends_same_record() {
        let (mut dev, sel) = ramfb_device();
        let ramfb = Ramfb::configure(&mut dev, 0x4800_0000, 320, 200, PixelFormat::Xrgb8888).unwrap();
        dev.io_mut().clear_entry(sel);
        ramfb.reapply(&mut dev).unwrap();
        assert_eq!(dev.io().entry(sel).unwrap(), ramfb.config().as_bytes());
        assert_eq!(dev.io().dma_kicks(), 2);
    }
}

// ============================================================================
// Transport errors
// ============================================================================

/// Failure of a single DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The device set the ERROR bit in the descriptor control field
    DeviceError,
    /// The poll policy gave up before the device completed the transfer
    Timeout,
    /// An earlier transfer timed out; DMA stays disabled for this handle
    Wedged,
    /// The device does not advertise the DMA interface
    DmaUnavailable,
    /// The buffer is longer than a descriptor's 32-bit length field
    LengthTooLarge(usize),
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::DeviceError => write!(f, "fw_cfg DMA transfer rejected by device"),
            TransportError::Timeout => write!(f, "fw_cfg DMA transfer timed out"),
            TransportError::Wedged => write!(f, "fw_cfg DMA disabled after earlier timeout"),
            TransportError::DmaUnavailable => write!(f, "fw_cfg DMA interface not available"),
            TransportError::LengthTooLarge(len) => {
                write!(f, "fw_cfg DMA length {} exceeds 32 bits", len)
            }
        }
    }
}

// ============================================================================
// Probe errors
// ============================================================================

/// The MMIO window does not behave like a fw_cfg device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// Key 0x0000 did not read back "QEMU"
    BadSignature([u8; 4]),
    /// Feature bitmap advertises DMA but the DMA register lacks "QEMU CFG"
    DmaSignatureMismatch(u64),
}

impl core::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProbeError::BadSignature(sig) => {
                write!(f, "bad fw_cfg signature {:02x?}", sig)
            }
            ProbeError::DmaSignatureMismatch(raw) => {
                write!(f, "bad fw_cfg DMA signature {:#018x}", raw)
            }
        }
    }
}

// ============================================================================
// Framebuffer configuration errors
// ============================================================================

/// Failure to program the ramfb device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No "etc/ramfb" entry in the file directory (QEMU lacks `-device ramfb`)
    NotFound,
    /// The ramfb entry does not have the size of a configuration record
    UnexpectedEntrySize(u32),
    /// ramfb only accepts its configuration through DMA writes
    DmaUnavailable,
    /// Zero dimension, or stride/buffer size overflowing 32 bits
    InvalidGeometry,
    /// Reading the file directory or writing the configuration record
    /// over DMA failed
    TransferFailed(TransportError),
}

impl From<TransportError> for ConfigError {
    fn from(err: TransportError) -> Self {
        ConfigError::TransferFailed(err)
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::NotFound => {
                write!(f, "ramfb fw_cfg entry not found (add -device ramfb to QEMU)")
            }
            ConfigError::UnexpectedEntrySize(size) => {
                write!(f, "ramfb fw_cfg entry has unexpected size {}", size)
            }
            ConfigError::DmaUnavailable => write!(f, "ramfb requires the fw_cfg DMA interface"),
            ConfigError::InvalidGeometry => write!(f, "invalid framebuffer geometry"),
            ConfigError::TransferFailed(err) => write!(f, "ramfb configuration failed: {}", err),
        }
    }
}

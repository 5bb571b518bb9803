//! Big-endian wire structures exchanged with the fw_cfg device.
//!
//! Every structure here is a plain byte array with accessor methods. Fields
//! are read and written most-significant byte first at fixed offsets, so the
//! in-memory image is exactly what the device sees no matter how the host
//! would lay out an equivalent `#[repr(C)]` struct.
//!
//! This module is the only place that converts between host integers and
//! wire byte order. The DMA address register write in [`crate::dma`] is the
//! one deliberate exception.

use crate::io::DataWidth;

// ============================================================================
// Byte helpers
// ============================================================================

#[inline]
fn get_be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

#[inline]
fn get_be_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(raw)
}

#[inline]
fn get_be_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(raw)
}

#[inline]
fn put_be_u32(bytes: &mut [u8], at: usize, val: u32) {
    bytes[at..at + 4].copy_from_slice(&val.to_be_bytes());
}

#[inline]
fn put_be_u64(bytes: &mut [u8], at: usize, val: u64) {
    bytes[at..at + 8].copy_from_slice(&val.to_be_bytes());
}

// ============================================================================
// DMA access descriptor
// ============================================================================

/// Size of a DMA access descriptor on the wire.
pub const DMA_ACCESS_SIZE: usize = 16;

/// fw_cfg DMA access descriptor (`FWCfgDmaAccess`).
///
/// Layout: `[0..4]` control, `[4..8]` length, `[8..16]` data address.
/// The address is that of the data buffer, never of the descriptor itself.
///
/// The 8-byte alignment only affects where the descriptor may be placed;
/// it adds no padding since the payload is already 16 bytes.
#[repr(C, align(8))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DmaAccess {
    data: [u8; DMA_ACCESS_SIZE],
}

const _: () = assert!(core::mem::size_of::<DmaAccess>() == DMA_ACCESS_SIZE);

impl DmaAccess {
    pub const fn zeroed() -> Self {
        Self {
            data: [0; DMA_ACCESS_SIZE],
        }
    }

    pub fn new(control: u32, length: u32, address: u64) -> Self {
        let mut access = Self::zeroed();
        access.set_control(control);
        access.set_length(length);
        access.set_address(address);
        access
    }

    pub fn control(&self) -> u32 {
        get_be_u32(&self.data, 0)
    }

    pub fn set_control(&mut self, val: u32) {
        put_be_u32(&mut self.data, 0, val);
    }

    pub fn length(&self) -> u32 {
        get_be_u32(&self.data, 4)
    }

    pub fn set_length(&mut self, val: u32) {
        put_be_u32(&mut self.data, 4, val);
    }

    pub fn address(&self) -> u64 {
        get_be_u64(&self.data, 8)
    }

    pub fn set_address(&mut self, val: u64) {
        put_be_u64(&mut self.data, 8, val);
    }

    pub fn as_bytes(&self) -> &[u8; DMA_ACCESS_SIZE] {
        &self.data
    }

    pub const fn from_bytes(data: [u8; DMA_ACCESS_SIZE]) -> Self {
        Self { data }
    }

    pub fn encode(&self) -> [u8; DMA_ACCESS_SIZE] {
        self.data
    }

    pub fn decode(bytes: &[u8; DMA_ACCESS_SIZE]) -> Self {
        Self::from_bytes(*bytes)
    }
}

impl core::fmt::Debug for DmaAccess {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaAccess")
            .field("control", &format_args!("{:#010x}", self.control()))
            .field("length", &self.length())
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}

// ============================================================================
// ramfb configuration record
// ============================================================================

/// Size of the ramfb configuration record on the wire.
pub const RAMFB_CONFIG_SIZE: usize = 28;

/// ramfb configuration record (`RAMFBCfg`).
///
/// Layout: `[0..8]` address, `[8..12]` fourcc, `[12..16]` flags,
/// `[16..20]` width, `[20..24]` height, `[24..28]` stride.
/// Alignment is 1 so the type stays exactly 28 bytes.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RamfbConfig {
    data: [u8; RAMFB_CONFIG_SIZE],
}

const _: () = assert!(core::mem::size_of::<RamfbConfig>() == RAMFB_CONFIG_SIZE);

impl RamfbConfig {
    pub const fn zeroed() -> Self {
        Self {
            data: [0; RAMFB_CONFIG_SIZE],
        }
    }

    pub fn address(&self) -> u64 {
        get_be_u64(&self.data, 0)
    }

    pub fn set_address(&mut self, val: u64) {
        put_be_u64(&mut self.data, 0, val);
    }

    pub fn fourcc(&self) -> u32 {
        get_be_u32(&self.data, 8)
    }

    pub fn set_fourcc(&mut self, val: u32) {
        put_be_u32(&mut self.data, 8, val);
    }

    pub fn flags(&self) -> u32 {
        get_be_u32(&self.data, 12)
    }

    pub fn set_flags(&mut self, val: u32) {
        put_be_u32(&mut self.data, 12, val);
    }

    pub fn width(&self) -> u32 {
        get_be_u32(&self.data, 16)
    }

    pub fn set_width(&mut self, val: u32) {
        put_be_u32(&mut self.data, 16, val);
    }

    pub fn height(&self) -> u32 {
        get_be_u32(&self.data, 20)
    }

    pub fn set_height(&mut self, val: u32) {
        put_be_u32(&mut self.data, 20, val);
    }

    pub fn stride(&self) -> u32 {
        get_be_u32(&self.data, 24)
    }

    pub fn set_stride(&mut self, val: u32) {
        put_be_u32(&mut self.data, 24, val);
    }

    pub fn as_bytes(&self) -> &[u8; RAMFB_CONFIG_SIZE] {
        &self.data
    }

    pub const fn from_bytes(data: [u8; RAMFB_CONFIG_SIZE]) -> Self {
        Self { data }
    }

    pub fn encode(&self) -> [u8; RAMFB_CONFIG_SIZE] {
        self.data
    }

    pub fn decode(bytes: &[u8; RAMFB_CONFIG_SIZE]) -> Self {
        Self::from_bytes(*bytes)
    }
}

impl core::fmt::Debug for RamfbConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RamfbConfig")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("fourcc", &format_args!("{:#010x}", self.fourcc()))
            .field("flags", &self.flags())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("stride", &self.stride())
            .finish()
    }
}

// ============================================================================
// File directory record
// ============================================================================

/// Size of one file directory record.
pub const FILE_RECORD_SIZE: usize = 64;

/// Length of the NUL-padded name field in a directory record.
pub const FILE_NAME_LEN: usize = 56;

/// Raw file directory record (`FWCfgFile`).
///
/// Layout: `[0..4]` size, `[4..6]` selector, `[6..8]` reserved,
/// `[8..64]` NUL-padded name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    data: [u8; FILE_RECORD_SIZE],
}

impl FileRecord {
    pub const fn from_bytes(data: [u8; FILE_RECORD_SIZE]) -> Self {
        Self { data }
    }

    pub fn size(&self) -> u32 {
        get_be_u32(&self.data, 0)
    }

    pub fn select(&self) -> u16 {
        get_be_u16(&self.data, 4)
    }

    pub fn name_bytes(&self) -> &[u8; FILE_NAME_LEN] {
        self.data[8..]
            .try_into()
            .unwrap_or(&[0; FILE_NAME_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; FILE_RECORD_SIZE] {
        &self.data
    }

    /// Builds a record image, truncating `name` to leave room for a NUL.
    pub fn encode(size: u32, select: u16, name: &[u8]) -> [u8; FILE_RECORD_SIZE] {
        let mut data = [0u8; FILE_RECORD_SIZE];
        put_be_u32(&mut data, 0, size);
        data[4..6].copy_from_slice(&select.to_be_bytes());
        let len = name.len().min(FILE_NAME_LEN - 1);
        data[8..8 + len].copy_from_slice(&name[..len]);
        data
    }
}

// ============================================================================
// Register words
// ============================================================================

/// Native value to store into the 16-bit selector register so that the
/// device receives `key` most-significant byte first.
#[inline]
pub fn selector_word(key: u16) -> u16 {
    u16::from_ne_bytes(key.to_be_bytes())
}

/// Inverse of [`selector_word`].
#[inline]
pub fn selector_key(word: u16) -> u16 {
    u16::from_be_bytes(word.to_ne_bytes())
}

/// Splits a data register value into the stream bytes it carries.
///
/// The data register presents the stream in memory order for every access
/// width, so only the low `width` bytes of the native image are used.
pub fn unpack_data_word(width: DataWidth, value: u64, out: &mut [u8]) {
    let n = width.bytes();
    match width {
        DataWidth::Byte => out[..n].copy_from_slice(&(value as u8).to_ne_bytes()),
        DataWidth::Half => out[..n].copy_from_slice(&(value as u16).to_ne_bytes()),
        DataWidth::Word => out[..n].copy_from_slice(&(value as u32).to_ne_bytes()),
        DataWidth::Double => out[..n].copy_from_slice(&value.to_ne_bytes()),
    }
}

/// Assembles stream bytes into the value to store into the data register.
pub fn pack_data_word(width: DataWidth, bytes: &[u8]) -> u64 {
    match width {
        DataWidth::Byte => bytes[0] as u64,
        DataWidth::Half => u16::from_ne_bytes([bytes[0], bytes[1]]) as u64,
        DataWidth::Word => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
        DataWidth::Double => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            u64::from_ne_bytes(raw)
        }
    }
}

/// Decodes a big-endian `u32` such as the directory entry count.
pub fn be_u32(bytes: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*bytes)
}

/// Decodes the feature bitmap entry, which QEMU stores little-endian
/// unlike every other fw_cfg integer.
pub fn feature_bitmap(bytes: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_sixteen_bytes() {
        assert_eq!(core::mem::size_of::<DmaAccess>(), 16);
        assert_eq!(core::mem::align_of::<DmaAccess>(), 8);
        assert_eq!(DmaAccess::new(1, 2, 3).encode().len(), 16);
    }

    #[test]
    fn ramfb_config_is_twenty_eight_bytes() {
        assert_eq!(core::mem::size_of::<RamfbConfig>(), 28);
        assert_eq!(core::mem::align_of::<RamfbConfig>(), 1);
    }

    #[test]
    fn descriptor_round_trips_extremes() {
        for (control, length, address) in [
            (0, 0, 0),
            (u32::MAX, u32::MAX, u64::MAX),
            (0x0019_0018, 28, 0x4000_1000),
            (0x8000_0001, 1, 0x0000_0001_0000_0000),
        ] {
            let access = DmaAccess::new(control, length, address);
            let back = DmaAccess::decode(&access.encode());
            assert_eq!(back.control(), control);
            assert_eq!(back.length(), length);
            assert_eq!(back.address(), address);
        }
    }

    #[test]
    fn control_encodes_most_significant_byte_first() {
        let access = DmaAccess::new(0x0019_0018, 0, 0);
        assert_eq!(&access.as_bytes()[..4], &[0x00, 0x19, 0x00, 0x18]);
        // A pre-swapped value handed to the setter produces the host's
        // little-endian image instead, which is the double-swap defect.
        let double = DmaAccess::new(0x0019_0018u32.swap_bytes(), 0, 0);
        assert_eq!(&double.as_bytes()[..4], &[0x18, 0x00, 0x19, 0x00]);
        assert_ne!(access.as_bytes()[..4], double.as_bytes()[..4]);
    }

    #[test]
    fn high_address_word_is_never_dropped() {
        let access = DmaAccess::new(0, 0, 0x0000_0000_5000_0000);
        assert_eq!(
            &access.as_bytes()[8..],
            &[0x00, 0x00, 0x00, 0x00, 0x50, 0x00, 0x00, 0x00]
        );
        let access = DmaAccess::new(0, 0, 0x1234_5678_9abc_def0);
        assert_eq!(
            &access.as_bytes()[8..],
            &[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]
        );
    }

    #[test]
    fn ramfb_fields_land_at_fixed_offsets() {
        let mut cfg = RamfbConfig::zeroed();
        cfg.set_address(u64::MAX);
        cfg.set_fourcc(0x3432_5258);
        cfg.set_flags(0);
        cfg.set_width(u32::MAX);
        cfg.set_height(1);
        cfg.set_stride(0x0a00);
        let bytes = cfg.encode();
        assert_eq!(&bytes[0..8], &[0xff; 8]);
        assert_eq!(&bytes[8..12], b"42RX");
        assert_eq!(&bytes[12..16], &[0; 4]);
        assert_eq!(&bytes[16..20], &[0xff; 4]);
        assert_eq!(&bytes[20..24], &[0, 0, 0, 1]);
        assert_eq!(&bytes[24..28], &[0, 0, 0x0a, 0]);
        assert_eq!(RamfbConfig::decode(&bytes), cfg);
    }

    #[test]
    fn file_record_parses_qemu_layout() {
        let raw = FileRecord::encode(28, 0x0025, b"etc/ramfb");
        assert_eq!(&raw[0..8], &[0, 0, 0, 28, 0x00, 0x25, 0, 0]);
        let record = FileRecord::from_bytes(raw);
        assert_eq!(record.size(), 28);
        assert_eq!(record.select(), 0x0025);
        assert_eq!(&record.name_bytes()[..10], b"etc/ramfb\0");
    }

    #[test]
    fn selector_word_stores_big_endian() {
        let word = selector_word(0x0019);
        assert_eq!(word.to_ne_bytes(), [0x00, 0x19]);
        assert_eq!(selector_key(word), 0x0019);
    }

    #[test]
    fn data_words_keep_stream_order() {
        let stream = [0x51, 0x45, 0x4d, 0x55, 0x20, 0x43, 0x46, 0x47];
        for width in [
            DataWidth::Byte,
            DataWidth::Half,
            DataWidth::Word,
            DataWidth::Double,
        ] {
            let n = width.bytes();
            let word = pack_data_word(width, &stream[..n]);
            let mut out = [0u8; 8];
            unpack_data_word(width, word, &mut out);
            assert_eq!(&out[..n], &stream[..n]);
        }
    }
}

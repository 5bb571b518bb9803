//! In-memory fw_cfg device for host tests.
//!
//! Behaves like QEMU's MMIO fw_cfg as seen through [`RegisterIo`]: one
//! shared cursor for the data register and DMA, a directory rendered from
//! the named entries, and DMA descriptors executed when the guest polls
//! them. Counters let tests assert how the driver used the registers.

use std::collections::BTreeMap;
use std::string::String;
use std::vec::Vec;

use crate::codec::{self, DmaAccess, FileRecord};
use crate::device::{FEATURE_DMA, FEATURE_TRADITIONAL, KEY_ID, KEY_SIGNATURE, SIGNATURE};
use crate::directory::DEFAULT_DIRECTORY_KEY;
use crate::dma::{self, DMA_SIGNATURE, DmaControl};
use crate::io::{DataWidth, RegisterIo};

/// First key handed out to named entries (`FW_CFG_FILE_FIRST`).
const FIRST_FILE_KEY: u16 = 0x0020;

pub struct SimDevice {
    entries: BTreeMap<u16, Vec<u8>>,
    files: Vec<(String, u16)>,
    directory_key: u16,
    dma_signature: u64,

    selected: Option<u16>,
    cursor: usize,

    pending: Option<u64>,
    remaining: u32,
    latency: u32,
    fail_next: bool,
    never_complete: bool,
    lose_offset: bool,
    last_descriptor: Option<DmaAccess>,

    selects: u32,
    data_reads: usize,
    barriers: u32,
    observes: u32,
    kicks: u32,
}

impl SimDevice {
    pub fn new() -> Self {
        let mut sim = Self {
            entries: BTreeMap::new(),
            files: Vec::new(),
            directory_key: DEFAULT_DIRECTORY_KEY,
            dma_signature: DMA_SIGNATURE,
            selected: None,
            cursor: 0,
            pending: None,
            remaining: 0,
            latency: 1,
            fail_next: false,
            never_complete: false,
            lose_offset: false,
            last_descriptor: None,
            selects: 0,
            data_reads: 0,
            barriers: 0,
            observes: 0,
            kicks: 0,
        };
        sim.insert_legacy(KEY_SIGNATURE, &SIGNATURE);
        sim.set_features(FEATURE_TRADITIONAL | FEATURE_DMA);
        sim.render_directory();
        sim
    }

    // ========================================================================
    // Contents
    // ========================================================================

    /// Places `data` at a fixed key.
    pub fn insert_legacy(&mut self, key: u16, data: &[u8]) {
        self.entries.insert(key, data.to_vec());
    }

    /// Adds a named entry at the next free file key and lists it in the
    /// directory. Returns its selector.
    pub fn insert_named(&mut self, name: &str, data: &[u8]) -> u16 {
        let key = FIRST_FILE_KEY + self.files.len() as u16;
        self.entries.insert(key, data.to_vec());
        self.files.push((String::from(name), key));
        self.render_directory();
        key
    }

    pub fn selector_of(&self, name: &str) -> Option<u16> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, key)| *key)
    }

    pub fn entry(&self, key: u16) -> Option<&[u8]> {
        self.entries.get(&key).map(|e| e.as_slice())
    }

    /// Zeroes an entry in place.
    pub fn clear_entry(&mut self, key: u16) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.fill(0);
        }
    }

    pub fn set_features(&mut self, features: u32) {
        self.insert_legacy(KEY_ID, &features.to_le_bytes());
    }

    pub fn set_dma_signature(&mut self, signature: u64) {
        self.dma_signature = signature;
    }

    /// Moves the directory to another key.
    pub fn set_directory_key(&mut self, key: u16) {
        self.entries.remove(&self.directory_key);
        self.directory_key = key;
        self.render_directory();
    }

    fn render_directory(&mut self) {
        let mut dir = Vec::new();
        dir.extend_from_slice(&(self.files.len() as u32).to_be_bytes());
        for (name, key) in &self.files {
            let size = self.entries.get(key).map_or(0, |e| e.len()) as u32;
            dir.extend_from_slice(&FileRecord::encode(size, *key, name.as_bytes()));
        }
        self.entries.insert(self.directory_key, dir);
    }

    // ========================================================================
    // DMA behaviour
    // ========================================================================

    /// Completes each transfer on the `polls`-th observation.
    pub fn complete_after(&mut self, polls: u32) {
        self.latency = polls.max(1);
    }

    /// Makes the next transfer end with the ERROR bit.
    pub fn fail_next_dma(&mut self) {
        self.fail_next = true;
    }

    /// Transfers stay pending forever.
    pub fn never_complete(&mut self) {
        self.never_complete = true;
    }

    /// Reads without SELECT restart at offset 0 instead of continuing,
    /// with no error reported.
    pub fn lose_dma_offset(&mut self) {
        self.lose_offset = true;
    }

    // ========================================================================
    // Counters
    // ========================================================================

    pub fn selected(&self) -> Option<u16> {
        self.selected
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn select_count(&self) -> u32 {
        self.selects
    }

    pub fn data_reads(&self) -> usize {
        self.data_reads
    }

    pub fn barrier_count(&self) -> u32 {
        self.barriers
    }

    pub fn observe_count(&self) -> u32 {
        self.observes
    }

    pub fn dma_kicks(&self) -> u32 {
        self.kicks
    }

    /// Last descriptor the device executed, as it read it.
    pub fn last_descriptor(&self) -> Option<DmaAccess> {
        self.last_descriptor
    }

    pub fn reset_counters(&mut self) {
        self.selects = 0;
        self.data_reads = 0;
        self.barriers = 0;
        self.observes = 0;
        self.kicks = 0;
    }

    fn select(&mut self, key: u16) {
        self.selected = Some(key);
        self.cursor = 0;
    }

    /// Runs a descriptor. Returns `false` when the device would set ERROR.
    ///
    /// # Safety
    /// The descriptor's address must reach `length` live bytes.
    unsafe fn execute(&mut self, desc: &DmaAccess) -> bool {
        let ctl = DmaControl::from_bits_truncate(desc.control());
        let len = desc.length() as usize;

        if ctl.contains(DmaControl::SELECT) {
            self.select((desc.control() >> 16) as u16);
        } else if self.lose_offset {
            self.cursor = 0;
        }

        let Some(key) = self.selected else {
            return false;
        };

        if ctl.contains(DmaControl::READ) {
            let dst = desc.address() as *mut u8;
            let entry = self.entries.get(&key).map_or(&[][..], |e| e.as_slice());
            let start = self.cursor.min(entry.len());
            let avail = (entry.len() - start).min(len);
            // SAFETY: caller guarantees `dst` covers `len` bytes
            unsafe {
                core::ptr::copy_nonoverlapping(entry[start..].as_ptr(), dst, avail);
                core::ptr::write_bytes(dst.add(avail), 0, len - avail);
            }
            self.cursor += len;
        } else if ctl.contains(DmaControl::WRITE) {
            let cursor = self.cursor;
            let Some(entry) = self.entries.get_mut(&key) else {
                return false;
            };
            if cursor + len > entry.len() {
                return false;
            }
            // SAFETY: caller guarantees the source covers `len` bytes
            let src = unsafe { core::slice::from_raw_parts(desc.address() as *const u8, len) };
            entry[cursor..cursor + len].copy_from_slice(src);
            self.cursor += len;
        } else if ctl.contains(DmaControl::SKIP) {
            self.cursor += len;
        }
        true
    }
}

impl RegisterIo for SimDevice {
    fn write_selector(&mut self, raw: u16) {
        self.selects += 1;
        self.select(codec::selector_key(raw));
    }

    fn read_data(&mut self, width: DataWidth) -> u64 {
        self.data_reads += 1;
        let n = width.bytes();
        let mut bytes = [0u8; 8];
        if let Some(entry) = self.selected.and_then(|k| self.entries.get(&k)) {
            for (i, b) in bytes[..n].iter_mut().enumerate() {
                *b = entry.get(self.cursor + i).copied().unwrap_or(0);
            }
        }
        self.cursor += n;
        codec::pack_data_word(width, &bytes[..n])
    }

    fn write_data(&mut self, width: DataWidth, value: u64) {
        let n = width.bytes();
        let mut bytes = [0u8; 8];
        codec::unpack_data_word(width, value, &mut bytes[..n]);
        let cursor = self.cursor;
        if let Some(entry) = self.selected.and_then(|k| self.entries.get_mut(&k)) {
            for (i, b) in bytes[..n].iter().enumerate() {
                if let Some(slot) = entry.get_mut(cursor + i) {
                    *slot = *b;
                }
            }
        }
        self.cursor += n;
    }

    fn write_dma_address(&mut self, raw: u64) {
        self.kicks += 1;
        self.pending = Some(dma::dma_register_value(raw));
        self.remaining = self.latency;
    }

    fn read_dma_address(&mut self) -> u64 {
        dma::swap_for_dma_register(self.dma_signature)
    }

    fn barrier(&mut self) {
        self.barriers += 1;
    }

    unsafe fn observe(&mut self, desc: *const DmaAccess) -> DmaAccess {
        assert_eq!(
            self.pending,
            Some(desc as u64),
            "device was handed a different descriptor address"
        );
        self.observes += 1;
        // SAFETY: caller guarantees `desc` is live and aligned
        let mut seen = unsafe { core::ptr::read_volatile(desc) };

        if self.never_complete {
            return seen;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return seen;
        }

        self.last_descriptor = Some(seen);
        self.pending = None;
        let ok = !core::mem::take(&mut self.fail_next) && unsafe { self.execute(&seen) };
        seen.set_control(if ok { 0 } else { DmaControl::ERROR.bits() });
        // SAFETY: the descriptor is owned by the in-flight transfer, which
        // created `desc` from a mutable borrow
        unsafe { core::ptr::write_volatile(desc as *mut DmaAccess, seen) };
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_lists_named_entries() {
        let mut sim = SimDevice::new();
        let a = sim.insert_named("a", &[1, 2]);
        let b = sim.insert_named("etc/ramfb", &[0; 28]);
        assert_eq!((a, b), (0x0020, 0x0021));

        let dir = sim.entry(DEFAULT_DIRECTORY_KEY).unwrap();
        assert_eq!(&dir[..4], &[0, 0, 0, 2]);
        let mut raw = [0u8; codec::FILE_RECORD_SIZE];
        raw.copy_from_slice(&dir[4 + 64..4 + 128]);
        let rec = FileRecord::from_bytes(raw);
        assert_eq!(rec.size(), 28);
        assert_eq!(rec.select(), 0x0021);
    }

    #[test]
    fn reads_past_end_are_zero() {
        let mut sim = SimDevice::new();
        sim.insert_legacy(0x0030, &[7]);
        sim.write_selector(codec::selector_word(0x0030));
        let first = sim.read_data(DataWidth::Byte);
        let second = sim.read_data(DataWidth::Byte);
        assert_eq!((first, second), (7, 0));
    }
}

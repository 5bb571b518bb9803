//! fw_cfg file directory.
//!
//! The directory entry (key 0x0019 on current QEMU) holds a big-endian
//! `u32` count followed by that many 64-byte [`FileRecord`]s in device
//! order. Named entries such as `etc/ramfb` have no fixed key, so they are
//! resolved by scanning it.
//!
//! The scan goes through the legacy selector/data interface by default.
//! Sequential DMA reads of the small records were observed to lose their
//! position on one emulator version and return the same record again,
//! without any error bit. That is an empirical observation, not a protocol
//! rule, so the transport is a policy ([`DirectoryTransport`]).

use crate::codec::{self, FILE_NAME_LEN, FILE_RECORD_SIZE, FileRecord};

/// Directory key on current QEMU machine types.
pub const DEFAULT_DIRECTORY_KEY: u16 = 0x0019;

/// Which interface reads the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryTransport {
    /// One selector write, then sequential data register reads
    Legacy,
    /// One DMA SELECT|READ for the count, then DMA READs at the running offset
    Dma,
}

/// A named fw_cfg entry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    selector: u16,
    size: u32,
    name: [u8; FILE_NAME_LEN],
}

impl FileEntry {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            selector: record.select(),
            size: record.size(),
            name: *record.name_bytes(),
        }
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Name bytes up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILE_NAME_LEN);
        &self.name[..end]
    }

    /// Name as UTF-8, or an empty string for a malformed record.
    pub fn name(&self) -> &str {
        core::str::from_utf8(self.name_bytes()).unwrap_or("")
    }

    /// Compares names, ignoring a leading `/` on either side.
    pub fn matches(&self, name: &str) -> bool {
        strip_root(self.name_bytes()) == strip_root(name.as_bytes())
    }
}

impl core::fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileEntry")
            .field("selector", &format_args!("{:#06x}", self.selector))
            .field("size", &self.size)
            .field("name", &self.name())
            .finish()
    }
}

fn strip_root(name: &[u8]) -> &[u8] {
    name.strip_prefix(b"/").unwrap_or(name)
}

/// Source of directory bytes: positioned at the start of the directory by
/// `start`, then read strictly sequentially.
pub(crate) trait DirectoryReader {
    type Error;

    fn start(&mut self, buf: &mut [u8; 4]) -> Result<(), Self::Error>;
    fn next(&mut self, buf: &mut [u8; FILE_RECORD_SIZE]) -> Result<(), Self::Error>;
}

/// Walks the directory, calling `visit` for each entry until it returns
/// `false`. Returns the number of records read.
pub(crate) fn walk<R, F>(reader: &mut R, mut visit: F) -> Result<u32, R::Error>
where
    R: DirectoryReader,
    F: FnMut(&FileEntry) -> bool,
{
    let mut count = [0u8; 4];
    reader.start(&mut count)?;
    let count = codec::be_u32(&count);
    log::debug!("[fw_cfg] directory has {} entries", count);

    let mut record = [0u8; FILE_RECORD_SIZE];
    for read in 1..=count {
        reader.next(&mut record)?;
        let entry = FileEntry::from_record(&FileRecord::from_bytes(record));
        if !visit(&entry) {
            return Ok(read);
        }
    }
    Ok(count)
}

/// Scans for `name`, stopping at the first match.
pub(crate) fn find<R: DirectoryReader>(reader: &mut R, name: &str) -> Result<Option<FileEntry>, R::Error> {
    let mut found = None;
    walk(reader, |entry| {
        if entry.matches(name) {
            found = Some(*entry);
            false
        } else {
            true
        }
    })?;
    match &found {
        Some(entry) => log::debug!(
            "[fw_cfg] found '{}' selector={:#x} size={}",
            entry.name(),
            entry.selector(),
            entry.size()
        ),
        None => log::debug!("[fw_cfg] '{}' not found", name),
    }
    Ok(found)
}

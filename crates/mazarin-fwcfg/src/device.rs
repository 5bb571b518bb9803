//! Owned handle to one fw_cfg device.
//!
//! There is exactly one fw_cfg device and its selector cursor is global
//! state, so every operation takes `&mut self`. Callers sharing the handle
//! must hold a lock across each whole select→transfer→poll sequence; two
//! interleaved transfers corrupt each other and the device cannot tell.

use crate::codec::{self, FILE_RECORD_SIZE};
use crate::directory::{self, DirectoryReader, DirectoryTransport, FileEntry};
use crate::dma::{self, Completion, DmaRequest};
use crate::error::{ProbeError, TransportError};
use crate::io::{DataWidth, RegisterIo};
use crate::legacy;
use crate::poll::{PollPolicy, Spin};

/// Signature entry ("QEMU").
pub const KEY_SIGNATURE: u16 = 0x0000;
/// Feature bitmap entry.
pub const KEY_ID: u16 = 0x0001;

/// Expected contents of [`KEY_SIGNATURE`].
pub const SIGNATURE: [u8; 4] = *b"QEMU";

/// Feature bitmap: traditional interface (always set).
pub const FEATURE_TRADITIONAL: u32 = 1 << 0;
/// Feature bitmap: DMA interface.
pub const FEATURE_DMA: u32 = 1 << 1;

/// Poll budget used when no policy is supplied.
pub const DEFAULT_DMA_POLL_BUDGET: u32 = 50_000;

/// Tunables for a [`FwCfg`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Access width used on the data register
    pub data_width: DataWidth,
    /// Key of the file directory (QEMU version dependent)
    pub directory_key: u16,
    /// Interface used to scan the file directory
    pub directory_transport: DirectoryTransport,
    /// Poll budget for DMA transfers issued without an explicit policy
    pub dma_poll_budget: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            data_width: DataWidth::Double,
            directory_key: directory::DEFAULT_DIRECTORY_KEY,
            directory_transport: DirectoryTransport::Legacy,
            dma_poll_budget: DEFAULT_DMA_POLL_BUDGET,
        }
    }
}

/// A probed fw_cfg device.
pub struct FwCfg<I: RegisterIo> {
    io: I,
    options: Options,
    features: u32,
    dma_wedged: bool,
}

impl<I: RegisterIo> FwCfg<I> {
    /// Checks the signature and feature bitmap and, when DMA is advertised,
    /// the DMA register signature.
    pub fn probe(mut io: I, options: Options) -> Result<Self, ProbeError> {
        let mut sig = [0u8; 4];
        legacy::select(&mut io, KEY_SIGNATURE);
        legacy::read_bytes(&mut io, options.data_width, &mut sig);
        if sig != SIGNATURE {
            log::warn!("[fw_cfg] bad signature {:02x?}", sig);
            return Err(ProbeError::BadSignature(sig));
        }

        let mut id = [0u8; 4];
        legacy::select(&mut io, KEY_ID);
        legacy::read_bytes(&mut io, options.data_width, &mut id);
        let features = codec::feature_bitmap(&id);

        if features & FEATURE_DMA != 0 {
            let raw = io.read_dma_address();
            let sig = dma::decode_dma_signature(raw);
            if sig != dma::DMA_SIGNATURE {
                log::warn!("[fw_cfg] DMA advertised but register reads {:#018x}", sig);
                return Err(ProbeError::DmaSignatureMismatch(sig));
            }
        }

        log::info!(
            "[fw_cfg] device present, features={:#x} dma={}",
            features,
            features & FEATURE_DMA != 0
        );

        Ok(Self {
            io,
            options,
            features,
            dma_wedged: false,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn features(&self) -> u32 {
        self.features
    }

    /// Whether DMA transfers can currently be issued.
    pub fn has_dma(&self) -> bool {
        self.features & FEATURE_DMA != 0 && !self.dma_wedged
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    // ========================================================================
    // Legacy interface
    // ========================================================================

    /// Reads the start of entry `key` into `buf` through the data register.
    pub fn read_entry(&mut self, key: u16, buf: &mut [u8]) {
        legacy::select(&mut self.io, key);
        legacy::read_bytes(&mut self.io, self.options.data_width, buf);
    }

    // ========================================================================
    // DMA interface
    // ========================================================================

    /// Runs `request` with the default poll budget.
    ///
    /// # Safety
    /// See [`dma::transfer`].
    pub unsafe fn dma_request(&mut self, request: &DmaRequest) -> Result<Completion, TransportError> {
        let mut policy = Spin::bounded(self.options.dma_poll_budget);
        unsafe { self.dma_request_with(request, &mut policy) }
    }

    /// Runs `request` with a caller supplied poll policy.
    ///
    /// A timeout wedges DMA for the rest of this handle's life.
    ///
    /// # Safety
    /// See [`dma::transfer`].
    pub unsafe fn dma_request_with<P: PollPolicy + ?Sized>(
        &mut self,
        request: &DmaRequest,
        policy: &mut P,
    ) -> Result<Completion, TransportError> {
        if self.dma_wedged {
            return Err(TransportError::Wedged);
        }
        if self.features & FEATURE_DMA == 0 {
            return Err(TransportError::DmaUnavailable);
        }
        let result = unsafe { dma::transfer(&mut self.io, request, policy) };
        if result == Err(TransportError::Timeout) {
            self.dma_wedged = true;
        }
        result
    }

    /// Reads the start of entry `key` into `buf` with one DMA transfer.
    pub fn dma_read(&mut self, key: u16, buf: &mut [u8]) -> Result<Completion, TransportError> {
        let request = DmaRequest::read(
            Some(key),
            self.io.dma_address(buf.as_mut_ptr() as usize),
            dma_len(buf.len())?,
        );
        // SAFETY: `buf` is exclusively borrowed until the transfer returns
        unsafe { self.dma_request(&request) }
    }

    /// Writes `data` to the start of entry `key` with one DMA transfer.
    pub fn dma_write(&mut self, key: u16, data: &[u8]) -> Result<Completion, TransportError> {
        let request = DmaRequest::write(
            Some(key),
            self.io.dma_address(data.as_ptr() as usize),
            dma_len(data.len())?,
        );
        // SAFETY: `data` is borrowed until the transfer returns and the
        // device only reads from it
        unsafe { self.dma_request(&request) }
    }

    /// Selects `key` and skips `count` bytes, leaving the cursor there.
    pub fn dma_skip(&mut self, key: u16, count: u32) -> Result<Completion, TransportError> {
        let request = DmaRequest::skip(Some(key), count);
        // SAFETY: skip moves no data
        unsafe { self.dma_request(&request) }
    }

    // ========================================================================
    // File directory
    // ========================================================================

    /// Resolves a named entry.
    ///
    /// `Ok(None)` means the directory was read completely and has no such
    /// name. A legacy scan never fails; a DMA scan returns the transfer
    /// error that stopped it.
    pub fn find_file(&mut self, name: &str) -> Result<Option<FileEntry>, TransportError> {
        match self.options.directory_transport {
            DirectoryTransport::Legacy => directory::find(&mut LegacyReader::new(self), name),
            DirectoryTransport::Dma => directory::find(&mut DmaReader::new(self), name),
        }
    }

    /// Visits every directory entry in device order until `visit` returns
    /// `false`.
    pub fn for_each_file<F>(&mut self, visit: F) -> Result<u32, TransportError>
    where
        F: FnMut(&FileEntry) -> bool,
    {
        match self.options.directory_transport {
            DirectoryTransport::Legacy => directory::walk(&mut LegacyReader::new(self), visit),
            DirectoryTransport::Dma => directory::walk(&mut DmaReader::new(self), visit),
        }
    }

    /// Number of entries in the file directory.
    pub fn file_count(&mut self) -> Result<u32, TransportError> {
        let mut count = [0u8; 4];
        match self.options.directory_transport {
            DirectoryTransport::Legacy => LegacyReader::new(self).start(&mut count)?,
            DirectoryTransport::Dma => DmaReader::new(self).start(&mut count)?,
        }
        Ok(codec::be_u32(&count))
    }
}

fn dma_len(len: usize) -> Result<u32, TransportError> {
    u32::try_from(len).map_err(|_| TransportError::LengthTooLarge(len))
}

struct LegacyReader<'a, I: RegisterIo> {
    dev: &'a mut FwCfg<I>,
}

impl<'a, I: RegisterIo> LegacyReader<'a, I> {
    fn new(dev: &'a mut FwCfg<I>) -> Self {
        Self { dev }
    }
}

impl<I: RegisterIo> DirectoryReader for LegacyReader<'_, I> {
    type Error = TransportError;

    fn start(&mut self, buf: &mut [u8; 4]) -> Result<(), TransportError> {
        self.dev.read_entry(self.dev.options.directory_key, buf);
        Ok(())
    }

    fn next(&mut self, buf: &mut [u8; FILE_RECORD_SIZE]) -> Result<(), TransportError> {
        legacy::read_bytes(&mut self.dev.io, self.dev.options.data_width, buf);
        Ok(())
    }
}

struct DmaReader<'a, I: RegisterIo> {
    dev: &'a mut FwCfg<I>,
}

impl<'a, I: RegisterIo> DmaReader<'a, I> {
    fn new(dev: &'a mut FwCfg<I>) -> Self {
        Self { dev }
    }
}

impl<I: RegisterIo> DirectoryReader for DmaReader<'_, I> {
    type Error = TransportError;

    fn start(&mut self, buf: &mut [u8; 4]) -> Result<(), TransportError> {
        let key = self.dev.options.directory_key;
        self.dev.dma_read(key, buf).map(|_| ())
    }

    fn next(&mut self, buf: &mut [u8; FILE_RECORD_SIZE]) -> Result<(), TransportError> {
        let request = DmaRequest::read(
            None,
            self.dev.io.dma_address(buf.as_mut_ptr() as usize),
            FILE_RECORD_SIZE as u32,
        );
        // SAFETY: `buf` is exclusively borrowed until the transfer returns
        unsafe { self.dev.dma_request(&request) }.map(|_| ())
    }
}

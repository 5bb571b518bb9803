//! The kernel's fw_cfg device.
//!
//! There is one fw_cfg device per machine and its selector is global, so
//! the handle lives behind a single lock. Every transaction runs with IRQs
//! masked and the lock held from the selector write until the last data
//! access or DMA completion.

use mazarin_fwcfg::{FileEntry, FwCfg, Mmio, Options, ProbeError, TransportError};
use spinning_top::Spinlock;

use crate::config;
use crate::irq;

static FW_CFG: Spinlock<Option<FwCfg<Mmio>>> = Spinlock::new(None);

fn options() -> Options {
    Options {
        data_width: config::FW_CFG_DATA_WIDTH,
        directory_key: config::FW_CFG_DIRECTORY_KEY,
        directory_transport: config::FW_CFG_DIRECTORY_TRANSPORT,
        dma_poll_budget: config::FW_CFG_DMA_POLL_BUDGET,
    }
}

/// Probe the device at `base` and keep the handle.
pub fn init(base: usize) -> Result<(), ProbeError> {
    irq::with_irqs_disabled(|| {
        let mut slot = FW_CFG.lock();
        if slot.is_some() {
            return Ok(());
        }
        // SAFETY: `base` comes from the DTB (or the virt machine default),
        // is covered by the boot device mapping and is only ever accessed
        // through this handle
        let io = unsafe { Mmio::new(base) };
        let dev = FwCfg::probe(io, options())?;
        *slot = Some(dev);
        Ok(())
    })
}

/// Run `f` with exclusive access to the device.
///
/// Returns `None` if [`init`] has not succeeded.
pub fn with_device<T>(f: impl FnOnce(&mut FwCfg<Mmio>) -> T) -> Option<T> {
    irq::with_irqs_disabled(|| FW_CFG.lock().as_mut().map(f))
}

pub fn is_present() -> bool {
    with_device(|_| ()).is_some()
}

pub fn has_dma() -> bool {
    with_device(|dev| dev.has_dma()).unwrap_or(false)
}

/// Look up a named entry such as `etc/ramfb`.
///
/// `Ok(None)` when the name is absent or fw_cfg was never probed.
pub fn find_file(name: &str) -> Result<Option<FileEntry>, TransportError> {
    with_device(|dev| dev.find_file(name)).unwrap_or(Ok(None))
}

/// Log every named entry, one line each.
pub fn dump_directory() {
    let result = with_device(|dev| {
        dev.for_each_file(|entry| {
            crate::safe_print!(
                96,
                "  {:#06x} {:>8}  {}\n",
                entry.selector(),
                entry.size(),
                entry.name()
            );
            true
        })
    });
    match result {
        Some(Ok(count)) => log::info!("[fw_cfg] {} directory entries", count),
        Some(Err(e)) => log::warn!("[fw_cfg] directory read failed: {}", e),
        None => log::warn!("[fw_cfg] not initialized"),
    }
}

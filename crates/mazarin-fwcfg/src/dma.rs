//! fw_cfg DMA interface.
//!
//! A transfer is described by a 16-byte [`DmaAccess`] in guest memory. The
//! guest hands the descriptor's physical address to the DMA register and
//! the device clears the control field when it is done, leaving only the
//! ERROR bit set on failure.
//!
//! Two byte-order domains meet here and must not be mixed:
//!   - descriptor *contents* are big-endian and go through [`crate::codec`];
//!     callers pass native values and never pre-swap them.
//!   - the descriptor *address* goes through the DMA register, whose MMIO
//!     region swaps every store. [`swap_for_dma_register`] compensates for
//!     that and is used for nothing else.
//!
//! Getting the register value wrong does not fault: the device reads a
//! descriptor from a garbage address and the guest waits forever.

use bitflags::bitflags;

use crate::codec::DmaAccess;
use crate::error::TransportError;
use crate::io::RegisterIo;
use crate::poll::PollPolicy;

bitflags! {
    /// Control bits of a DMA access descriptor (low 16 bits of `control`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaControl: u32 {
        const ERROR = 1 << 0;
        const READ = 1 << 1;
        const SKIP = 1 << 2;
        const SELECT = 1 << 3;
        const WRITE = 1 << 4;
    }
}

/// Signature read back from the DMA address register ("QEMU CFG").
pub const DMA_SIGNATURE: u64 = 0x5145_4D55_2043_4647;

/// Value to store into the DMA address register so the device receives
/// `addr`.
///
/// The register region is big-endian: the device byte-swaps every host
/// store, so the host stores the address pre-swapped. This is the only
/// raw byte swap in the crate; descriptor fields use the codec.
#[inline]
pub fn swap_for_dma_register(addr: u64) -> u64 {
    addr.to_be()
}

/// Inverse of [`swap_for_dma_register`], as seen from the device side.
#[inline]
pub fn dma_register_value(raw: u64) -> u64 {
    u64::from_be(raw)
}

/// Decodes the DMA register signature the same way as an address.
pub fn decode_dma_signature(raw: u64) -> u64 {
    dma_register_value(raw)
}

/// Direction of a DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaOp {
    /// Device entry → guest buffer
    Read,
    /// Guest buffer → device entry
    Write,
    /// Advance the entry offset without moving data
    Skip,
}

/// One DMA transfer, before it is encoded into a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRequest {
    /// Entry to select first; `None` continues at the current offset
    pub selector: Option<u16>,
    pub op: DmaOp,
    pub length: u32,
    /// Physical address of the data buffer
    pub address: u64,
}

impl DmaRequest {
    pub fn read(selector: Option<u16>, address: u64, length: u32) -> Self {
        Self {
            selector,
            op: DmaOp::Read,
            length,
            address,
        }
    }

    pub fn write(selector: Option<u16>, address: u64, length: u32) -> Self {
        Self {
            selector,
            op: DmaOp::Write,
            length,
            address,
        }
    }

    pub fn skip(selector: Option<u16>, length: u32) -> Self {
        Self {
            selector,
            op: DmaOp::Skip,
            length,
            address: 0,
        }
    }

    /// Native control word: selector in bits 31..16, operation bits below.
    pub fn control_word(&self) -> u32 {
        let mut ctl = match self.op {
            DmaOp::Read => DmaControl::READ,
            DmaOp::Write => DmaControl::WRITE,
            DmaOp::Skip => DmaControl::SKIP,
        };
        let mut word = 0;
        if let Some(selector) = self.selector {
            ctl |= DmaControl::SELECT;
            word = (selector as u32) << 16;
        }
        word | ctl.bits()
    }

    pub fn descriptor(&self) -> DmaAccess {
        DmaAccess::new(self.control_word(), self.length, self.address)
    }
}

/// Successful end of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Number of descriptor observations, including the one that saw the
    /// control field cleared
    pub polls: u32,
}

/// Outcome of inspecting a descriptor's control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaState {
    Pending,
    Done,
    Error,
}

impl DmaState {
    pub fn of(control: u32) -> Self {
        if control & DmaControl::ERROR.bits() != 0 {
            DmaState::Error
        } else if control == 0 {
            DmaState::Done
        } else {
            DmaState::Pending
        }
    }
}

/// Runs one DMA transfer to completion.
///
/// The descriptor lives in this stack frame for the duration of the call.
/// On [`TransportError::Timeout`] the device may still complete later and
/// write into that memory; callers must stop using DMA on this device.
///
/// # Safety
/// `request.address` must reach a buffer of at least `request.length`
/// bytes that stays valid (and, for reads, writable) until this returns.
pub unsafe fn transfer<I, P>(
    io: &mut I,
    request: &DmaRequest,
    policy: &mut P,
) -> Result<Completion, TransportError>
where
    I: RegisterIo + ?Sized,
    P: PollPolicy + ?Sized,
{
    if request.length == 0 && request.selector.is_none() {
        return Ok(Completion { polls: 0 });
    }

    let mut slot = DmaAccess::zeroed();
    let desc: *mut DmaAccess = &mut slot;
    // SAFETY: `desc` points at `slot`, which outlives the transfer
    unsafe { core::ptr::write_volatile(desc, request.descriptor()) };

    // Descriptor stores must land before the device learns its address
    io.barrier();
    let desc_phys = io.dma_address(desc as usize);
    io.write_dma_address(swap_for_dma_register(desc_phys));
    io.barrier();

    let mut polls = 0u32;
    loop {
        io.barrier();
        // SAFETY: `desc` is live and aligned for the whole loop
        let seen = unsafe { io.observe(desc) };
        polls = polls.saturating_add(1);
        match DmaState::of(seen.control()) {
            DmaState::Done => return Ok(Completion { polls }),
            DmaState::Error => {
                log::warn!(
                    "[fw_cfg] DMA error: control={:#010x} len={}",
                    request.control_word(),
                    request.length
                );
                return Err(TransportError::DeviceError);
            }
            DmaState::Pending => {}
        }
        if !policy.keep_waiting(polls) {
            log::warn!("[fw_cfg] DMA timed out after {} polls", polls);
            return Err(TransportError::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::Spin;
    use crate::sim::SimDevice;

    fn write_request(buf: &[u8], selector: u16) -> DmaRequest {
        DmaRequest::write(Some(selector), buf.as_ptr() as u64, buf.len() as u32)
    }

    #[test]
    fn control_word_packs_selector_and_bits() {
        let req = DmaRequest::write(Some(0x0019), 0, 28);
        assert_eq!(req.control_word(), 0x0019_0018);
        let req = DmaRequest::read(None, 0, 4);
        assert_eq!(req.control_word(), DmaControl::READ.bits());
        let req = DmaRequest::skip(Some(0x0020), 8);
        assert_eq!(req.control_word(), 0x0020_000c);
    }

    #[test]
    fn register_value_is_swapped_address() {
        let addr = 0x0000_0000_4000_1230u64;
        let raw = swap_for_dma_register(addr);
        assert_eq!(raw.to_ne_bytes(), addr.to_be_bytes());
        assert_eq!(dma_register_value(raw), addr);
    }

    #[test]
    fn state_of_control_word() {
        assert_eq!(DmaState::of(0), DmaState::Done);
        assert_eq!(DmaState::of(DmaControl::ERROR.bits()), DmaState::Error);
        assert_eq!(DmaState::of(0x0019_0019), DmaState::Error);
        assert_eq!(DmaState::of(0x0019_0018), DmaState::Pending);
    }

    #[test]
    fn completes_after_exactly_n_polls() {
        for n in [1u32, 2, 7] {
            let mut dev = SimDevice::new();
            dev.insert_named("etc/ramfb", &[0u8; 4]);
            let sel = dev.selector_of("etc/ramfb").unwrap();
            dev.complete_after(n);
            let data = [1u8, 2, 3, 4];
            let res = unsafe { transfer(&mut dev, &write_request(&data, sel), &mut Spin::bounded(100)) };
            assert_eq!(res, Ok(Completion { polls: n }));
            assert_eq!(dev.observe_count(), n);
            assert_eq!(dev.entry(sel).unwrap(), &data);
        }
    }

    #[test]
    fn error_bit_stops_polling_immediately() {
        let mut dev = SimDevice::new();
        dev.insert_named("etc/ramfb", &[0u8; 4]);
        let sel = dev.selector_of("etc/ramfb").unwrap();
        dev.complete_after(3);
        dev.fail_next_dma();
        let data = [0u8; 4];
        let res = unsafe { transfer(&mut dev, &write_request(&data, sel), &mut Spin::bounded(100)) };
        assert_eq!(res, Err(TransportError::DeviceError));
        assert_eq!(dev.observe_count(), 3);
    }

    #[test]
    fn error_seen_on_first_poll_is_reported_once() {
        let mut dev = SimDevice::new();
        dev.fail_next_dma();
        let data = [0u8; 4];
        let res = unsafe { transfer(&mut dev, &write_request(&data, 0x0042), &mut Spin::bounded(100)) };
        assert_eq!(res, Err(TransportError::DeviceError));
        assert_eq!(dev.observe_count(), 1);
    }

    #[test]
    fn budget_exhaustion_is_timeout() {
        let mut dev = SimDevice::new();
        dev.insert_named("etc/ramfb", &[0u8; 4]);
        let sel = dev.selector_of("etc/ramfb").unwrap();
        dev.never_complete();
        let data = [0u8; 4];
        let res = unsafe { transfer(&mut dev, &write_request(&data, sel), &mut Spin::bounded(5)) };
        assert_eq!(res, Err(TransportError::Timeout));
        assert_eq!(dev.observe_count(), 5);
    }

    #[test]
    fn read_lands_in_guest_buffer() {
        let mut dev = SimDevice::new();
        dev.insert_legacy(0x0000, b"QEMU");
        let mut buf = [0u8; 4];
        let req = DmaRequest::read(Some(0x0000), buf.as_mut_ptr() as u64, 4);
        let res = unsafe { transfer(&mut dev, &req, &mut Spin::unbounded()) };
        assert!(res.is_ok());
        assert_eq!(&buf, b"QEMU");
    }

    #[test]
    fn device_sees_descriptor_address_not_swapped_twice() {
        let mut dev = SimDevice::new();
        dev.insert_legacy(0x0000, b"QEMU");
        let mut buf = [0u8; 4];
        let req = DmaRequest::read(Some(0x0000), buf.as_mut_ptr() as u64, 4);
        unsafe { transfer(&mut dev, &req, &mut Spin::unbounded()) }.unwrap();
        let seen = dev.last_descriptor().unwrap();
        assert_eq!(seen.control(), 0x0000_000a);
        assert_eq!(seen.length(), 4);
        assert_eq!(seen.address(), buf.as_ptr() as u64);
    }

    #[test]
    fn barriers_bracket_kick_and_every_poll() {
        let mut dev = SimDevice::new();
        dev.insert_legacy(0x0000, b"QEMU");
        dev.complete_after(4);
        let mut buf = [0u8; 4];
        let req = DmaRequest::read(Some(0x0000), buf.as_mut_ptr() as u64, 4);
        unsafe { transfer(&mut dev, &req, &mut Spin::unbounded()) }.unwrap();
        assert_eq!(dev.dma_kicks(), 1);
        assert_eq!(dev.barrier_count(), 2 + 4);
    }

    #[test]
    fn empty_request_without_select_is_noop() {
        let mut dev = SimDevice::new();
        let req = DmaRequest::read(None, 0, 0);
        let res = unsafe { transfer(&mut dev, &req, &mut Spin::unbounded()) };
        assert_eq!(res, Ok(Completion { polls: 0 }));
        assert_eq!(dev.dma_kicks(), 0);
    }
}

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use spinning_top::Spinlock;
use talc::{ErrOnOom, Span, Talc};

#[global_allocator]
static ALLOCATOR: Talck = Talck;

static TALC: Spinlock<Talc<ErrOnOom>> = Spinlock::new(Talc::new(ErrOnOom));

/// Hand `[start, start + size)` to the heap.
pub fn init(start: usize, size: usize) -> Result<(), &'static str> {
    if size == 0 {
        return Err("empty heap region");
    }
    // SAFETY: the caller passes a RAM range above the kernel image that
    // nothing else uses
    unsafe {
        TALC.lock()
            .claim(Span::from_base_size(start as *mut u8, size))
            .map(|_| ())
            .map_err(|()| "heap region too small to claim")
    }
}

/// Page-aligned, zeroed, never-freed allocation for memory a device keeps
/// reading after the kernel is done with it.
pub fn alloc_pages_zeroed(size: usize) -> Option<NonNull<u8>> {
    const PAGE: usize = 4096;
    if size == 0 {
        return None;
    }
    let layout = Layout::from_size_align(size.div_ceil(PAGE) * PAGE, PAGE).ok()?;
    // SAFETY: layout size is non-zero
    NonNull::new(unsafe { ALLOCATOR.alloc_zeroed(layout) })
}

struct Talck;

unsafe impl GlobalAlloc for Talck {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe {
            TALC.lock()
                .malloc(layout)
                .map(|ptr| ptr.as_ptr())
                .unwrap_or(core::ptr::null_mut())
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe {
            TALC.lock().free(NonNull::new_unchecked(ptr), layout);
        }
    }
}

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
mod allocator;
#[cfg(target_os = "none")]
mod boot;
#[cfg(target_os = "none")]
mod config;
#[cfg(target_os = "none")]
#[macro_use]
mod console;
#[cfg(target_os = "none")]
mod fb_console;
#[cfg(target_os = "none")]
mod fw_cfg;
#[cfg(target_os = "none")]
mod irq;
#[cfg(target_os = "none")]
mod logger;
#[cfg(target_os = "none")]
mod ramfb;

/// The kernel only exists for `aarch64-unknown-none`; a hosted build gets
/// this stub so the workspace still builds and tests on a workstation.
#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!(
        "mazarin is a bare-metal kernel: build with --target aarch64-unknown-none \
         and boot it with qemu-system-aarch64 -M virt -device ramfb -kernel"
    );
}

#[cfg(target_os = "none")]
use core::panic::PanicInfo;

/// Halt the CPU in a low-power wait loop.
#[cfg(target_os = "none")]
#[inline]
fn halt() -> ! {
    halt_with_code(1)
}

/// Exit QEMU with a specific exit code using ARM semihosting.
/// Requires QEMU to be started with `-semihosting` flag.
/// Falls back to wfi loop if semihosting is not available.
#[cfg(target_os = "none")]
#[inline]
fn halt_with_code(code: u32) -> ! {
    // SYS_EXIT_EXTENDED (0x20) takes [reason, exit_code];
    // ADP_Stopped_ApplicationExit = 0x20026
    let block: [u64; 2] = [0x20026, code as u64];

    unsafe {
        core::arch::asm!(
            "hlt #0xf000",
            in("x0") 0x20u64,
            in("x1") block.as_ptr(),
            options(nostack)
        );
    }

    idle()
}

#[cfg(target_os = "none")]
fn idle() -> ! {
    loop {
        // SAFETY: wfi just puts CPU in low-power state until next interrupt.
        unsafe { core::arch::asm!("wfi") }
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    console::print("\n\n!!! PANIC !!!\n");
    if let Some(location) = info.location() {
        console::print("Location: ");
        console::print(location.file());
        console::print(":");
        console::print_dec(location.line() as usize);
        console::print("\n");
    }
    // Stack formatting only: the heap may be what failed
    console::print("Message: ");
    {
        use core::fmt::Write;
        let mut buf = console::StackWriter::<256>::new();
        let _ = write!(buf, "{}", info.message());
        console::print(buf.as_str());
    }
    console::print("\n");
    halt()
}

/// Entry from boot.rs with the MMU on and the stack set up
#[cfg(target_os = "none")]
#[unsafe(no_mangle)]
pub extern "C" fn rust_start(dtb_ptr: usize) -> ! {
    kernel_main(dtb_ptr)
}

// ============================================================================
// Platform discovery
// ============================================================================

/// DTB magic number (big-endian: 0xd00dfeed)
#[cfg(target_os = "none")]
const DTB_MAGIC: u32 = 0xd00dfeed;

#[cfg(target_os = "none")]
struct Platform {
    ram_base: usize,
    ram_size: usize,
    fw_cfg_base: usize,
    dtb: usize,
}

#[cfg(target_os = "none")]
fn has_dtb_magic(addr: usize) -> bool {
    // SAFETY: only called on addresses inside identity-mapped RAM
    let magic = unsafe { core::ptr::read_volatile(addr as *const u32) };
    u32::from_be(magic) == DTB_MAGIC
}

/// Find the DTB: x0 at entry, else the bottom of RAM where QEMU puts it
/// for bare-metal images, else the fixed loader address.
#[cfg(target_os = "none")]
fn find_dtb(dtb_ptr: usize) -> Option<usize> {
    [dtb_ptr, config::DEFAULT_RAM_BASE, config::DTB_FIXED_ADDR]
        .into_iter()
        .filter(|&addr| addr != 0)
        .find(|&addr| has_dtb_magic(addr))
}

#[cfg(target_os = "none")]
fn detect_platform(dtb_ptr: usize) -> Platform {
    let defaults = Platform {
        ram_base: config::DEFAULT_RAM_BASE,
        ram_size: config::DEFAULT_RAM_SIZE,
        fw_cfg_base: config::FW_CFG_BASE_FALLBACK,
        dtb: 0,
    };

    let Some(dtb) = find_dtb(dtb_ptr) else {
        console::print("[DTB] Not found, using QEMU virt defaults\n");
        return defaults;
    };

    // SAFETY: magic checked above
    let fdt = match unsafe { fdt::Fdt::from_ptr(dtb as *const u8) } {
        Ok(fdt) => fdt,
        Err(_) => {
            console::print("[DTB] Invalid DTB, using defaults\n");
            return defaults;
        }
    };

    let (ram_base, ram_size) = match fdt.memory().regions().next() {
        Some(region) => (
            region.starting_address as usize,
            region.size.unwrap_or(config::DEFAULT_RAM_SIZE),
        ),
        None => (config::DEFAULT_RAM_BASE, config::DEFAULT_RAM_SIZE),
    };

    let fw_cfg_base = fdt
        .find_compatible(&[mazarin_fwcfg::io::FW_CFG_COMPATIBLE])
        .and_then(|node| node.reg())
        .and_then(|mut reg| reg.next())
        .map(|region| region.starting_address as usize)
        .unwrap_or(config::FW_CFG_BASE_FALLBACK);

    Platform {
        ram_base,
        ram_size,
        fw_cfg_base,
        dtb,
    }
}

// ============================================================================
// Kernel main
// ============================================================================

#[cfg(target_os = "none")]
fn kernel_main(dtb_ptr: usize) -> ! {
    console::print("Mazarin kernel starting...\n");
    logger::init();

    let platform = detect_platform(dtb_ptr);
    let ram_end = platform.ram_base + platform.ram_size;

    unsafe extern "C" {
        static _kernel_phys_end: u8;
    }
    // SAFETY: linker symbol, only its address is taken
    let kernel_end = unsafe { &raw const _kernel_phys_end } as usize;

    console::print("\n=== Memory Layout ===\n");
    crate::safe_print!(
        96,
        "RAM:    {} MB at 0x{:x}\n",
        platform.ram_size / 1024 / 1024,
        platform.ram_base
    );
    crate::safe_print!(64, "Kernel: ends at 0x{:x}\n", kernel_end);
    crate::safe_print!(
        96,
        "Heap:   {} MB (0x{:x} - 0x{:x})\n",
        config::HEAP_SIZE / 1024 / 1024,
        kernel_end,
        kernel_end + config::HEAP_SIZE
    );
    if platform.dtb != 0 {
        crate::safe_print!(64, "DTB:    0x{:x}\n", platform.dtb);
    }
    console::print("=====================\n\n");

    // The heap must stay clear of the DTB and of the end of RAM
    let heap_end = kernel_end + config::HEAP_SIZE;
    let dtb_in_heap = platform.dtb >= kernel_end && platform.dtb < heap_end;
    if heap_end > ram_end || dtb_in_heap {
        console::print("FATAL: no room for the heap\n");
        halt();
    }
    if let Err(e) = allocator::init(kernel_end, config::HEAP_SIZE) {
        console::print("Allocator init failed: ");
        console::print(e);
        console::print("\n");
        halt();
    }
    log::info!("[heap] talc initialized");

    // =========================================================================
    // fw_cfg
    // =========================================================================
    match fw_cfg::init(platform.fw_cfg_base) {
        Ok(()) => {
            log::info!(
                "[fw_cfg] MMIO at 0x{:x}, DMA {}",
                platform.fw_cfg_base,
                if fw_cfg::has_dma() { "available" } else { "unavailable" }
            );
            fw_cfg::dump_directory();
        }
        Err(e) => log::error!("[fw_cfg] probe failed: {}", e),
    }

    // =========================================================================
    // Framebuffer (ramfb via fw_cfg)
    // =========================================================================
    if config::ENABLE_RAMFB {
        match ramfb::init(
            config::FB_WIDTH,
            config::FB_HEIGHT,
            platform.ram_base..ram_end,
        ) {
            Ok(()) => {
                console::print("[ramfb] Framebuffer ready\n");
                if config::FB_TEXT_CONSOLE && fb_console::init() {
                    let (cols, rows) = fb_console::dimensions();
                    log::info!("[fbcon] {}x{} text console", cols, rows);
                    log::info!("[fbcon] fw_cfg at {:#x}", platform.fw_cfg_base);
                } else if config::DRAW_TEST_PATTERN {
                    ramfb::test_pattern();
                }
            }
            Err(e) => {
                console::print("[ramfb] Not available: ");
                console::print(e);
                console::print("\n");
            }
        }
    }

    // =========================================================================
    // Self-tests
    // =========================================================================
    let mut tests_ok = true;
    if !config::DISABLE_ALL_TESTS {
        tests_ok = tests::run_all();
        // The tests scribble on the screen
        if fb_console::is_available() {
            fb_console::redraw();
            log::info!("[fbcon] self-tests {}", if tests_ok { "passed" } else { "FAILED" });
        } else if config::DRAW_TEST_PATTERN && ramfb::is_initialized() {
            ramfb::test_pattern();
        }
    } else {
        console::print("[TESTS] All tests DISABLED via config::DISABLE_ALL_TESTS\n");
    }

    console::print("Boot complete\n");
    if config::EXIT_AFTER_BOOT {
        halt_with_code(if tests_ok { 0 } else { 1 });
    }
    if !tests_ok {
        console::print("\n!!! SELF-TESTS FAILED - HALTING !!!\n");
        halt();
    }
    idle()
}

//! Boot code for AArch64
//!
//! Early boot sequence, entered at EL1 with the MMU off:
//! 1. Zeroes .bss and switches to the boot stack
//! 2. Builds an identity map out of 1GB blocks (device below RAM, normal
//!    write-back memory for RAM)
//! 3. Enables the MMU and caches
//! 4. Continues to `rust_start` with the DTB pointer QEMU left in x0
//!
//! The identity map is all the translation the kernel ever does, so
//! physical and virtual addresses are equal everywhere, including the
//! addresses handed to fw_cfg DMA.

use core::arch::global_asm;

global_asm!(
    r#"
.section .text._boot
.global _boot

// Page table entry bits
.equ PT_VALID,          (1 << 0)
.equ PT_BLOCK,          (0 << 1)
.equ PT_AF,             (1 << 10)
.equ PT_SH_INNER,       (3 << 8)
.equ PT_ATTR_DEVICE,    (0 << 2)        // MAIR index 0 = Device-nGnRnE
.equ PT_ATTR_NORMAL,    (1 << 2)        // MAIR index 1 = Normal WB

.equ DEVICE_BLOCK, (PT_VALID | PT_BLOCK | PT_AF | PT_ATTR_DEVICE)
.equ NORMAL_BLOCK, (PT_VALID | PT_BLOCK | PT_AF | PT_SH_INNER | PT_ATTR_NORMAL)

_boot:
    // Save DTB pointer
    mov     x19, x0

    // Enable FPU/SIMD
    mov     x0, #(3 << 20)
    msr     cpacr_el1, x0
    isb

    // Zero .bss (page tables live there too, so this comes first)
    adrp    x0, __bss_start
    add     x0, x0, :lo12:__bss_start
    adrp    x1, __bss_end
    add     x1, x1, :lo12:__bss_end
1:  cmp     x0, x1
    b.hs    2f
    str     xzr, [x0], #8
    b       1b
2:
    adrp    x0, __stack_top
    add     x0, x0, :lo12:__stack_top
    mov     sp, x0

    bl      setup_boot_page_tables
    bl      configure_mmu_regs

    // Enable MMU
    mrs     x0, sctlr_el1
    orr     x0, x0, #1              // M bit = MMU enable
    orr     x0, x0, #(1 << 2)       // C bit = data cache
    orr     x0, x0, #(1 << 12)      // I bit = instruction cache
    msr     sctlr_el1, x0
    isb

    mov     x0, x19                 // DTB pointer
    bl      rust_start

hang:
    wfe
    b       hang

.section .text.boot
setup_boot_page_tables:
    adrp    x10, boot_l1
    add     x10, x10, :lo12:boot_l1

    // L1[0] = 0x0000_0000 - 0x3FFF_FFFF (UART, fw_cfg, GIC...)
    ldr     x0, =DEVICE_BLOCK
    str     x0, [x10, #0]

    // L1[1] = 0x4000_0000 - 0x7FFF_FFFF (RAM)
    ldr     x0, =0x40000000
    ldr     x1, =NORMAL_BLOCK
    orr     x0, x0, x1
    str     x0, [x10, #8]

    // L1[2] = 0x8000_0000 - 0xBFFF_FFFF (more RAM if present)
    ldr     x0, =0x80000000
    orr     x0, x0, x1
    str     x0, [x10, #16]

    ret

configure_mmu_regs:
    // MAIR_EL1: Attr0 = Device-nGnRnE (0x00), Attr1 = Normal WB (0xFF)
    mov     x0, #0xFF00
    msr     mair_el1, x0

    // TCR_EL1: T0SZ = 25 (39-bit VA, walk starts at L1), 4KB granule,
    // inner shareable write-back walks, EPD1 (no TTBR1 walks),
    // IPS = 1 (36-bit PA)
    mov     x0, #0x3519
    movk    x0, #0x80, lsl #16
    movk    x0, #0x1, lsl #32
    msr     tcr_el1, x0

    adrp    x0, boot_l1
    add     x0, x0, :lo12:boot_l1
    msr     ttbr0_el1, x0

    tlbi    vmalle1
    dsb     sy
    isb

    ret

// One L1 table, 4KB aligned
.section .bss.boot
.balign 4096
.global boot_l1
boot_l1:
    .space  4096
"#
);

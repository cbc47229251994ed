// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Glue for running on bare metal aarch64: the transfer trampoline, the linker symbols around it,
//! cache maintenance and halting.

use crate::{
    Relocator,
    arena::Span,
    config::Config,
    error::TransitionError,
    layout::align_down,
    pic::{LinkedRegion, PicSegment, call_trampoline},
    transition::{Handoff, Transfer},
};
use core::{
    arch::{asm, naked_asm},
    convert::Infallible,
};
use log::error;

unsafe extern "C" {
    static _rcode_start: u8;
    static _rcode_end: u8;
}

/// Branches to `target`, passing `checksum` and `len` as its first two arguments.
///
/// This is the only code in `.rcode`, so it is what gets copied below the stack. It must not
/// touch the stack or refer to anything outside itself.
///
/// # Safety
///
/// `target` must be an entry point which takes over the machine.
#[unsafe(naked)]
#[unsafe(link_section = ".rcode.enter")]
#[unsafe(export_name = "rcode_enter")]
pub unsafe extern "C" fn rcode_enter(target: usize, checksum: u32, len: usize) -> ! {
    naked_asm!(
        "mov x16, x0",
        "mov w0, w1",
        "mov x1, x2",
        "br x16",
    )
}

/// Returns the link-time range of the `.rcode` sections.
pub fn linked_region() -> LinkedRegion {
    LinkedRegion {
        start: (&raw const _rcode_start) as usize,
        end: (&raw const _rcode_end) as usize,
    }
}

/// Returns the relocatable transfer code as linked into this binary.
pub fn linked_segment() -> PicSegment<'static> {
    // SAFETY: The linker script places `_rcode_start` and `_rcode_end` around the `.rcode`
    // sections, which are part of the loaded image and never written.
    unsafe { PicSegment::from_region(linked_region()) }
}

/// Returns the link-time address of [`rcode_enter`].
pub fn trampoline() -> usize {
    rcode_enter as *const () as usize
}

/// Returns the current stack pointer.
pub fn stack_hint() -> usize {
    let sp: usize;
    // SAFETY: Reading `sp` has no side effects.
    unsafe {
        asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    sp
}

/// Creates a [`Relocator`] for the transfer code linked into this binary.
///
/// `floor` is the first address the image may be written to.
pub fn relocator(config: Config, floor: usize) -> Result<Relocator<'static>, TransitionError> {
    Relocator::new(config, linked_segment(), trampoline(), floor)
}

/// Makes instructions written to `span` visible to instruction fetch.
///
/// Data lines are cleaned to the point of coherency rather than unification, so the code is also
/// intact for a next stage which starts with its caches off.
pub fn sync_icache(span: Span) {
    if span.is_empty() {
        return;
    }
    let ctr: u64;
    // SAFETY: Reading `CTR_EL0` has no side effects.
    unsafe {
        asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
    }
    // Both fields hold log2 of the line size in words.
    let dline = 4 << ((ctr >> 16) & 0xf);
    let iline = 4 << (ctr & 0xf);

    let mut addr = align_down(span.addr, dline);
    while addr < span.end() {
        // SAFETY: Cleaning a line to the point of coherency doesn't change memory contents.
        unsafe {
            asm!("dc cvac, {}", in(reg) addr, options(nostack, preserves_flags));
        }
        addr += dline;
    }
    // SAFETY: Barriers only order memory accesses.
    unsafe {
        asm!("dsb sy", options(nostack, preserves_flags));
    }
    let mut addr = align_down(span.addr, iline);
    while addr < span.end() {
        // SAFETY: Invalidating instruction cache lines only forces them to be refetched.
        unsafe {
            asm!("ic ivau, {}", in(reg) addr, options(nostack, preserves_flags));
        }
        addr += iline;
    }
    // SAFETY: Barriers only order memory accesses and flush the pipeline.
    unsafe {
        asm!("dsb ish", "isb", options(nostack, preserves_flags));
    }
}

/// Enters the next stage through the transfer trampoline.
#[derive(Debug)]
pub struct Chainload;

impl Handoff for Chainload {
    type Outcome = Infallible;

    fn enter(self, transfer: Transfer) -> Infallible {
        // SAFETY: `via` is `rcode_enter` or its copy, made visible to instruction fetch by
        // `sync_icache`. The loader has just materialized the image `target` belongs to.
        unsafe { call_trampoline(transfer.via, transfer.target, transfer.checksum, transfer.len) }
    }
}

/// Reports `error` and stops the machine.
pub fn fatal(error: TransitionError) -> ! {
    error!("spl_reloc: {error}");
    #[cfg(feature = "psci")]
    {
        let _ = smccc::psci::system_off::<smccc::Hvc>();
    }
    loop {
        // SAFETY: Waiting for an event has no other effect.
        unsafe {
            asm!("wfe", options(nomem, nostack, preserves_flags));
        }
    }
}

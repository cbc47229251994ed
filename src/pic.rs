// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Position independent transfer code: copying it to an address chosen at runtime, finding
//! symbols inside the copy and calling through them.
//!
//! This is the only module which turns integers into code pointers.

use crate::arena::{ArenaError, Memory, Span};
use log::debug;
use thiserror::Error;

/// The link-time address range of the relocatable transfer code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkedRegion {
    /// First address of the range.
    pub start: usize,
    /// Address one past the end of the range.
    pub end: usize,
}

impl LinkedRegion {
    /// Returns the size of the range in bytes.
    pub const fn size(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns whether `addr` lies within the range.
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// The bytes given for a segment don't match the size of its linked range.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("linked range {region:x?} is {expected:#x} bytes but {actual:#x} were given")]
pub struct SegmentSizeMismatch {
    /// The linked range.
    pub region: LinkedRegion,
    /// Size of the linked range.
    pub expected: usize,
    /// Number of bytes given.
    pub actual: usize,
}

/// The relocatable transfer code as it sits at its link-time address.
#[derive(Clone, Copy, Debug)]
pub struct PicSegment<'a> {
    region: LinkedRegion,
    code: &'a [u8],
}

impl<'a> PicSegment<'a> {
    /// Creates a segment for `region` whose contents are `code`.
    pub fn new(region: LinkedRegion, code: &'a [u8]) -> Result<Self, SegmentSizeMismatch> {
        if code.len() != region.size() {
            return Err(SegmentSizeMismatch {
                region,
                expected: region.size(),
                actual: code.len(),
            });
        }
        Ok(Self { region, code })
    }

    /// Creates a segment for the code currently mapped at `region`.
    ///
    /// # Safety
    ///
    /// `region` must describe readable memory which stays valid and unmodified for `'a`.
    pub unsafe fn from_region(region: LinkedRegion) -> Self {
        // SAFETY: The caller guarantees the range is readable for `'a`.
        let code = unsafe { core::slice::from_raw_parts(region.start as *const u8, region.size()) };
        Self { region, code }
    }

    /// Returns the link-time range.
    pub const fn region(&self) -> LinkedRegion {
        self.region
    }

    /// Returns the size of the code in bytes.
    pub const fn size(&self) -> usize {
        self.region.size()
    }

    /// Copies the code to `dest`.
    ///
    /// From here on, anything inside the segment must be reached through the returned
    /// [`RelocatedCode`], never through its link-time address.
    pub fn copy_to<M: Memory>(
        &self,
        mem: &mut M,
        dest: usize,
    ) -> Result<RelocatedCode, ArenaError> {
        mem.write_bytes(dest, self.code)?;
        let copy = RelocatedCode {
            region: self.region,
            base: dest,
        };
        mem.sync_instructions(copy.span())?;
        debug!(
            "rcode {:#x}..{:#x} copied to {:#x}, offset {:#x}",
            self.region.start,
            self.region.end,
            dest,
            dest.wrapping_sub(self.region.start),
        );
        Ok(copy)
    }

    /// Returns where `original_symbol` would be if the segment were copied to `dest`, or `None`
    /// if the symbol isn't inside the segment.
    pub const fn entry_at(&self, dest: usize, original_symbol: usize) -> Option<usize> {
        if self.region.contains(original_symbol) {
            Some(dest + (original_symbol - self.region.start))
        } else {
            None
        }
    }
}

/// A copy of a [`PicSegment`] at its runtime address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RelocatedCode {
    region: LinkedRegion,
    base: usize,
}

impl RelocatedCode {
    /// Returns the memory the copy occupies.
    pub const fn span(&self) -> Span {
        Span::new(self.base, self.region.size())
    }

    /// Returns the address of `original_symbol` inside the copy.
    pub const fn entry_of(&self, original_symbol: usize) -> Option<usize> {
        if self.region.contains(original_symbol) {
            Some(self.base + (original_symbol - self.region.start))
        } else {
            None
        }
    }
}

/// Signature of the transfer trampoline: branches to `target` passing `checksum` and `len`.
pub type Trampoline = unsafe extern "C" fn(target: usize, checksum: u32, len: usize) -> !;

static_assertions::assert_eq_size!(Trampoline, usize);

/// Calls the trampoline at `via`, never to return.
///
/// # Safety
///
/// `via` must be the address of a function with the [`Trampoline`] signature whose instructions
/// are visible to instruction fetch, and `target` must be an entry point which accepts
/// `(checksum, len)` and takes over the machine.
pub unsafe fn call_trampoline(via: usize, target: usize, checksum: u32, len: usize) -> ! {
    // SAFETY: The caller guarantees `via` points to a function with this signature.
    let trampoline = unsafe { core::mem::transmute::<usize, Trampoline>(via) };
    // SAFETY: The caller guarantees `target` is a valid entry point.
    unsafe { trampoline(target, checksum, len) }
}

// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! The single memory window shared by the image, the configuration blob, the relocated code and
//! the stack, and the offset-based views into it.

use core::{ops::Range, ptr};
use thiserror::Error;

/// A range of addresses `[addr, addr + len)` inside the arena.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Span {
    /// First address of the span.
    pub addr: usize,
    /// Length of the span in bytes.
    pub len: usize,
}

impl Span {
    /// Creates a span of `len` bytes starting at `addr`.
    pub const fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    /// Returns the address one past the end of the span, or `None` if it would wrap.
    pub const fn checked_end(&self) -> Option<usize> {
        self.addr.checked_add(self.len)
    }

    /// Returns the address one past the end of the span.
    ///
    /// Spans built by this crate never wrap, so this saturates rather than panicking.
    pub const fn end(&self) -> usize {
        self.addr.saturating_add(self.len)
    }

    /// Returns whether the span covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns whether the two spans share at least one byte.
    pub const fn overlaps(&self, other: &Span) -> bool {
        !self.is_empty() && !other.is_empty() && self.addr < other.end() && other.addr < self.end()
    }

    /// Returns whether `other` lies entirely within this span.
    pub const fn contains(&self, other: &Span) -> bool {
        match other.checked_end() {
            Some(end) => other.addr >= self.addr && end <= self.end(),
            None => false,
        }
    }
}

/// An access to the arena which could not be carried out.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ArenaError {
    /// The span does not lie inside the arena.
    #[error("{span:x?} lies outside the memory window")]
    OutOfBounds {
        /// The offending span.
        span: Span,
    },
    /// Two spans which must be disjoint share memory.
    #[error("{a:x?} overlaps {b:x?}")]
    Overlap {
        /// The first span.
        a: Span,
        /// The second span.
        b: Span,
    },
}

/// Byte-addressed access to the memory window.
///
/// Every write the loader performs goes through this trait, which lets tests observe exactly what
/// was touched.
pub trait Memory {
    /// Returns the span of addresses this memory covers.
    fn window(&self) -> Span;

    /// Reads the 32-bit word at `addr`.
    fn read_word(&self, addr: usize) -> Result<u32, ArenaError>;

    /// Writes the 32-bit word at `addr`.
    fn write_word(&mut self, addr: usize, value: u32) -> Result<(), ArenaError>;

    /// Copies `data` to `addr`.
    fn write_bytes(&mut self, addr: usize, data: &[u8]) -> Result<(), ArenaError>;

    /// Copies the bytes of `src` to `dest`. The two may overlap.
    fn copy_within(&mut self, src: Span, dest: usize) -> Result<(), ArenaError>;

    /// Returns the bytes of `span`.
    fn view(&self, span: Span) -> Result<&[u8], ArenaError>;

    /// Returns `src` for reading and `dest` for writing at the same time.
    ///
    /// Fails with [`ArenaError::Overlap`] if the two spans share memory.
    fn split_views(&mut self, src: Span, dest: Span) -> Result<(&[u8], &mut [u8]), ArenaError>;

    /// Makes code written to `span` visible to instruction fetch, and to anything which reads it
    /// with caches off.
    fn sync_instructions(&mut self, span: Span) -> Result<(), ArenaError>;
}

/// A window of memory starting at a known address.
#[derive(Debug)]
pub struct Arena<'a> {
    base: usize,
    bytes: &'a mut [u8],
}

impl<'a> Arena<'a> {
    /// Creates an arena whose first byte sits at address `base`.
    pub fn new(base: usize, bytes: &'a mut [u8]) -> Self {
        Self { base, bytes }
    }

    /// Creates an arena covering `len` bytes of physical memory at `base`.
    ///
    /// # Safety
    ///
    /// `[base, base + len)` must be valid, writable memory for `'a` and must not be accessed
    /// through anything other than the returned arena while it lives, apart from the running stack
    /// which the loader guards with its canary.
    pub unsafe fn from_raw_parts(base: usize, len: usize) -> Self {
        // SAFETY: The caller guarantees the range is valid and exclusively ours.
        let bytes = unsafe { core::slice::from_raw_parts_mut(base as *mut u8, len) };
        Self { base, bytes }
    }

    fn range(&self, span: Span) -> Result<Range<usize>, ArenaError> {
        if !self.window().contains(&span) {
            return Err(ArenaError::OutOfBounds { span });
        }
        let start = span.addr - self.base;
        Ok(start..start + span.len)
    }
}

impl Memory for Arena<'_> {
    fn window(&self) -> Span {
        Span::new(self.base, self.bytes.len())
    }

    fn read_word(&self, addr: usize) -> Result<u32, ArenaError> {
        let range = self.range(Span::new(addr, 4))?;
        let mut word = [0; 4];
        for (byte, src) in word.iter_mut().zip(&self.bytes[range]) {
            // The canary lives on the live stack, so the read must not be folded into an earlier
            // write the compiler has already seen.
            // SAFETY: `src` is a valid reference into the arena.
            *byte = unsafe { ptr::read_volatile(src) };
        }
        Ok(u32::from_ne_bytes(word))
    }

    fn write_word(&mut self, addr: usize, value: u32) -> Result<(), ArenaError> {
        let range = self.range(Span::new(addr, 4))?;
        for (dest, byte) in self.bytes[range].iter_mut().zip(value.to_ne_bytes()) {
            // SAFETY: `dest` is a valid mutable reference into the arena.
            unsafe { ptr::write_volatile(dest, byte) };
        }
        Ok(())
    }

    fn write_bytes(&mut self, addr: usize, data: &[u8]) -> Result<(), ArenaError> {
        let range = self.range(Span::new(addr, data.len()))?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn copy_within(&mut self, src: Span, dest: usize) -> Result<(), ArenaError> {
        let src_range = self.range(src)?;
        let dest_range = self.range(Span::new(dest, src.len))?;
        self.bytes.copy_within(src_range, dest_range.start);
        Ok(())
    }

    fn view(&self, span: Span) -> Result<&[u8], ArenaError> {
        let range = self.range(span)?;
        Ok(&self.bytes[range])
    }

    fn split_views(&mut self, src: Span, dest: Span) -> Result<(&[u8], &mut [u8]), ArenaError> {
        let src_range = self.range(src)?;
        let dest_range = self.range(dest)?;
        if src_range.end <= dest_range.start {
            let (low, high) = self.bytes.split_at_mut(dest_range.start);
            Ok((&low[src_range], &mut high[..dest.len]))
        } else if dest_range.end <= src_range.start {
            let (low, high) = self.bytes.split_at_mut(src_range.start);
            Ok((&high[..src.len], &mut low[dest_range]))
        } else {
            Err(ArenaError::Overlap { a: src, b: dest })
        }
    }

    fn sync_instructions(&mut self, span: Span) -> Result<(), ArenaError> {
        self.range(span)?;
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        crate::hw::sync_icache(span);
        Ok(())
    }
}

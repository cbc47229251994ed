// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Moving the configuration blob to just after the materialized image.

use crate::{
    arena::{Memory, Span},
    error::TransitionError,
    layout::{MemoryLayout, align_up},
};
use log::debug;

/// Copies the configuration blob at `blob` to the first aligned address after an image of
/// `image_len` bytes, returning where it ended up.
///
/// The blob must still fit below the relocated code. An empty blob is not copied.
pub fn relocate_config<M: Memory>(
    mem: &mut M,
    layout: &MemoryLayout,
    blob: Span,
    image_len: usize,
) -> Result<Span, TransitionError> {
    let overflow = TransitionError::ConfigOverflow {
        base: layout.image_base.saturating_add(image_len),
        size: blob.len,
        limit: layout.relocated_code_base,
    };
    let base = layout
        .image_base
        .checked_add(image_len)
        .and_then(|end| align_up(end, layout.alignment))
        .ok_or(overflow)?;
    let dest = Span::new(base, blob.len);
    if dest.checked_end().is_none_or(|end| end > layout.relocated_code_base) {
        return Err(overflow);
    }
    if blob.is_empty() {
        return Ok(dest);
    }
    mem.copy_within(blob, base)?;
    debug!("config {:#x} bytes copied from {:#x} to {base:#x}", blob.len, blob.addr);
    Ok(dest)
}

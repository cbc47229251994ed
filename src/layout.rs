// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Planning where the image, the configuration blob and the relocated code go.

use crate::arena::Span;
use log::{debug, error};
use thiserror::Error;

/// The image and configuration blob do not fit below the relocated code.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("image needs {needed:#x} bytes but the buffer is only {available:#x}")]
pub struct InsufficientSpace {
    /// Bytes needed for the image and configuration blob.
    pub needed: usize,
    /// Bytes between the image base and the relocated code, or 0 if there is no such gap.
    pub available: usize,
}

/// Where everything goes in the memory window.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MemoryLayout {
    /// Destination of the materialized image.
    pub image_base: usize,
    /// Planned destination of the configuration blob.
    pub config_base: usize,
    /// Where the transfer code is copied to.
    pub relocated_code_base: usize,
    /// Address of the stack canary word.
    pub canary_addr: usize,
    /// Bytes between `image_base` and `relocated_code_base`.
    pub available: usize,
    /// Size of the planned image.
    pub image_size: usize,
    /// Size of the configuration blob.
    pub config_size: usize,
    /// Size of the relocated transfer code.
    pub code_size: usize,
    /// Alignment all addresses above honour.
    pub alignment: usize,
}

impl MemoryLayout {
    /// The region the image is planned to occupy.
    pub const fn image(&self) -> Span {
        Span::new(self.image_base, self.image_size)
    }

    /// The region the configuration blob is planned to occupy.
    pub const fn config(&self) -> Span {
        Span::new(self.config_base, self.config_size)
    }

    /// The region holding the relocated transfer code.
    pub const fn relocated_code(&self) -> Span {
        Span::new(self.relocated_code_base, self.code_size)
    }

    /// The canary word.
    pub const fn canary(&self) -> Span {
        Span::new(self.canary_addr, 4)
    }

    /// Everything the image may grow into while being materialized, leaving room for the
    /// configuration blob behind it.
    pub const fn image_capacity(&self) -> usize {
        self.available.saturating_sub(self.config_size)
    }
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Rounds `value` down to a multiple of `align`, which must be a power of two.
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Fixed inputs to layout planning which don't depend on the image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Planner {
    /// The first address after the configuration blob the loader itself is running with.
    pub floor: usize,
    /// Size of the relocatable transfer code.
    pub code_size: usize,
    /// Minimum alignment of every planned address.
    pub alignment: usize,
}

impl Planner {
    /// Plans the layout for an image of `image_size` bytes and a configuration blob of
    /// `config_size` bytes, with the stack currently near `stack_hint` and `margin` bytes of it
    /// kept free.
    ///
    /// This only computes addresses; nothing is written.
    pub fn plan(
        &self,
        image_size: usize,
        config_size: usize,
        stack_hint: usize,
        margin: usize,
    ) -> Result<MemoryLayout, InsufficientSpace> {
        let align = self.alignment;
        let needed = image_size.saturating_add(config_size);
        let no_space = |available| InsufficientSpace { needed, available };

        let canary_addr = align_down(stack_hint.checked_sub(margin).ok_or(no_space(0))?, align);
        let relocated_code_base = align_down(
            canary_addr
                .checked_sub(self.code_size)
                .ok_or(no_space(0))?,
            align,
        );
        let image_base = align_up(self.floor, align).ok_or(no_space(0))?;
        let available = relocated_code_base
            .checked_sub(image_base)
            .filter(|available| *available > 0)
            .ok_or(no_space(0))?;

        let fits = image_base
            .checked_add(image_size)
            .and_then(|end| align_up(end, align))
            .and_then(|config_base| Some((config_base, config_base.checked_add(config_size)?)));
        debug!(
            "spl_reloc: margin {}{:#x} limit {:#x} base {:#x} avail {:#x} image {:#x} config {:#x} \
             need {:#x}",
            if available < needed { "-" } else { "" },
            available.abs_diff(needed),
            canary_addr,
            image_base,
            available,
            image_size,
            config_size,
            needed,
        );
        match fits {
            Some((config_base, config_end)) if config_end <= relocated_code_base => {
                Ok(MemoryLayout {
                    image_base,
                    config_base,
                    relocated_code_base,
                    canary_addr,
                    available,
                    image_size,
                    config_size,
                    code_size: self.code_size,
                    alignment: align,
                })
            }
            _ => {
                error!("Image size {needed:#x} but buffer is only {available:#x}");
                Err(no_space(available))
            }
        }
    }
}

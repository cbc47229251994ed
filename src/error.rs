// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

use crate::{
    arena::ArenaError,
    canary::Tripped,
    config::ConfigError,
    layout::InsufficientSpace,
    materialize::{MaterializeError, MaterializeFailure},
};
use thiserror::Error;

/// The loader could not hand over to the next stage.
///
/// Apart from [`TransitionError::Layout`] and [`TransitionError::Config`], which are reported
/// before anything is written, the memory window is in an unknown state once one of these is
/// returned.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum TransitionError {
    /// The image and configuration blob don't fit.
    #[error(transparent)]
    Layout(#[from] InsufficientSpace),
    /// The configuration can't work.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The stack canary was overwritten.
    #[error("stack canary at {addr:#x} overwritten (found {found:x?})")]
    StackCorruption {
        /// Address of the canary word.
        addr: usize,
        /// The value found there, if it could be read.
        found: Option<u32>,
    },
    /// The image could not be materialized.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    /// The configuration blob would reach into the relocated code.
    #[error("config of {size:#x} bytes at {base:#x} runs past {limit:#x}")]
    ConfigOverflow {
        /// Where the blob would start, before alignment.
        base: usize,
        /// Size of the blob.
        size: usize,
        /// The first address the blob must not reach.
        limit: usize,
    },
    /// A region lies outside the memory window or overlaps one it must not.
    #[error(transparent)]
    Arena(#[from] ArenaError),
    /// The transfer routine is not part of the relocatable code.
    #[error("transfer routine at {symbol:#x} is outside the relocatable code")]
    SymbolOutsideRegion {
        /// Link-time address of the routine.
        symbol: usize,
    },
}

impl From<Tripped> for TransitionError {
    fn from(tripped: Tripped) -> Self {
        Self::StackCorruption {
            addr: tripped.addr,
            found: tripped.found,
        }
    }
}

impl From<MaterializeFailure> for TransitionError {
    fn from(failure: MaterializeFailure) -> Self {
        match failure {
            MaterializeFailure::Arena(e) => Self::Arena(e),
            MaterializeFailure::Decode(e) => Self::Materialize(e),
        }
    }
}

// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! A self-relocating loader for the last step of a staged boot.
//!
//! The loader runs from memory the next stage wants to occupy. It copies a small piece of
//! position independent transfer code to just below its own stack, guards the stack with a
//! canary word, decompresses the next stage into place, moves the configuration blob (usually a
//! flattened device tree) after it and finally jumps through the relocated code into the new
//! image, passing a checksum and the image length.
//!
//! ```ignore
//! use spl_reloc::{arena::Arena, config::Config, hw};
//!
//! let relocator = hw::relocator(Config::DEFAULT, floor).unwrap_or_else(|e| hw::fatal(e));
//! // SAFETY: The window is ours apart from the running stack, which the canary guards.
//! let mut mem = unsafe { Arena::from_raw_parts(window_base, window_len) };
//! let Err(e) = relocator.load_and_jump(&mut mem, image, hw::stack_hint(), hw::Chainload);
//! hw::fatal(e);
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(clippy::undocumented_unsafe_blocks)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arena;
pub mod canary;
pub mod codec;
pub mod config;
pub mod error;
pub mod fdt;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod hw;
pub mod layout;
mod loader;
pub mod materialize;
pub mod pic;
pub mod transition;

pub use error::TransitionError;
pub use layout::{InsufficientSpace, MemoryLayout};
pub use loader::{BootImage, Relocator};
pub use materialize::materialize;
pub use transition::{Handoff, Transfer};

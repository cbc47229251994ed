// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! A sentinel word on the stack which detects the image being written over it.

use crate::arena::{ArenaError, Memory};
use log::error;

/// Value written to the canary word.
pub const STACK_PROT_VALUE: u32 = 0x51ce_4697;

/// Where a [`StackCanary`] is in its life.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CanaryState {
    /// Nothing has been written yet.
    Unset,
    /// The sentinel has been written but not read back.
    Armed,
    /// The sentinel has been read back intact at least once.
    Verified,
    /// The sentinel was found changed. Nothing on the stack can be trusted any more.
    Tripped,
}

/// The canary no longer holds the sentinel value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tripped {
    /// Address of the canary word.
    pub addr: usize,
    /// What was found there, if it could be read at all.
    pub found: Option<u32>,
}

/// A guard word at a fixed address inside the memory window.
#[derive(Debug)]
pub struct StackCanary {
    addr: usize,
    state: CanaryState,
}

impl StackCanary {
    /// Creates an unarmed canary at `addr`.
    pub const fn new(addr: usize) -> Self {
        Self {
            addr,
            state: CanaryState::Unset,
        }
    }

    /// Returns the address of the canary word.
    pub const fn addr(&self) -> usize {
        self.addr
    }

    /// Returns the current state.
    pub const fn state(&self) -> CanaryState {
        self.state
    }

    /// Writes the sentinel value.
    pub fn arm<M: Memory>(&mut self, mem: &mut M) -> Result<(), ArenaError> {
        mem.write_word(self.addr, STACK_PROT_VALUE)?;
        self.state = CanaryState::Armed;
        Ok(())
    }

    /// Reads the canary back and compares it against the sentinel value.
    ///
    /// Once tripped, a canary stays tripped. Checking a canary which was never armed also trips
    /// it.
    pub fn check<M: Memory>(&mut self, mem: &M) -> Result<(), Tripped> {
        let found = match self.state {
            CanaryState::Armed | CanaryState::Verified => mem.read_word(self.addr).ok(),
            CanaryState::Unset | CanaryState::Tripped => None,
        };
        if found == Some(STACK_PROT_VALUE) {
            self.state = CanaryState::Verified;
            return Ok(());
        }
        self.state = CanaryState::Tripped;
        // Best effort only, the stack this runs on is what just failed.
        error!("stack busted, cannot continue");
        Err(Tripped {
            addr: self.addr,
            found,
        })
    }
}

// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! The one-way transfer of control into the next stage.

use crate::config::ChecksumKind;
use crc::{CRC_8_SMBUS, CRC_32_ISO_HDLC, Crc};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

impl ChecksumKind {
    /// Computes this checksum over `data`.
    pub fn compute(self, data: &[u8]) -> u32 {
        match self {
            Self::Crc8 => CRC8.checksum(data).into(),
            Self::Crc32 => CRC32.checksum(data),
        }
    }
}

/// Everything needed to enter the next stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transfer {
    /// Address of the transfer routine to call.
    pub via: usize,
    /// Entry point of the next stage.
    pub target: usize,
    /// Checksum of the materialized image.
    pub checksum: u32,
    /// Length of the materialized image.
    pub len: usize,
}

/// Takes a finished [`Transfer`] and acts on it.
///
/// On hardware this is [`Chainload`](crate::hw::Chainload), which never returns. Anything which
/// wants to observe the transfer instead, such as a test, can return it as its `Outcome`.
pub trait Handoff {
    /// What entering the next stage yields.
    type Outcome;

    /// Enters the next stage.
    fn enter(self, transfer: Transfer) -> Self::Outcome;
}

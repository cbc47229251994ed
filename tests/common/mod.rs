// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use spl_reloc::{
    Handoff, Relocator, Transfer,
    arena::{Arena, ArenaError, Memory, Span},
    config::Config,
    pic::{LinkedRegion, PicSegment},
};
use std::{cell::Cell, io::Write};

/// Link-time range of the fake transfer code.
pub const REGION: LinkedRegion = LinkedRegion {
    start: 0x8_1000,
    end: 0x8_1010,
};
/// Contents of the fake transfer code.
pub const CODE: [u8; 16] = *b"\x1f\x20\x03\xd5rcode-blob-0";
/// Link-time address of the fake trampoline.
pub const TRAMPOLINE: usize = 0x8_1004;

pub fn relocator(config: Config, floor: usize) -> Relocator<'static> {
    let segment = PicSegment::new(REGION, &CODE).unwrap();
    Relocator::new(config, segment, TRAMPOLINE, floor).unwrap()
}

/// Deterministic bytes which compress reasonably but not trivially.
pub fn image_bytes(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491u32;
    (0..len)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if i % 4 == 0 { state as u8 } else { (i / 64) as u8 }
        })
        .collect()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
    encoder.write_all(data).unwrap();
    encoder.finish().into_result().unwrap()
}

pub fn lz4(data: &[u8]) -> Vec<u8> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn lzma(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    lzma_rs::lzma_compress(&mut &data[..], &mut out).unwrap();
    out
}

/// CRC-8 with polynomial 0x07 and initial value 0, computed one bit at a time.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// An arena which counts the writes made through it and can stomp on a word after a given one.
pub struct TrackingMemory<'a> {
    inner: Arena<'a>,
    writes: usize,
    synced: Vec<Span>,
    clobber: Option<(usize, usize)>,
}

impl<'a> TrackingMemory<'a> {
    pub fn new(base: usize, bytes: &'a mut [u8]) -> Self {
        Self {
            inner: Arena::new(base, bytes),
            writes: 0,
            synced: Vec::new(),
            clobber: None,
        }
    }

    /// Overwrites the word at `addr` right after the `nth` write, counting from 1.
    pub fn clobber_after(mut self, nth: usize, addr: usize) -> Self {
        self.clobber = Some((nth, addr));
        self
    }

    /// Number of writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Spans made visible to instruction fetch so far, in order.
    pub fn synced(&self) -> &[Span] {
        &self.synced
    }

    fn wrote(&mut self) {
        self.writes += 1;
        if let Some((nth, addr)) = self.clobber
            && nth == self.writes
        {
            self.inner.write_word(addr, 0xdead_beef).unwrap();
        }
    }
}

impl Memory for TrackingMemory<'_> {
    fn window(&self) -> Span {
        self.inner.window()
    }

    fn read_word(&self, addr: usize) -> Result<u32, ArenaError> {
        self.inner.read_word(addr)
    }

    fn write_word(&mut self, addr: usize, value: u32) -> Result<(), ArenaError> {
        self.inner.write_word(addr, value)?;
        self.wrote();
        Ok(())
    }

    fn write_bytes(&mut self, addr: usize, data: &[u8]) -> Result<(), ArenaError> {
        self.inner.write_bytes(addr, data)?;
        self.wrote();
        Ok(())
    }

    fn copy_within(&mut self, src: Span, dest: usize) -> Result<(), ArenaError> {
        self.inner.copy_within(src, dest)?;
        self.wrote();
        Ok(())
    }

    fn view(&self, span: Span) -> Result<&[u8], ArenaError> {
        self.inner.view(span)
    }

    fn split_views(&mut self, src: Span, dest: Span) -> Result<(&[u8], &mut [u8]), ArenaError> {
        // Counted up front, since whoever asked for the mutable view is about to write.
        self.inner.split_views(src, dest)?;
        self.wrote();
        self.inner.split_views(src, dest)
    }

    fn sync_instructions(&mut self, span: Span) -> Result<(), ArenaError> {
        self.inner.sync_instructions(span)?;
        self.synced.push(span);
        Ok(())
    }
}

/// A handoff which records the transfer instead of jumping.
pub struct Recorder<'a> {
    pub calls: &'a Cell<usize>,
}

impl Handoff for Recorder<'_> {
    type Outcome = Transfer;

    fn enter(self, transfer: Transfer) -> Transfer {
        self.calls.set(self.calls.get() + 1);
        transfer
    }
}

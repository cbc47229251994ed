// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Turning the loaded payload into the image the next stage runs from.

use crate::{
    arena::{ArenaError, Memory, Span},
    codec,
    config::Codecs,
};
use core::fmt::{self, Display, Formatter};
use log::{debug, error};
use thiserror::Error;

/// The format a payload is stored in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Codec {
    /// LZMA "alone" stream.
    Lzma,
    /// gzip wrapped DEFLATE.
    Gzip,
    /// LZ4 frame.
    Lz4,
    /// Not compressed.
    Raw,
}

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Lzma => "lzma",
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
            Self::Raw => "none",
        })
    }
}

impl Codec {
    /// Works out how `payload` is stored, considering only the decompressors in `codecs`.
    ///
    /// Formats with a magic number are recognised first, so an LZ4 frame is never mistaken for an
    /// LZMA stream. A payload carrying the magic number of a decompressor which isn't enabled is
    /// rejected rather than copied raw.
    pub fn detect(payload: &[u8], codecs: Codecs) -> Result<Self, MaterializeError> {
        if codec::gzip::has_magic(payload) {
            return if codecs.contains(Codecs::GZIP) {
                Ok(Self::Gzip)
            } else {
                Err(MaterializeError::UnsupportedCodec { codec: Self::Gzip })
            };
        }
        if codec::lz4::has_magic(payload) {
            return if codecs.contains(Codecs::LZ4) {
                Ok(Self::Lz4)
            } else {
                Err(MaterializeError::UnsupportedCodec { codec: Self::Lz4 })
            };
        }
        if codecs.contains(Codecs::LZMA) && codec::lzma::has_valid_header(payload) {
            return Ok(Self::Lzma);
        }
        Ok(Self::Raw)
    }
}

/// The payload could not be materialized.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum MaterializeError {
    /// The image is larger than the space available for it.
    #[error("image too large for the {capacity:#x} byte buffer")]
    OutOfSpace {
        /// Bytes available for the image.
        capacity: usize,
    },
    /// The decompressor rejected the stream.
    #[error("{codec}: corrupt image")]
    CorruptStream {
        /// The decompressor which failed.
        codec: Codec,
    },
    /// The payload needs a decompressor this build doesn't have or a feature of it which isn't
    /// supported.
    #[error("{codec}: unsupported compression")]
    UnsupportedCodec {
        /// The format of the payload.
        codec: Codec,
    },
}

/// Decompresses or copies `payload` into `dest`, returning the length of the image.
///
/// `declared_len` is the uncompressed length from the image header. It is what a raw copy
/// produces; decompressors report what they actually produced.
pub fn materialize(
    codecs: Codecs,
    payload: &[u8],
    dest: &mut [u8],
    declared_len: usize,
) -> Result<usize, MaterializeError> {
    let codec = Codec::detect(payload, codecs)?;
    debug!(
        "materializing {:#x} byte {} payload into {:#x} byte buffer",
        payload.len(),
        codec,
        dest.len()
    );
    let capacity = dest.len();
    let result = match codec {
        Codec::Raw => {
            check_raw(payload.len(), declared_len, capacity)?;
            dest[..declared_len].copy_from_slice(&payload[..declared_len]);
            Ok(declared_len)
        }
        #[cfg(feature = "gzip")]
        Codec::Gzip => codec::gzip::decompress(payload, dest),
        #[cfg(feature = "lz4")]
        Codec::Lz4 => codec::lz4::decompress(payload, dest),
        #[cfg(feature = "lzma")]
        Codec::Lzma => codec::lzma::decompress(payload, dest),
        #[allow(unreachable_patterns)]
        _ => Err(MaterializeError::UnsupportedCodec { codec }),
    };
    report(codec, capacity, result)
}

/// Materializes the payload at `src` into memory starting at `dest`, with at most `capacity`
/// bytes of room.
///
/// Decompression needs the payload and the destination to be disjoint. A raw copy doesn't.
pub fn materialize_in<M: Memory>(
    mem: &mut M,
    codecs: Codecs,
    src: Span,
    dest: usize,
    capacity: usize,
    declared_len: usize,
) -> Result<usize, MaterializeFailure> {
    let codec = Codec::detect(mem.view(src)?, codecs)?;
    if codec == Codec::Raw {
        check_raw(src.len, declared_len, capacity)?;
        mem.copy_within(Span::new(src.addr, declared_len), dest)?;
        debug!("copied {declared_len:#x} byte image from {:#x} to {dest:#x}", src.addr);
        return Ok(declared_len);
    }
    let (payload, buffer) = mem.split_views(src, Span::new(dest, capacity))?;
    Ok(materialize(codecs, payload, buffer, declared_len)?)
}

/// Either the arena access or the decompression failed.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum MaterializeFailure {
    /// The payload or destination could not be accessed.
    #[error(transparent)]
    Arena(#[from] ArenaError),
    /// The payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] MaterializeError),
}

fn check_raw(
    payload_len: usize,
    declared_len: usize,
    capacity: usize,
) -> Result<(), MaterializeError> {
    if declared_len > capacity {
        return Err(MaterializeError::OutOfSpace { capacity });
    }
    if declared_len > payload_len {
        return Err(MaterializeError::CorruptStream { codec: Codec::Raw });
    }
    Ok(())
}

fn report(
    codec: Codec,
    capacity: usize,
    result: Result<usize, MaterializeError>,
) -> Result<usize, MaterializeError> {
    match result {
        Ok(len) => {
            debug!("{codec}: image is {len:#x} bytes");
            Ok(len)
        }
        Err(MaterializeError::OutOfSpace { .. }) => {
            error!("Image too large: {codec} output exceeds {capacity:#x} byte buffer");
            Err(MaterializeError::OutOfSpace { capacity })
        }
        Err(e) => {
            error!("{e}");
            Err(e)
        }
    }
}

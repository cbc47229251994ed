// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! LZMA "alone" streams, decoded with `lzma-rs`.
//!
//! The format has no magic number, so the 13 byte header is checked the same way `xz` does when it
//! auto-detects `.lzma` files.

#[cfg(feature = "lzma")]
use crate::materialize::{Codec, MaterializeError};

/// Size of the properties byte, dictionary size and unpacked size.
const HEADER_LEN: usize = 13;
/// Unpacked size meaning "unknown, look for the end marker".
const UNKNOWN_SIZE: u64 = u64::MAX;
/// Largest unpacked size believed to be real rather than random bytes.
const MAX_PLAUSIBLE_SIZE: u64 = 1 << 38;
/// `(pb * 5 + lp) * 9 + lc` must be below this.
const MAX_PROPERTIES: u8 = 9 * 5 * 5;

/// Returns whether `payload` starts with a believable LZMA header.
pub fn has_valid_header(payload: &[u8]) -> bool {
    let Some(header) = payload.get(..=HEADER_LEN) else {
        return false;
    };
    let properties = header[0];
    let lc = properties % 9;
    let lp = (properties / 9) % 5;
    if properties >= MAX_PROPERTIES || lc + lp > 4 {
        return false;
    }
    let dict_size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    if !is_plausible_dict_size(dict_size) {
        return false;
    }
    let mut size = [0; 8];
    size.copy_from_slice(&header[5..HEADER_LEN]);
    let unpacked_size = u64::from_le_bytes(size);
    if unpacked_size != UNKNOWN_SIZE && unpacked_size >= MAX_PLAUSIBLE_SIZE {
        return false;
    }
    // The range coder always starts with a zero byte.
    header[HEADER_LEN] == 0
}

/// Dictionary sizes written by real encoders are `2^n` or `2^n + 2^(n-1)`, or all ones.
fn is_plausible_dict_size(dict_size: u32) -> bool {
    if dict_size == 0 {
        return false;
    }
    if dict_size == u32::MAX || dict_size.is_power_of_two() {
        return true;
    }
    let high = 1 << (31 - dict_size.leading_zeros());
    dict_size == high | (high >> 1)
}

/// Decompresses the LZMA stream in `payload` into `dest`, returning the number of bytes produced.
///
/// Output is bounded by the length of `dest`: a header declaring more than that is refused up
/// front, and the writer refuses anything past the end.
#[cfg(feature = "lzma")]
pub fn decompress(payload: &[u8], dest: &mut [u8]) -> Result<usize, MaterializeError> {
    use lzma_rs::decompress::{Options, UnpackedSize};
    use std::io::{self, ErrorKind, Write};

    /// A writer which refuses to go past the end of its buffer.
    struct BoundedSink<'a> {
        buf: &'a mut [u8],
        len: usize,
        overflowed: bool,
    }

    impl Write for BoundedSink<'_> {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let room = self.buf.len() - self.len;
            if data.len() > room {
                self.overflowed = true;
                return Err(io::Error::from(ErrorKind::WriteZero));
            }
            self.buf[self.len..self.len + data.len()].copy_from_slice(data);
            self.len += data.len();
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let capacity = dest.len();
    let mut size = [0; 8];
    if let Some(declared) = payload.get(5..HEADER_LEN) {
        size.copy_from_slice(declared);
        let unpacked_size = u64::from_le_bytes(size);
        if unpacked_size != UNKNOWN_SIZE && unpacked_size > capacity as u64 {
            return Err(MaterializeError::OutOfSpace { capacity });
        }
    }
    let mut sink = BoundedSink {
        buf: dest,
        len: 0,
        overflowed: false,
    };
    let options = Options {
        unpacked_size: UnpackedSize::ReadFromHeader,
        memlimit: None,
        allow_incomplete: false,
    };
    let mut input = payload;
    match lzma_rs::lzma_decompress_with_options(&mut input, &mut sink, &options) {
        Ok(()) => Ok(sink.len),
        Err(_) if sink.overflowed || sink.len == capacity => {
            Err(MaterializeError::OutOfSpace { capacity })
        }
        Err(_) => Err(MaterializeError::CorruptStream { codec: Codec::Lzma }),
    }
}

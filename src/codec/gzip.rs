// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! gzip wrapped DEFLATE, decoded with `libflate`.

#[cfg(feature = "gzip")]
use crate::materialize::{Codec, MaterializeError};

const MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Returns whether `payload` starts with the gzip magic number.
pub fn has_magic(payload: &[u8]) -> bool {
    payload.starts_with(&MAGIC)
}

/// Decompresses the gzip stream in `payload` into `dest`, returning the number of bytes produced.
///
/// The trailer's CRC-32 and length are checked by the decoder once the stream ends.
#[cfg(feature = "gzip")]
pub fn decompress(payload: &[u8], dest: &mut [u8]) -> Result<usize, MaterializeError> {
    use core2::io::{self, ErrorKind, Read};
    use libflate::gzip::Decoder;

    fn read_some(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match reader.read(buf) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    let capacity = dest.len();
    let corrupt = MaterializeError::CorruptStream { codec: Codec::Gzip };
    let out_of_space = MaterializeError::OutOfSpace { capacity };

    let mut decoder = Decoder::new(payload).map_err(|_| corrupt)?;
    let mut len = 0;
    while len < capacity {
        match read_some(&mut decoder, &mut dest[len..]) {
            Ok(0) => return Ok(len),
            Ok(n) => len += n,
            Err(_) => return Err(corrupt),
        }
    }

    // The buffer is full, so the stream must end here.
    let mut extra = [0; 1];
    match read_some(&mut decoder, &mut extra) {
        Ok(0) => Ok(len),
        Ok(_) => Err(out_of_space),
        // A stream which was cut short by the full buffer is most likely too large rather than
        // corrupt.
        Err(_) => Err(out_of_space),
    }
}

#[cfg(all(test, feature = "gzip"))]
mod tests {
    use super::*;
    use libflate::gzip::Encoder;
    use std::{io::Write, vec::Vec};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = Encoder::new(Vec::new()).unwrap();
        encoder.write_all(data).unwrap();
        encoder.finish().into_result().unwrap()
    }

    #[test]
    fn decodes_into_exact_buffer() {
        let plain = b"next stage ".repeat(100);
        let payload = gzip(&plain);
        assert!(has_magic(&payload));

        let mut dest = vec![0; plain.len()];
        assert_eq!(decompress(&payload, &mut dest), Ok(plain.len()));
        assert_eq!(dest, plain);
    }

    #[test]
    fn too_small_buffer_is_out_of_space() {
        let plain = b"next stage ".repeat(100);
        let payload = gzip(&plain);
        let mut dest = vec![0; plain.len() - 1];
        assert_eq!(
            decompress(&payload, &mut dest),
            Err(MaterializeError::OutOfSpace {
                capacity: plain.len() - 1
            })
        );
    }

    #[test]
    fn flipped_bit_is_corrupt() {
        let plain = b"next stage ".repeat(100);
        let mut payload = gzip(&plain);
        // Damage the CRC-32 in the trailer.
        let crc = payload.len() - 8;
        payload[crc] ^= 0x01;
        let mut dest = vec![0; plain.len() * 2];
        assert_eq!(
            decompress(&payload, &mut dest),
            Err(MaterializeError::CorruptStream { codec: Codec::Gzip })
        );
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let mut dest = [0; 16];
        assert_eq!(
            decompress(&MAGIC, &mut dest),
            Err(MaterializeError::CorruptStream { codec: Codec::Gzip })
        );
    }
}

// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! LZ4 frames. The frame is walked here; each block is decoded with `lz4_flex`.

#[cfg(feature = "lz4")]
use crate::materialize::{Codec, MaterializeError};

const MAGIC: u32 = 0x184d_2204;

#[cfg(feature = "lz4")]
mod frame {
    pub const VERSION_MASK: u8 = 0b1100_0000;
    pub const VERSION_1: u8 = 0b0100_0000;
    pub const BLOCK_INDEPENDENT: u8 = 1 << 5;
    pub const BLOCK_CHECKSUM: u8 = 1 << 4;
    pub const CONTENT_SIZE: u8 = 1 << 3;
    pub const CONTENT_CHECKSUM: u8 = 1 << 2;
    pub const RESERVED: u8 = 1 << 1;
    pub const DICT_ID: u8 = 1 << 0;

    pub const BD_RESERVED: u8 = 0b1000_1111;

    /// Set in a block size when the block is stored uncompressed.
    pub const UNCOMPRESSED_BLOCK: u32 = 1 << 31;

    /// How far back a linked block may refer.
    pub const WINDOW: usize = 64 * 1024;
}

/// Returns whether `payload` starts with the LZ4 frame magic number.
pub fn has_magic(payload: &[u8]) -> bool {
    payload.get(..4) == Some(&MAGIC.to_le_bytes()[..])
}

#[cfg(feature = "lz4")]
struct Reader<'a> {
    data: &'a [u8],
}

#[cfg(feature = "lz4")]
impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], MaterializeError> {
        if n > self.data.len() {
            return Err(MaterializeError::CorruptStream { codec: Codec::Lz4 });
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, MaterializeError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, MaterializeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, MaterializeError> {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Decompresses the LZ4 frame in `payload` into `dest`, returning the number of bytes produced.
///
/// Both independent and linked blocks are handled. Checksums are skipped, not verified.
#[cfg(feature = "lz4")]
pub fn decompress(payload: &[u8], dest: &mut [u8]) -> Result<usize, MaterializeError> {
    use frame::*;
    use lz4_flex::block::{self, DecompressError};

    let capacity = dest.len();
    let corrupt = MaterializeError::CorruptStream { codec: Codec::Lz4 };
    let unsupported = MaterializeError::UnsupportedCodec { codec: Codec::Lz4 };

    let mut reader = Reader { data: payload };
    if reader.u32()? != MAGIC {
        return Err(corrupt);
    }
    let flags = reader.u8()?;
    let descriptor = reader.u8()?;
    if flags & VERSION_MASK != VERSION_1 || flags & DICT_ID != 0 {
        return Err(unsupported);
    }
    if flags & RESERVED != 0 || descriptor & BD_RESERVED != 0 {
        return Err(corrupt);
    }
    let max_block_size = match (descriptor >> 4) & 0x7 {
        4 => 64 * 1024,
        5 => 256 * 1024,
        6 => 1024 * 1024,
        7 => 4 * 1024 * 1024,
        _ => return Err(corrupt),
    };
    // Only running out of output is a size problem. Any other failure is the stream's fault.
    let decode_error = |e: DecompressError, room: usize| match e {
        DecompressError::OutputTooSmall { .. } => MaterializeError::OutOfSpace { capacity },
        _ if room == 0 => MaterializeError::OutOfSpace { capacity },
        _ => corrupt,
    };
    if flags & CONTENT_SIZE != 0 {
        let content_size = reader.u64()?;
        if content_size > capacity as u64 {
            return Err(MaterializeError::OutOfSpace { capacity });
        }
    }
    // Header checksum.
    reader.u8()?;

    let independent = flags & BLOCK_INDEPENDENT != 0;
    let mut len = 0;
    loop {
        let block_size = reader.u32()?;
        if block_size == 0 {
            break;
        }
        let size = (block_size & !UNCOMPRESSED_BLOCK) as usize;
        if size > max_block_size {
            return Err(corrupt);
        }
        let data = reader.take(size)?;
        if block_size & UNCOMPRESSED_BLOCK != 0 {
            let out = dest
                .get_mut(len..len + size)
                .ok_or(MaterializeError::OutOfSpace { capacity })?;
            out.copy_from_slice(data);
            len += size;
        } else if independent || len == 0 {
            let room = capacity - len;
            let produced = block::decompress_into(data, &mut dest[len..])
                .map_err(|e| decode_error(e, room))?;
            len += produced;
        } else {
            let room = capacity - len;
            let (previous, out) = dest.split_at_mut(len);
            let dict = &previous[len.saturating_sub(WINDOW)..];
            let produced = block::decompress_into_with_dict(data, out, dict)
                .map_err(|e| decode_error(e, room))?;
            len += produced;
        }
        if flags & BLOCK_CHECKSUM != 0 {
            reader.u32()?;
        }
    }
    if flags & CONTENT_CHECKSUM != 0 {
        reader.u32()?;
    }
    Ok(len)
}

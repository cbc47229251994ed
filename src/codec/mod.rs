// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Decompressors for the formats the next stage may be stored in.
//!
//! Each module can always tell whether a payload looks like its format; the decoder itself is only
//! built with the matching cargo feature.

pub mod gzip;
pub mod lz4;
pub mod lzma;

// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Runtime configuration, on top of what the cargo features compile in.

use bitflags::bitflags;
use static_assertions::const_assert;
use thiserror::Error;

/// Stack kept free below the current stack pointer when planning.
pub const DEFAULT_STACK_MARGIN: usize = 0x8000;

/// Default alignment of every planned address.
pub const DEFAULT_ALIGNMENT: usize = 8;

const_assert!(DEFAULT_ALIGNMENT.is_power_of_two() && DEFAULT_ALIGNMENT >= 8);
const_assert!(Config::DEFAULT.validate().is_ok());

bitflags! {
    /// Set of decompressors the materializer may use.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct Codecs: u8 {
        /// LZMA "alone" streams.
        const LZMA = 1 << 0;
        /// gzip wrapped DEFLATE.
        const GZIP = 1 << 1;
        /// LZ4 frames.
        const LZ4 = 1 << 2;
    }
}

impl Codecs {
    /// Returns the decompressors built into this binary.
    pub const fn compiled() -> Self {
        let mut codecs = Self::empty();
        if cfg!(feature = "lzma") {
            codecs = codecs.union(Self::LZMA);
        }
        if cfg!(feature = "gzip") {
            codecs = codecs.union(Self::GZIP);
        }
        if cfg!(feature = "lz4") {
            codecs = codecs.union(Self::LZ4);
        }
        codecs
    }
}

/// Checksum computed over the materialized image and passed to the next stage.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChecksumKind {
    /// CRC-8 with polynomial 0x07 and initial value 0.
    #[default]
    Crc8,
    /// The CRC-32 used by gzip and Ethernet.
    Crc32,
}

/// How control reaches the next stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransitionPath {
    /// Through the copy of the transfer code below the stack.
    Relocated,
    /// Through the transfer code at its link-time address. Only sound if the image doesn't
    /// overwrite it.
    Direct,
}

impl Default for TransitionPath {
    fn default() -> Self {
        if cfg!(feature = "direct-jump") {
            Self::Direct
        } else {
            Self::Relocated
        }
    }
}

/// A configuration value which can't work.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ConfigError {
    /// The alignment is not a power of two of at least 8.
    #[error("alignment {0:#x} is not a power of two of at least 8")]
    BadAlignment(usize),
}

/// Loader configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Bytes of stack kept free below the stack hint.
    pub margin: usize,
    /// Alignment of every planned address.
    pub alignment: usize,
    /// Decompressors to try. Anything not compiled in is ignored.
    pub codecs: Codecs,
    /// Checksum passed to the next stage.
    pub checksum: ChecksumKind,
    /// How to reach the next stage.
    pub path: TransitionPath,
}

impl Config {
    /// The default configuration.
    pub const DEFAULT: Self = Self {
        margin: DEFAULT_STACK_MARGIN,
        alignment: DEFAULT_ALIGNMENT,
        codecs: Codecs::compiled(),
        checksum: ChecksumKind::Crc8,
        path: if cfg!(feature = "direct-jump") {
            TransitionPath::Direct
        } else {
            TransitionPath::Relocated
        },
    };

    /// Checks that the configuration is usable.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.alignment < 8 || !self.alignment.is_power_of_two() {
            return Err(ConfigError::BadAlignment(self.alignment));
        }
        Ok(())
    }

    /// Returns the decompressors which are both requested and compiled in.
    pub const fn effective_codecs(&self) -> Codecs {
        self.codecs.intersection(Codecs::compiled())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_const() {
        assert_eq!(Config::default(), Config::DEFAULT);
        assert_eq!(Config::DEFAULT.path, TransitionPath::default());
        assert_eq!(Config::DEFAULT.validate(), Ok(()));
    }

    #[test]
    fn bad_alignment_rejected() {
        for alignment in [0, 4, 12, 24] {
            let config = Config {
                alignment,
                ..Config::DEFAULT
            };
            assert_eq!(config.validate(), Err(ConfigError::BadAlignment(alignment)));
        }
        let config = Config {
            alignment: 0x1000,
            ..Config::DEFAULT
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn uncompiled_codecs_are_masked() {
        let config = Config {
            codecs: Codecs::all(),
            ..Config::DEFAULT
        };
        assert_eq!(config.effective_codecs(), Codecs::compiled());
        assert_eq!(
            Config {
                codecs: Codecs::empty(),
                ..Config::DEFAULT
            }
            .effective_codecs(),
            Codecs::empty()
        );
    }
}

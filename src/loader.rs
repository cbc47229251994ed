// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

use crate::{
    arena::{ArenaError, Memory, Span},
    canary::StackCanary,
    config::{Config, TransitionPath},
    error::TransitionError,
    fdt::relocate_config,
    layout::{InsufficientSpace, MemoryLayout, Planner},
    materialize::{Codec, materialize_in},
    pic::PicSegment,
    transition::{Handoff, Transfer},
};
use log::{debug, info};

/// The next stage as left in memory by whatever loaded it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootImage {
    /// The possibly compressed image, at the address it was loaded to.
    pub payload: Span,
    /// Length of the image once materialized, from its header.
    pub uncompressed_len: usize,
    /// The configuration blob to pass on.
    pub config: Span,
    /// Address execution continues at.
    pub entry_point: usize,
}

/// Moves the next stage into place under the running stack and enters it.
#[derive(Clone, Copy, Debug)]
pub struct Relocator<'a> {
    config: Config,
    planner: Planner,
    segment: PicSegment<'a>,
    trampoline: usize,
}

impl<'a> Relocator<'a> {
    /// Creates a relocator which copies `segment` below the stack and transfers control through
    /// the routine linked at `trampoline`, which must be inside it. The image is placed at or above
    /// `floor`.
    pub fn new(
        config: Config,
        segment: PicSegment<'a>,
        trampoline: usize,
        floor: usize,
    ) -> Result<Self, TransitionError> {
        config.validate()?;
        if !segment.region().contains(trampoline) {
            return Err(TransitionError::SymbolOutsideRegion { symbol: trampoline });
        }
        Ok(Self {
            config,
            planner: Planner {
                floor,
                code_size: segment.size(),
                alignment: config.alignment,
            },
            segment,
            trampoline,
        })
    }

    /// Returns the configuration in use.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Works out where everything goes for an image of `image_size` bytes once materialized and a
    /// configuration blob of `config_size` bytes.
    ///
    /// Nothing is written, so this may be called any number of times.
    pub fn prepare_layout(
        &self,
        image_size: usize,
        config_size: usize,
        stack_hint: usize,
        margin: usize,
    ) -> Result<MemoryLayout, InsufficientSpace> {
        self.planner.plan(image_size, config_size, stack_hint, margin)
    }

    /// Carries out `layout` for `image` and hands the result to `handoff`.
    ///
    /// With a handoff which never returns, neither does this on success.
    pub fn commit_and_transfer<M: Memory, H: Handoff>(
        &self,
        mem: &mut M,
        layout: MemoryLayout,
        image: BootImage,
        handoff: H,
    ) -> Result<H::Outcome, TransitionError> {
        self.check_layout(mem, &layout, &image)?;

        let mut canary = StackCanary::new(layout.canary_addr);
        canary.arm(mem)?;
        let rcode = self.segment.copy_to(mem, layout.relocated_code_base)?;
        canary.check(mem)?;

        let len = materialize_in(
            mem,
            self.config.effective_codecs(),
            image.payload,
            layout.image_base,
            layout.image_capacity(),
            image.uncompressed_len,
        )?;
        canary.check(mem)?;

        let config = relocate_config(mem, &layout, image.config, len)?;
        canary.check(mem)?;

        let image_span = Span::new(layout.image_base, len);
        let checksum = self.config.checksum.compute(mem.view(image_span)?);
        mem.sync_instructions(image_span)?;
        let via = match self.config.path {
            TransitionPath::Relocated => rcode
                .entry_of(self.trampoline)
                .ok_or(TransitionError::SymbolOutsideRegion {
                    symbol: self.trampoline,
                })?,
            TransitionPath::Direct => self.trampoline,
        };
        info!(
            "spl_reloc: jumping to {:#x} via {via:#x}, image {len:#x} bytes crc {checksum:#x}, \
             config at {:#x}",
            image.entry_point, config.addr
        );
        Ok(handoff.enter(Transfer {
            via,
            target: image.entry_point,
            checksum,
            len,
        }))
    }

    /// Plans with the configured margin below `stack_hint`, then commits.
    pub fn load_and_jump<M: Memory, H: Handoff>(
        &self,
        mem: &mut M,
        image: BootImage,
        stack_hint: usize,
        handoff: H,
    ) -> Result<H::Outcome, TransitionError> {
        let layout = self.prepare_layout(
            image.uncompressed_len,
            image.config.len,
            stack_hint,
            self.config.margin,
        )?;
        self.commit_and_transfer(mem, layout, image, handoff)
    }

    /// Rejects a layout which can't be carried out before anything is written.
    fn check_layout<M: Memory>(
        &self,
        mem: &M,
        layout: &MemoryLayout,
        image: &BootImage,
    ) -> Result<(), TransitionError> {
        let window = mem.window();
        let image_area = Span::new(layout.image_base, layout.available);
        let rcode = Span::new(layout.relocated_code_base, self.segment.size());
        for span in [image_area, rcode, layout.canary(), image.payload, image.config] {
            if !window.contains(&span) {
                return Err(ArenaError::OutOfBounds { span }.into());
            }
        }
        // A raw copy writes exactly the declared length. A decoder may write anywhere up to the
        // capacity it is given.
        let codecs = self.config.effective_codecs();
        let image_writes = match Codec::detect(mem.view(image.payload)?, codecs) {
            Ok(Codec::Raw) => Span::new(layout.image_base, image.uncompressed_len),
            _ => Span::new(layout.image_base, layout.image_capacity()),
        };
        // The relocated code, canary and image are written before the blob is moved, and the
        // first two before the payload is read.
        let guards = [(rcode, true), (layout.canary(), true), (image_writes, false)];
        for (guarded, covers_payload) in guards {
            let sources = [Some(image.config), covers_payload.then_some(image.payload)];
            for source in sources.into_iter().flatten() {
                if guarded.overlaps(&source) {
                    return Err(ArenaError::Overlap {
                        a: source,
                        b: guarded,
                    }
                    .into());
                }
            }
        }
        debug!(
            "spl_reloc: image {:#x} config {:#x} rcode {:#x} canary {:#x}",
            layout.image_base, layout.config_base, layout.relocated_code_base, layout.canary_addr
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arena::Arena,
        canary::STACK_PROT_VALUE,
        config::Codecs,
        pic::LinkedRegion,
    };

    const REGION: LinkedRegion = LinkedRegion {
        start: 0x8_1000,
        end: 0x8_1010,
    };
    const CODE: [u8; 16] = *b"\x1f\x20\x03\xd5rcode-blob-0";
    const TRAMPOLINE: usize = 0x8_1004;

    struct Record;

    impl Handoff for Record {
        type Outcome = Transfer;

        fn enter(self, transfer: Transfer) -> Transfer {
            transfer
        }
    }

    fn relocator(path: TransitionPath) -> Relocator<'static> {
        let config = Config {
            margin: 0x100,
            codecs: Codecs::empty(),
            path,
            ..Config::DEFAULT
        };
        let segment = PicSegment::new(REGION, &CODE).unwrap();
        Relocator::new(config, segment, TRAMPOLINE, 0x1000).unwrap()
    }

    /// A 0x1000 byte window at 0x1000 with a raw image loaded at 0x1800 and a blob at 0x1900.
    fn window() -> [u8; 0x1000] {
        let mut bytes = [0u8; 0x1000];
        for (i, byte) in bytes[0x800..0x880].iter_mut().enumerate() {
            *byte = i as u8 | 0x80;
        }
        bytes[0x900..0x908].copy_from_slice(b"\xd0\x0d\xfe\xedblob");
        bytes
    }

    const IMAGE: BootImage = BootImage {
        payload: Span::new(0x1800, 0x80),
        uncompressed_len: 0x7d,
        config: Span::new(0x1900, 8),
        entry_point: 0x1000,
    };

    #[test]
    fn trampoline_must_be_in_segment() {
        let segment = PicSegment::new(REGION, &CODE).unwrap();
        assert_eq!(
            Relocator::new(Config::DEFAULT, segment, 0x8_1010, 0x1000).unwrap_err(),
            TransitionError::SymbolOutsideRegion { symbol: 0x8_1010 }
        );
    }

    #[test]
    fn raw_image_reaches_handoff() {
        let relocator = relocator(TransitionPath::Relocated);
        let mut bytes = window();
        let mut arena = Arena::new(0x1000, &mut bytes);

        let transfer = relocator
            .load_and_jump(&mut arena, IMAGE, 0x2000, Record)
            .unwrap();

        let layout = relocator.prepare_layout(0x7d, 8, 0x2000, 0x100).unwrap();
        assert_eq!(layout.relocated_code_base, 0x1ef0);
        assert_eq!(transfer.via, 0x1ef4);
        assert_eq!(transfer.target, 0x1000);
        assert_eq!(transfer.len, 0x7d);
        let image: Vec<u8> = (0..0x7du8).map(|i| i | 0x80).collect();
        assert_eq!(arena.view(Span::new(0x1000, 0x7d)), Ok(&image[..]));
        assert_eq!(
            transfer.checksum,
            relocator.config().checksum.compute(&image)
        );
        assert_eq!(
            arena.view(Span::new(0x1080, 8)),
            Ok(&b"\xd0\x0d\xfe\xedblob"[..])
        );
        assert_eq!(arena.view(Span::new(0x1ef0, 16)), Ok(&CODE[..]));
        assert_eq!(arena.read_word(0x1f00), Ok(STACK_PROT_VALUE));
    }

    #[test]
    fn direct_path_uses_link_address() {
        let relocator = relocator(TransitionPath::Direct);
        let mut bytes = window();
        let mut arena = Arena::new(0x1000, &mut bytes);
        let transfer = relocator
            .load_and_jump(&mut arena, IMAGE, 0x2000, Record)
            .unwrap();
        assert_eq!(transfer.via, TRAMPOLINE);
    }

    #[test]
    fn payload_under_relocated_code_is_refused() {
        let relocator = relocator(TransitionPath::Relocated);
        let mut bytes = window();
        let mut arena = Arena::new(0x1000, &mut bytes);
        let image = BootImage {
            payload: Span::new(0x1e80, 0x80),
            ..IMAGE
        };
        assert_eq!(
            relocator.load_and_jump(&mut arena, image, 0x2000, Record),
            Err(TransitionError::Arena(ArenaError::Overlap {
                a: Span::new(0x1e80, 0x80),
                b: Span::new(0x1ef0, 16)
            }))
        );
        assert_eq!(arena.read_word(0x1f00), Ok(0));
    }

    #[test]
    fn blob_under_raw_image_is_refused() {
        let relocator = relocator(TransitionPath::Relocated);
        let mut bytes = window();
        let mut arena = Arena::new(0x1000, &mut bytes);
        let image = BootImage {
            config: Span::new(0x1040, 8),
            ..IMAGE
        };
        assert_eq!(
            relocator.load_and_jump(&mut arena, image, 0x2000, Record),
            Err(TransitionError::Arena(ArenaError::Overlap {
                a: Span::new(0x1040, 8),
                b: Span::new(0x1000, 0x7d)
            }))
        );
        assert_eq!(arena.read_word(0x1f00), Ok(0));

        // Right behind the declared length is fine, even though a decoder could reach it.
        let image = BootImage {
            config: Span::new(0x1080, 8),
            ..IMAGE
        };
        assert!(relocator.load_and_jump(&mut arena, image, 0x2000, Record).is_ok());
    }
}

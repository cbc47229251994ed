// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

//! Chainloads a compressed image at EL1 on QEMU's virt board.
//!
//! Build with `--target aarch64-unknown-none --no-default-features --features gzip,lz4,psci`, then
//! run with the payload and its sizes loaded alongside:
//!
//! ```text
//! qemu-system-aarch64 -machine virt -cpu cortex-a57 -m 1G -nographic \
//!     -kernel qemu_chainload \
//!     -device loader,addr=0x48000000,data=<payload length>,data-len=4 \
//!     -device loader,addr=0x48000004,data=<image length>,data-len=4 \
//!     -device loader,addr=0x48000010,file=next.bin.gz,force-raw=on
//! ```
//!
//! On any other target this is an empty program.

#![cfg_attr(all(target_arch = "aarch64", target_os = "none"), no_std, no_main)]

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
fn main() {}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod chainload {
    use aarch64_rt::entry;
    use core::{mem::MaybeUninit, panic::PanicInfo};
    use linked_list_allocator::LockedHeap;
    use smccc::{Hvc, psci::system_reset};
    use spl_reloc::{
        BootImage, TransitionError,
        arena::{Arena, Memory, Span},
        config::Config,
        hw,
    };

    /// Start of the memory the loader may use. QEMU puts the device tree here.
    const WINDOW_BASE: usize = 0x4000_0000;
    /// This program is linked at the top of the window, so its own stack can't be used as the
    /// upper bound. Everything from here up is left alone, apart from the payload.
    const WINDOW_TOP: usize = 0x4800_0000;
    /// End of the window. This program is linked above it.
    const WINDOW_END: usize = 0x4f00_0000;
    /// Where the next stage is written and entered. Below it is the device tree.
    const IMAGE_FLOOR: usize = 0x4020_0000;
    /// Two little-endian words: the payload length and the materialized image length.
    const PAYLOAD_SIZES: usize = WINDOW_TOP;
    /// The payload as loaded by QEMU.
    const PAYLOAD: usize = WINDOW_TOP + 0x10;

    const HEAP_SIZE: usize = 0x10_0000;

    static mut HEAP: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    entry!(main);
    fn main(fdt_address: u64, _arg1: u64, _arg2: u64, _arg3: u64) -> ! {
        // SAFETY: `HEAP` is only referred to here, and this runs once before anything allocates.
        unsafe {
            ALLOCATOR
                .lock()
                .init((&raw mut HEAP).cast::<u8>(), HEAP_SIZE);
        }
        let Err(e) = chainload(fdt_address as usize);
        hw::fatal(e);
    }

    fn chainload(fdt_address: usize) -> Result<core::convert::Infallible, TransitionError> {
        let relocator = hw::relocator(Config::DEFAULT, IMAGE_FLOOR)?;
        // SAFETY: The window is RAM on the virt board which nothing else refers to. This program
        // and its stack are linked above it.
        let mut mem = unsafe { Arena::from_raw_parts(WINDOW_BASE, WINDOW_END - WINDOW_BASE) };

        let payload_len = mem.read_word(PAYLOAD_SIZES)?;
        let image_len = mem.read_word(PAYLOAD_SIZES + 4)?;
        // The device tree header holds its total size, big-endian, in the second word.
        let fdt_len = u32::from_be(mem.read_word(fdt_address + 4)?);
        let image = BootImage {
            payload: Span::new(PAYLOAD, payload_len as usize),
            uncompressed_len: image_len as usize,
            config: Span::new(fdt_address, fdt_len as usize),
            entry_point: IMAGE_FLOOR,
        };
        relocator.load_and_jump(&mut mem, image, WINDOW_TOP, hw::Chainload)
    }

    #[panic_handler]
    fn panic(_info: &PanicInfo) -> ! {
        let _ = system_reset::<Hvc>();
        #[allow(clippy::empty_loop)]
        loop {}
    }
}

// Copyright 2025 The spl-reloc Authors.
// This project is dual-licensed under Apache 2.0 and MIT terms.
// See LICENSE-APACHE and LICENSE-MIT for details.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

/// Places the transfer code where `hw` expects to find it.
const RCODE_LD: &str = include_str!("rcode.ld");

fn env_path(key: &str) -> io::Result<PathBuf> {
    env::var_os(key)
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other(format!("{key} is not set")))
}

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=rcode.ld");
    println!("cargo::rerun-if-changed=demos/qemu.ld");

    // Dependents link with `-Trcode.ld`, so it has to be somewhere on their search path.
    let out_dir = env_path("OUT_DIR")?;
    fs::write(out_dir.join("rcode.ld"), RCODE_LD)?;
    println!("cargo::rustc-link-search={}", out_dir.display());

    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        link_demos(&env_path("CARGO_MANIFEST_DIR")?.join("demos"));
    }
    Ok(())
}

/// The bare metal demos put the memory map first, then the runtime's image layout, then the
/// transfer code.
fn link_demos(dir: &Path) {
    println!("cargo::rustc-link-search={}", dir.display());
    for script in ["qemu.ld", "image.ld", "rcode.ld"] {
        println!("cargo::rustc-link-arg-examples=-T{script}");
    }
}

use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let ld = manifest_dir.join("kernel.ld");

    // Sanity checks (fail fast during build)
    let phys_start = memory::KERNEL_PHYS_START;
    assert_eq!(
        phys_start & 0xfff,
        0,
        "KERNEL_PHYS_START must be 4 KiB aligned (got {phys_start:#x})"
    );
    assert!(
        memory::HEAP_START > phys_start,
        "the heap must start above the kernel image"
    );

    println!("cargo:rerun-if-changed={}", ld.display());

    // Hosted builds link normally.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_PHYS_START={phys_start:#x}");
    println!("cargo:rustc-link-arg-bins=--defsym=HEAP_START={:#x}", memory::HEAP_START);
}

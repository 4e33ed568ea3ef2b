//! Common test utilities and fixtures

#![allow(dead_code)]

use clr_image::ImageBuilder;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Initialize test logging once
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create a temporary directory for tests
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write `builder`'s image to `dir/name`
pub fn write_image(dir: &Path, name: &str, builder: &ImageBuilder) -> PathBuf {
    let path = dir.join(name);
    builder.write_to(&path).expect("Failed to write image");
    path
}

/// Offset of the PE signature in an image
pub fn pe_offset(data: &[u8]) -> usize {
    u32::from_le_bytes([data[0x3C], data[0x3D], data[0x3E], data[0x3F]]) as usize
}

/// Offset of the `BSJB` metadata signature in an image
pub fn metadata_offset(data: &[u8]) -> usize {
    data.windows(4)
        .position(|window| window == b"BSJB")
        .expect("image has no metadata root")
}

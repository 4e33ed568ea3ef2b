//! Patch modules packed in mod packages
//!
//! Mod packages are ZIP files. Entry names are always decoded as UTF-8,
//! whatever the language encoding flag says, because packages produced on
//! Windows often omit the flag while still storing UTF-8 names.

use crate::module::{ModuleOrigin, PatchModule, entry_file_name, has_patch_suffix};
use crate::registry::ResourceRegistry;
use crate::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

// Declared entry sizes come from the package and are only a hint
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

/// Read every patch module of the package at `path`
///
/// The opened package is registered in `registry`, which closes it during
/// cleanup. Directory entries and entries whose base name lacks `suffix` are
/// skipped.
pub fn read_package(
    path: &Path,
    suffix: &str,
    registry: &mut ResourceRegistry,
) -> Result<Vec<PatchModule>> {
    let archive = File::open(path)
        .map_err(zip::result::ZipError::Io)
        .and_then(ZipArchive::new)
        .map_err(|source| Error::PackageOpen {
            path: path.to_path_buf(),
            source,
        })?;

    let handle = registry.register_archive(path, archive);
    let Some(archive) = registry.archive_mut(handle) else {
        return Ok(Vec::new());
    };

    let mut modules = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source| Error::PackageEntry {
                path: path.to_path_buf(),
                entry: format!("#{index}"),
                source,
            })?;

        if entry.is_dir() {
            continue;
        }

        let name = String::from_utf8_lossy(entry.name_raw()).into_owned();
        if !has_patch_suffix(entry_file_name(&name), suffix) {
            continue;
        }

        let declared = usize::try_from(entry.size()).unwrap_or(0);
        let mut data = Vec::with_capacity(declared.min(MAX_PREALLOCATION));
        entry
            .read_to_end(&mut data)
            .map_err(|source| Error::PackageEntry {
                path: path.to_path_buf(),
                entry: name.clone(),
                source: source.into(),
            })?;

        log::debug!("Read {} ({} bytes) from {}", name, data.len(), path.display());
        modules.push(PatchModule::new(
            data,
            ModuleOrigin::ArchiveEntry {
                archive: path.to_path_buf(),
                entry: name,
            },
        ));
    }

    for module in &modules {
        registry.track_buffer(module.data().clone());
    }

    Ok(modules)
}

//! Recursive discovery of loose patch modules

use crate::module::has_patch_suffix;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lazy sequence of patch module paths below a directory
///
/// Created by [`scan_patch_files`].
#[derive(Debug)]
pub struct PatchFiles {
    root: PathBuf,
    suffix: String,
    walker: Option<walkdir::IntoIter>,
}

/// Scan `root` recursively for files whose name ends with `suffix`
///
/// The suffix comparison is ordinal and ASCII case-insensitive over the raw
/// name bytes. Symlinked directories are not descended into, but a symlink
/// whose target is a file counts as a file. A root that does not exist yields
/// nothing; traversal errors below an existing root are yielded as items.
pub fn scan_patch_files<P: AsRef<Path>>(root: P, suffix: &str) -> PatchFiles {
    let root = root.as_ref();
    let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());

    let walker = if root.is_dir() {
        Some(WalkDir::new(&root).follow_links(false).into_iter())
    } else {
        log::debug!("Scan root {} does not exist", root.display());
        None
    };

    PatchFiles {
        root,
        suffix: suffix.to_string(),
        walker,
    }
}

impl PatchFiles {
    /// Root being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Iterator for PatchFiles {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        let walker = self.walker.as_mut()?;

        for entry in walker.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    let path = source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return Some(Err(Error::Scan { path, source }));
                }
            };

            if !has_patch_suffix(entry.file_name().as_encoded_bytes(), &self.suffix) {
                continue;
            }

            if is_file(&entry) {
                return Some(Ok(entry.into_path()));
            }
        }

        self.walker = None;
        None
    }
}

fn is_file(entry: &walkdir::DirEntry) -> bool {
    if entry.path_is_symlink() {
        // Dangling links are not files
        fs::metadata(entry.path()).is_ok_and(|meta| meta.is_file())
    } else {
        entry.file_type().is_file()
    }
}

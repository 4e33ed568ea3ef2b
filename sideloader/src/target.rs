//! The assembly being patched

use crate::{Error, Result};
use clr_image::{AssemblyIdentity, AssemblyImage};
use std::fs;
use std::path::{Path, PathBuf};

/// Assembly handed over by the host for patching
///
/// Holds the whole image in memory together with the directories its own
/// module-level resolver searches. Engines replace the image through
/// [`TargetAssembly::set_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAssembly {
    file_name: String,
    image: Vec<u8>,
    identity: AssemblyIdentity,
    search_directories: Vec<PathBuf>,
}

impl TargetAssembly {
    /// Load a target from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = fs::read(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut target = Self::from_bytes(file_name, image)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            target.add_search_directory(parent);
        }
        Ok(target)
    }

    /// Wrap an in-memory image
    pub fn from_bytes<S: Into<String>>(file_name: S, image: Vec<u8>) -> Result<Self> {
        let identity = AssemblyImage::from_bytes(image.as_slice())?.identity()?;
        Ok(Self {
            file_name: file_name.into(),
            image,
            identity,
            search_directories: Vec::new(),
        })
    }

    /// File name the host knows the assembly by
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Declared identity of the current image
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.identity
    }

    /// Current image bytes
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Replace the image, re-reading its identity
    pub fn set_image(&mut self, image: Vec<u8>) -> Result<()> {
        self.identity = AssemblyImage::from_bytes(image.as_slice())?.identity()?;
        self.image = image;
        Ok(())
    }

    /// Directories searched by the assembly's own resolver
    pub fn search_directories(&self) -> &[PathBuf] {
        &self.search_directories
    }

    /// Add a directory to the module-level search path, ignoring duplicates
    pub fn add_search_directory<P: AsRef<Path>>(&mut self, dir: P) {
        let dir = dir.as_ref();
        if !self.search_directories.iter().any(|known| known == dir) {
            self.search_directories.push(dir.to_path_buf());
        }
    }

    /// Write the current image to `path`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, &self.image)?;
        Ok(())
    }
}

//! Discovery of mod sources and the combined patch module sequence
//!
//! The mods directory holds two kinds of sources: mod folders, scanned
//! recursively for loose patch modules, and mod packages directly inside it.
//! Folders come first, then packages, each in filesystem listing order.
//!
//! Sources are materialized one at a time as the sequence is pulled. A source
//! that fails is logged and contributes no modules at all; the others are
//! unaffected.

use crate::archive::read_package;
use crate::config::SideloaderConfig;
use crate::module::{ModuleOrigin, PatchModule};
use crate::registry::ResourceRegistry;
use crate::scanner::scan_patch_files;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A single discovery source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModSource {
    /// Mod folder scanned recursively for loose modules
    Directory(PathBuf),
    /// Mod package read entry by entry
    Package(PathBuf),
}

impl ModSource {
    /// Path of the source
    pub fn path(&self) -> &Path {
        match self {
            ModSource::Directory(path) | ModSource::Package(path) => path,
        }
    }

    /// Whether this is a mod package
    pub fn is_package(&self) -> bool {
        matches!(self, ModSource::Package(_))
    }
}

impl fmt::Display for ModSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// Sources listed from a mods directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModSources {
    mods_dir: PathBuf,
    suffix: String,
    sources: Vec<ModSource>,
}

impl ModSources {
    /// Create the mods directory if needed and list its sources
    pub fn discover(config: &SideloaderConfig) -> Result<Self> {
        let mods_dir = &config.mods_dir;
        let mods_root = |source: std::io::Error| Error::ModsRoot {
            path: mods_dir.clone(),
            source,
        };

        fs::create_dir_all(mods_dir).map_err(mods_root)?;
        let mods_dir = std::path::absolute(mods_dir).map_err(mods_root)?;

        let mut directories = Vec::new();
        let mut packages = Vec::new();
        for entry in fs::read_dir(&mods_dir).map_err(mods_root)? {
            let path = entry.map_err(mods_root)?.path();
            if path.is_dir() {
                directories.push(ModSource::Directory(path));
            } else if path.is_file() && config.is_package(&path) {
                packages.push(ModSource::Package(path));
            }
        }

        log::debug!(
            "Found {} mod folders and {} mod packages in {}",
            directories.len(),
            packages.len(),
            mods_dir.display()
        );

        directories.extend(packages);
        Ok(Self {
            mods_dir,
            suffix: config.patch_suffix.clone(),
            sources: directories,
        })
    }

    /// No sources at all, used when discovery could not run
    pub fn empty(config: &SideloaderConfig) -> Self {
        Self {
            mods_dir: config.mods_dir.clone(),
            suffix: config.patch_suffix.clone(),
            sources: Vec::new(),
        }
    }

    /// Absolute mods directory
    pub fn mods_dir(&self) -> &Path {
        &self.mods_dir
    }

    /// Patch module suffix in use
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Sources in yield order
    pub fn iter(&self) -> std::slice::Iter<'_, ModSource> {
        self.sources.iter()
    }

    /// Number of sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source was found
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Lazy sequence of every patch module, tracked by `registry`
    pub fn modules<'a>(&'a self, registry: &'a mut ResourceRegistry) -> PatchModules<'a> {
        PatchModules {
            sources: self.sources.iter(),
            suffix: &self.suffix,
            registry,
            ready: VecDeque::new(),
            stats: EnumerationStats::default(),
        }
    }
}

impl<'a> IntoIterator for &'a ModSources {
    type Item = &'a ModSource;
    type IntoIter = std::slice::Iter<'a, ModSource>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Counters kept while the module sequence is pulled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    /// Sources read successfully
    pub sources_loaded: usize,
    /// Sources skipped because of an error
    pub sources_failed: usize,
    /// Loose files skipped because they could not be read
    pub files_skipped: usize,
    /// Modules produced
    pub modules: usize,
}

/// Lazy sequence of patch modules over all sources
///
/// Created by [`ModSources::modules`].
#[derive(Debug)]
pub struct PatchModules<'a> {
    sources: std::slice::Iter<'a, ModSource>,
    suffix: &'a str,
    registry: &'a mut ResourceRegistry,
    ready: VecDeque<PatchModule>,
    stats: EnumerationStats,
}

impl PatchModules<'_> {
    /// Counters for the sources pulled so far
    pub fn stats(&self) -> EnumerationStats {
        self.stats
    }

    fn load(&mut self, source: &ModSource) -> Result<Vec<PatchModule>> {
        match source {
            ModSource::Directory(dir) => {
                let (modules, skipped) = read_directory(dir, self.suffix)?;
                self.stats.files_skipped += skipped;
                for module in &modules {
                    self.registry.track_buffer(module.data().clone());
                }
                Ok(modules)
            }
            ModSource::Package(path) => read_package(path, self.suffix, self.registry),
        }
    }
}

impl Iterator for PatchModules<'_> {
    type Item = PatchModule;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(module) = self.ready.pop_front() {
                self.stats.modules += 1;
                return Some(module);
            }

            let source = self.sources.next()?;
            match self.load(source) {
                Ok(modules) => {
                    log::debug!("Loaded {} patch modules from {source}", modules.len());
                    self.stats.sources_loaded += 1;
                    self.ready.extend(modules);
                }
                Err(err) => {
                    log::warn!(
                        "Failed to load {source}: ({}) {}, skipping it",
                        err.kind_name(),
                        err.cause_message()
                    );
                    self.stats.sources_failed += 1;
                }
            }
        }
    }
}

/// Read every loose module of a mod folder, returning the modules and the
/// number of unreadable files skipped
fn read_directory(dir: &Path, suffix: &str) -> Result<(Vec<PatchModule>, usize)> {
    let mut modules = Vec::new();
    let mut skipped = 0;

    for path in scan_patch_files(dir, suffix) {
        let path = path?;
        match fs::read(&path) {
            Ok(data) => modules.push(PatchModule::new(data, ModuleOrigin::LooseFile { path })),
            Err(err) => {
                log::info!("Could not read {}: {err}, skipping it", path.display());
                skipped += 1;
            }
        }
    }

    Ok((modules, skipped))
}

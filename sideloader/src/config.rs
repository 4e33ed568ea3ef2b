//! Sideloader configuration
//!
//! Defaults mirror a BepInEx-style host: mods live in `<root>/Mods`,
//! patch modules are named `*.mm.dll`, packages use the `h3mod` extension
//! and `Assembly-CSharp.dll` is the only patched assembly.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default name of the mods folder under the loader root
pub const DEFAULT_MODS_FOLDER: &str = "Mods";

/// Default patch module suffix
pub const DEFAULT_PATCH_SUFFIX: &str = ".mm.dll";

/// Default mod package extensions (without the dot)
pub const DEFAULT_PACKAGE_EXTENSIONS: &[&str] = &["h3mod"];

/// Default assemblies handed over for patching
pub const DEFAULT_TARGET_ASSEMBLIES: &[&str] = &["Assembly-CSharp.dll"];

/// Default recursion bound below each resolve directory
pub const DEFAULT_RESOLVE_DEPTH: usize = 32;

/// Configuration for a sideloader run
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "snake_case"))]
pub struct SideloaderConfig {
    /// Directory holding mod folders and mod packages
    pub mods_dir: PathBuf,
    /// Extensions of package files directly inside `mods_dir`
    pub package_extensions: Vec<String>,
    /// File name suffix identifying patch modules
    pub patch_suffix: String,
    /// File names of assemblies to patch
    pub target_assemblies: Vec<String>,
    /// Directories searched for unresolved dependencies, highest priority first
    pub resolve_directories: Vec<PathBuf>,
    /// Maximum directory depth explored below each resolve directory
    pub max_resolve_depth: usize,
}

impl Default for SideloaderConfig {
    fn default() -> Self {
        Self {
            mods_dir: PathBuf::from(DEFAULT_MODS_FOLDER),
            package_extensions: DEFAULT_PACKAGE_EXTENSIONS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            patch_suffix: DEFAULT_PATCH_SUFFIX.to_string(),
            target_assemblies: DEFAULT_TARGET_ASSEMBLIES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            resolve_directories: Vec::new(),
            max_resolve_depth: DEFAULT_RESOLVE_DEPTH,
        }
    }
}

impl SideloaderConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mods directory
    pub fn mods_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.mods_dir = dir.into();
        self
    }

    /// Replace the package extensions; a leading dot is ignored
    pub fn package_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.package_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_string())
            .collect();
        self
    }

    /// Set the patch module suffix
    pub fn patch_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.patch_suffix = suffix.into();
        self
    }

    /// Replace the target assembly file names
    pub fn target_assemblies<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_assemblies = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Append a resolve directory with the lowest priority so far
    pub fn resolve_directory<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.resolve_directories.push(dir.into());
        self
    }

    /// Replace the resolve directories, highest priority first
    pub fn resolve_directories<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.resolve_directories = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the recursion bound below each resolve directory
    pub fn max_resolve_depth(mut self, depth: usize) -> Self {
        self.max_resolve_depth = depth;
        self
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<()> {
        if self.mods_dir.as_os_str().is_empty() {
            return Err(Error::config("mods_dir must not be empty"));
        }
        if self.patch_suffix.trim().is_empty() {
            return Err(Error::config("patch_suffix must not be empty"));
        }
        if let Some(ext) = self.package_extensions.iter().find(|e| e.is_empty()) {
            return Err(Error::config(format!("empty package extension {ext:?}")));
        }
        Ok(())
    }

    /// Whether `path` has one of the package extensions (case-insensitive)
    pub fn is_package(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.package_extensions
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext))
            })
    }

    /// Whether `file_name` is one of the target assemblies (case-insensitive)
    pub fn is_target(&self, file_name: &str) -> bool {
        self.target_assemblies
            .iter()
            .any(|target| target.eq_ignore_ascii_case(file_name))
    }

    /// Parse a configuration from JSON; missing fields take default values
    #[cfg(feature = "serde")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    #[cfg(feature = "serde")]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize the configuration as pretty JSON
    #[cfg(feature = "serde")]
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Directory layout of the host mod loader
///
/// Resolve directories are listed in the order the host searches them: the
/// loader's core libraries, the game's managed assemblies, preloader
/// patchers and finally plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    /// Loader root, e.g. `<game>/BepInEx`
    pub loader_root: PathBuf,
    /// Game managed assemblies, e.g. `<game>/h3vr_Data/Managed`
    pub managed_dir: PathBuf,
}

impl HostLayout {
    /// Describe a host layout
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(loader_root: P, managed_dir: Q) -> Self {
        Self {
            loader_root: loader_root.into(),
            managed_dir: managed_dir.into(),
        }
    }

    /// Loader core libraries
    pub fn core_dir(&self) -> PathBuf {
        self.loader_root.join("core")
    }

    /// Preloader patchers
    pub fn patchers_dir(&self) -> PathBuf {
        self.loader_root.join("patchers")
    }

    /// Plugins
    pub fn plugins_dir(&self) -> PathBuf {
        self.loader_root.join("plugins")
    }

    /// Resolve directories in host priority order
    pub fn resolve_directories(&self) -> Vec<PathBuf> {
        vec![
            self.core_dir(),
            self.managed_dir.clone(),
            self.patchers_dir(),
            self.plugins_dir(),
        ]
    }

    /// Default configuration for this host, with mods in `<root>/<folder>`
    pub fn config(&self, mods_folder: &str) -> SideloaderConfig {
        SideloaderConfig::default()
            .mods_dir(self.loader_root.join(mods_folder))
            .resolve_directories(self.resolve_directories())
    }
}

//! Patch modules and their provenance

use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a patch module came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A loose file inside a mod folder
    LooseFile,
    /// An entry inside a mod package
    ArchiveEntry,
}

/// Provenance of a patch module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleOrigin {
    /// Loose file on disk
    LooseFile {
        /// Absolute file path
        path: PathBuf,
    },
    /// Entry of a mod package
    ArchiveEntry {
        /// Package path
        archive: PathBuf,
        /// Entry name as stored in the package
        entry: String,
    },
}

impl ModuleOrigin {
    /// Kind of source this origin describes
    pub fn kind(&self) -> SourceKind {
        match self {
            ModuleOrigin::LooseFile { .. } => SourceKind::LooseFile,
            ModuleOrigin::ArchiveEntry { .. } => SourceKind::ArchiveEntry,
        }
    }

    /// The file on disk holding the module (the package for archive entries)
    pub fn container(&self) -> &Path {
        match self {
            ModuleOrigin::LooseFile { path } => path,
            ModuleOrigin::ArchiveEntry { archive, .. } => archive,
        }
    }

    /// Base file name of the module
    pub fn file_name(&self) -> &str {
        match self {
            ModuleOrigin::LooseFile { path } => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default(),
            ModuleOrigin::ArchiveEntry { entry, .. } => entry_file_name(entry),
        }
    }
}

impl fmt::Display for ModuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleOrigin::LooseFile { path } => write!(f, "{}", path.display()),
            ModuleOrigin::ArchiveEntry { archive, entry } => {
                write!(f, "{}!{}", archive.display(), entry)
            }
        }
    }
}

/// A fully materialized patch module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchModule {
    data: Bytes,
    origin: ModuleOrigin,
}

impl PatchModule {
    /// Wrap a buffer with its provenance
    pub fn new<B: Into<Bytes>>(data: B, origin: ModuleOrigin) -> Self {
        Self {
            data: data.into(),
            origin,
        }
    }

    /// Module bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Module provenance
    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }

    /// Source kind
    pub fn kind(&self) -> SourceKind {
        self.origin.kind()
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Base name of a zip entry path; both separators are accepted
pub fn entry_file_name(entry: &str) -> &str {
    entry.rsplit(['/', '\\']).next().unwrap_or(entry)
}

/// Ordinal, ASCII case-insensitive suffix test over the raw name bytes
///
/// Names that are not valid UTF-8 are compared byte for byte as well.
pub fn has_patch_suffix<N: AsRef<[u8]>>(file_name: N, suffix: &str) -> bool {
    let (name, suffix) = (file_name.as_ref(), suffix.as_bytes());
    name.len() >= suffix.len() && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

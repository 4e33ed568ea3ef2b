//! Error types for the sideloader pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sideloader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error produced by an external patch engine
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for sideloader operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The mods directory could not be created or listed
    #[error("Failed to prepare mods directory {path}: {source}")]
    ModsRoot {
        /// Mods directory
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// A directory tree could not be traversed
    #[error("Failed to scan {path}: {source}")]
    Scan {
        /// Directory being scanned
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: walkdir::Error,
    },

    /// A loose file could not be read
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// A mod package could not be opened as a zip archive
    #[error("Failed to open {path}: {source}")]
    PackageOpen {
        /// Package path
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: zip::result::ZipError,
    },

    /// An entry of an opened mod package could not be extracted
    #[error("Failed to extract {entry} from {path}: {source}")]
    PackageEntry {
        /// Package path
        path: PathBuf,
        /// Entry name
        entry: String,
        /// Underlying cause
        #[source]
        source: zip::result::ZipError,
    },

    /// An assembly image could not be read
    #[error("Assembly image error: {0}")]
    Image(#[from] clr_image::Error),

    /// The engine could not build a patching context for the target
    #[error("Failed to create patching context for {target}: {source}")]
    Context {
        /// Target assembly file name
        target: String,
        /// Engine error
        #[source]
        source: EngineError,
    },

    /// The engine failed to apply a patch module
    #[error("Failed to apply patch module {module}: {source}")]
    Patch {
        /// Origin of the failing module
        module: String,
        /// Engine error
        #[source]
        source: EngineError,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[cfg(feature = "serde")]
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl Error {
    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Short name of the error kind, used when logging skipped sources
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::ModsRoot { .. } => "ModsRootError",
            Error::Scan { .. } => "ScanError",
            Error::ReadFile { .. } => "ReadError",
            Error::PackageOpen { .. } => "PackageOpenError",
            Error::PackageEntry { .. } => "PackageEntryError",
            Error::Image(_) => "ImageError",
            Error::Context { .. } => "ContextError",
            Error::Patch { .. } => "PatchError",
            Error::Config(_) => "ConfigError",
            #[cfg(feature = "serde")]
            Error::ConfigParse(_) => "ConfigParseError",
        }
    }

    /// Message of the underlying cause, without the path this error adds
    pub fn cause_message(&self) -> String {
        match std::error::Error::source(self) {
            Some(cause) => cause.to_string(),
            None => self.to_string(),
        }
    }

    /// Check if this error only affects a single discovery source
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Scan { .. }
                | Error::ReadFile { .. }
                | Error::PackageOpen { .. }
                | Error::PackageEntry { .. }
                | Error::Image(_)
        )
    }
}

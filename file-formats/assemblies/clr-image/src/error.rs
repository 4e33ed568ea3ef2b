//! Error types for the CLI image reader

use std::io;
use thiserror::Error;

/// Result type alias for image operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for image operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with a DOS/PE header
    #[error("Not a PE image: {0}")]
    NotPortableExecutable(String),

    /// The PE image carries no CLI header (native binary)
    #[error("PE image has no CLI header")]
    NotManaged,

    /// Structurally invalid headers, tables or heaps
    #[error("Invalid image format: {0}")]
    InvalidFormat(String),

    /// A required metadata stream is absent
    #[error("Metadata stream {0} not found")]
    MissingStream(&'static str),

    /// The image is a module without an assembly manifest
    #[error("Image has no assembly manifest")]
    NoAssemblyManifest,

    /// A table needed to locate a row is unknown to the reader
    #[error("Unsupported metadata table 0x{0:02X}")]
    UnsupportedTable(u8),

    /// Invalid UTF-8 in a heap string
    #[error("Invalid UTF-8 in #Strings heap at offset {0}")]
    InvalidUtf8(u32),

    /// A configured read limit was exceeded
    #[error("Read limit exceeded: {0}")]
    LimitExceeded(String),
}

impl Error {
    /// Create a new InvalidFormat error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Error::InvalidFormat(msg.into())
    }

    /// Create a new NotPortableExecutable error
    pub fn not_pe<S: Into<String>>(msg: S) -> Self {
        Error::NotPortableExecutable(msg.into())
    }

    /// Create a new LimitExceeded error
    pub fn limit<S: Into<String>>(msg: S) -> Self {
        Error::LimitExceeded(msg.into())
    }

    /// Check if this error means the file is a valid binary that is simply not a
    /// managed assembly
    pub fn is_not_managed(&self) -> bool {
        matches!(
            self,
            Error::NotPortableExecutable(_) | Error::NotManaged | Error::NoAssemblyManifest
        )
    }

    /// Check if this error indicates the image is corrupted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat(_)
                | Error::MissingStream(_)
                | Error::InvalidUtf8(_)
                | Error::LimitExceeded(_)
        )
    }
}

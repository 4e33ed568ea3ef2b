//! Read limits for untrusted images
//!
//! Patch modules and candidate dependencies come from third-party mods, so
//! every count or length read from a header is checked against these bounds
//! before it is used to size a buffer or drive a loop.

use crate::{Error, Result};

/// Upper bounds applied while reading an image
#[derive(Debug, Clone)]
pub struct ReadLimits {
    /// Maximum number of PE sections (default: 96, the PE/COFF maximum)
    pub max_sections: u16,
    /// Maximum number of metadata streams (default: 16)
    pub max_streams: u16,
    /// Maximum length of a `#Strings` heap entry in bytes (default: 1024)
    pub max_string_length: usize,
    /// Maximum length of the metadata runtime version string (default: 255)
    pub max_version_length: u32,
    /// Maximum row count of any single metadata table (default: 16M)
    pub max_table_rows: u32,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_sections: 96,
            max_streams: 16,
            max_string_length: 1024,
            max_version_length: 255,
            max_table_rows: 0x00FF_FFFF,
        }
    }
}

impl ReadLimits {
    /// Create limits with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits suitable for very small, trusted inputs such as tests
    pub fn strict() -> Self {
        Self {
            max_sections: 16,
            max_streams: 8,
            max_string_length: 256,
            max_version_length: 64,
            max_table_rows: 65_536,
        }
    }

    pub(crate) fn check_sections(&self, count: u16) -> Result<()> {
        if count == 0 {
            return Err(Error::invalid_format("PE image has no sections"));
        }
        if count > self.max_sections {
            return Err(Error::limit(format!(
                "{count} sections (max {})",
                self.max_sections
            )));
        }
        Ok(())
    }

    pub(crate) fn check_streams(&self, count: u16) -> Result<()> {
        if count > self.max_streams {
            return Err(Error::limit(format!(
                "{count} metadata streams (max {})",
                self.max_streams
            )));
        }
        Ok(())
    }

    pub(crate) fn check_version_length(&self, length: u32) -> Result<()> {
        if length > self.max_version_length {
            return Err(Error::limit(format!(
                "runtime version string of {length} bytes (max {})",
                self.max_version_length
            )));
        }
        Ok(())
    }

    pub(crate) fn check_rows(&self, table: u8, rows: u32) -> Result<()> {
        if rows > self.max_table_rows {
            return Err(Error::limit(format!(
                "table 0x{table:02X} has {rows} rows (max {})",
                self.max_table_rows
            )));
        }
        Ok(())
    }
}

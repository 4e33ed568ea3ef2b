//! CLI header and metadata root parsing
//!
//! The CLI header (ECMA-335 II.25.3.3) points at the metadata root, which
//! starts with the `BSJB` signature, a runtime version string and a list of
//! named streams (`#~`, `#Strings`, `#Blob`, ...).

use crate::limits::ReadLimits;
use crate::pe::DataDirectory;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// Metadata root signature ('BSJB')
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// Size of the CLI header as written by every known compiler
pub const CLI_HEADER_SIZE: u32 = 72;

/// Longest stream name accepted, including the terminator
const MAX_STREAM_NAME: usize = 32;

/// Well-known stream names
pub mod streams {
    /// Compressed table stream
    pub const TABLES: &str = "#~";
    /// Uncompressed (edit-and-continue) table stream
    pub const TABLES_UNCOMPRESSED: &str = "#-";
    /// Identifier string heap
    pub const STRINGS: &str = "#Strings";
    /// Blob heap
    pub const BLOB: &str = "#Blob";
    /// GUID heap
    pub const GUID: &str = "#GUID";
    /// User string heap
    pub const USER_STRINGS: &str = "#US";
}

/// CLI header (`IMAGE_COR20_HEADER`)
#[derive(Debug, Clone)]
pub struct CliHeader {
    /// Size of the header in bytes
    pub cb: u32,
    /// Major runtime version required
    pub major_runtime_version: u16,
    /// Minor runtime version required
    pub minor_runtime_version: u16,
    /// Location of the metadata root
    pub metadata: DataDirectory,
    /// Runtime flags (`COMIMAGE_FLAGS_*`)
    pub flags: u32,
}

impl CliHeader {
    /// Read the CLI header at the given file offset
    pub fn read<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let cb = reader.read_u32::<LittleEndian>()?;
        if cb < 16 {
            return Err(Error::invalid_format(format!("CLI header size {cb} too small")));
        }
        let major_runtime_version = reader.read_u16::<LittleEndian>()?;
        let minor_runtime_version = reader.read_u16::<LittleEndian>()?;
        let metadata = DataDirectory::read(reader)?;
        let flags = reader.read_u32::<LittleEndian>()?;

        if !metadata.is_present() {
            return Err(Error::invalid_format("CLI header has no metadata directory"));
        }

        Ok(Self {
            cb,
            major_runtime_version,
            minor_runtime_version,
            metadata,
            flags,
        })
    }

    /// Whether the image contains only IL (`COMIMAGE_FLAGS_ILONLY`)
    pub fn is_il_only(&self) -> bool {
        self.flags & 0x0000_0001 != 0
    }
}

/// Stream header inside the metadata root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset relative to the metadata root
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// Stream name, e.g. `#Strings`
    pub name: String,
}

/// Absolute location of a stream or heap in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLocation {
    /// File offset of the first byte
    pub offset: u64,
    /// Size in bytes
    pub size: u32,
}

/// Parsed metadata root
#[derive(Debug, Clone)]
pub struct MetadataRoot {
    /// File offset of the `BSJB` signature
    pub offset: u64,
    /// Size of the metadata block according to the CLI header
    pub size: u32,
    /// Metadata format major version
    pub major_version: u16,
    /// Metadata format minor version
    pub minor_version: u16,
    /// Runtime version string, e.g. `v4.0.30319`
    pub version: String,
    /// Stream headers in file order
    pub streams: Vec<StreamHeader>,
}

impl MetadataRoot {
    /// Read the metadata root at `offset`
    pub fn read<R: Read + Seek>(
        reader: &mut R,
        offset: u64,
        size: u32,
        limits: &ReadLimits,
    ) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != METADATA_SIGNATURE {
            return Err(Error::invalid_format(format!(
                "bad metadata signature 0x{signature:08X}"
            )));
        }

        let major_version = reader.read_u16::<LittleEndian>()?;
        let minor_version = reader.read_u16::<LittleEndian>()?;
        let _reserved = reader.read_u32::<LittleEndian>()?;
        let version_length = reader.read_u32::<LittleEndian>()?;
        limits.check_version_length(version_length)?;

        let mut version_bytes = vec![0u8; version_length as usize];
        reader.read_exact(&mut version_bytes)?;
        let end = version_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(version_bytes.len());
        let version = String::from_utf8_lossy(&version_bytes[..end]).into_owned();

        let _flags = reader.read_u16::<LittleEndian>()?;
        let stream_count = reader.read_u16::<LittleEndian>()?;
        limits.check_streams(stream_count)?;

        let mut streams = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            let stream_offset = reader.read_u32::<LittleEndian>()?;
            let stream_size = reader.read_u32::<LittleEndian>()?;
            let name = read_stream_name(reader)?;

            if u64::from(stream_offset) + u64::from(stream_size) > u64::from(size) {
                return Err(Error::invalid_format(format!(
                    "stream {name} extends past the metadata block"
                )));
            }

            streams.push(StreamHeader {
                offset: stream_offset,
                size: stream_size,
                name,
            });
        }

        Ok(Self {
            offset,
            size,
            major_version,
            minor_version,
            version,
            streams,
        })
    }

    /// Find a stream by exact name
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.streams.iter().find(|s| s.name == name)
    }

    /// Absolute location of a stream by name
    pub fn locate(&self, name: &str) -> Option<HeapLocation> {
        self.stream(name).map(|s| HeapLocation {
            offset: self.offset + u64::from(s.offset),
            size: s.size,
        })
    }

    /// Location of the table stream, compressed or not
    pub fn tables_stream(&self) -> Result<HeapLocation> {
        self.locate(streams::TABLES)
            .or_else(|| self.locate(streams::TABLES_UNCOMPRESSED))
            .ok_or(Error::MissingStream(streams::TABLES))
    }
}

/// Stream names are NUL terminated and padded to a four byte boundary.
fn read_stream_name<R: Read>(reader: &mut R) -> Result<String> {
    let mut name = Vec::new();
    loop {
        let mut chunk = [0u8; 4];
        reader.read_exact(&mut chunk)?;
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            name.extend_from_slice(&chunk[..nul]);
            break;
        }
        name.extend_from_slice(&chunk);
        if name.len() >= MAX_STREAM_NAME {
            return Err(Error::invalid_format("unterminated stream name"));
        }
    }
    String::from_utf8(name).map_err(|_| Error::invalid_format("stream name is not ASCII"))
}

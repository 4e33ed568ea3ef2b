//! Deferred access to a managed PE image
//!
//! Opening an image reads only the fixed headers: PE, CLI, metadata root and
//! the table stream header. Rows and heap entries are read on demand, so
//! checking the declared name of a candidate dependency costs a handful of
//! small reads regardless of the assembly's size.

use crate::identity::{AssemblyIdentity, AssemblyReference, Version};
use crate::limits::ReadLimits;
use crate::metadata::{CliHeader, HeapLocation, MetadataRoot, streams};
use crate::pe::PeHeaders;
use crate::tables::{TablesHeader, table};
use crate::{Error, Result};
use byteorder::ReadBytesExt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// A managed PE image with lazily read metadata
#[derive(Debug)]
pub struct AssemblyImage<R> {
    reader: R,
    headers: PeHeaders,
    cli_header: CliHeader,
    metadata: MetadataRoot,
    tables: TablesHeader,
    strings: HeapLocation,
    blobs: Option<HeapLocation>,
    limits: ReadLimits,
}

impl AssemblyImage<BufReader<File>> {
    /// Open an image file, reading only its headers
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_limits(path, ReadLimits::default())
    }

    /// Open an image file with custom read limits
    pub fn open_with_limits<P: AsRef<Path>>(path: P, limits: ReadLimits) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader_with_limits(BufReader::new(file), limits)
    }
}

impl<T: AsRef<[u8]>> AssemblyImage<Cursor<T>> {
    /// Parse an image held in memory
    pub fn from_bytes(data: T) -> Result<Self> {
        Self::from_reader(Cursor::new(data))
    }
}

impl<R: Read + Seek> AssemblyImage<R> {
    /// Parse headers from any seekable reader
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::from_reader_with_limits(reader, ReadLimits::default())
    }

    /// Parse headers from any seekable reader with custom limits
    pub fn from_reader_with_limits(mut reader: R, limits: ReadLimits) -> Result<Self> {
        let headers = PeHeaders::read(&mut reader, &limits)?;
        let cli_directory = headers.cli_header.ok_or(Error::NotManaged)?;
        let cli_offset = headers.rva_to_offset(cli_directory.rva)?;
        let cli_header = CliHeader::read(&mut reader, cli_offset)?;

        let metadata_offset = headers.rva_to_offset(cli_header.metadata.rva)?;
        let metadata =
            MetadataRoot::read(&mut reader, metadata_offset, cli_header.metadata.size, &limits)?;

        let tables = TablesHeader::read(&mut reader, metadata.tables_stream()?, &limits)?;
        let strings = metadata
            .locate(streams::STRINGS)
            .ok_or(Error::MissingStream(streams::STRINGS))?;
        let blobs = metadata.locate(streams::BLOB);
        log::trace!(
            "Metadata {} with {} streams, {} Assembly rows, {} AssemblyRef rows",
            metadata.version,
            metadata.streams.len(),
            tables.row_count(table::ASSEMBLY),
            tables.row_count(table::ASSEMBLY_REF)
        );

        Ok(Self {
            reader,
            headers,
            cli_header,
            metadata,
            tables,
            strings,
            blobs,
            limits,
        })
    }

    /// PE headers
    pub fn headers(&self) -> &PeHeaders {
        &self.headers
    }

    /// CLI header
    pub fn cli_header(&self) -> &CliHeader {
        &self.cli_header
    }

    /// Metadata root
    pub fn metadata(&self) -> &MetadataRoot {
        &self.metadata
    }

    /// Table stream header
    pub fn tables(&self) -> &TablesHeader {
        &self.tables
    }

    /// Runtime version the image was built against
    pub fn runtime_version(&self) -> &str {
        &self.metadata.version
    }

    /// Whether the image declares an assembly manifest
    pub fn has_manifest(&self) -> bool {
        self.tables.row_count(table::ASSEMBLY) > 0
    }

    /// Declared simple name of the assembly
    pub fn name(&mut self) -> Result<String> {
        self.identity().map(|identity| identity.name)
    }

    /// Read the declared identity from the Assembly table
    pub fn identity(&mut self) -> Result<AssemblyIdentity> {
        if !self.has_manifest() {
            return Err(Error::NoAssemblyManifest);
        }

        let rows = self.tables.read_rows(&mut self.reader, table::ASSEMBLY)?;
        let row = rows.first().ok_or(Error::NoAssemblyManifest)?;

        // HashAlgId, Major, Minor, Build, Revision, Flags, PublicKey, Name, Culture
        let version = Version::new(row[1] as u16, row[2] as u16, row[3] as u16, row[4] as u16);
        let flags = row[5];
        let public_key = self.read_blob(row[6])?;
        let name = self.read_string(row[7])?;
        let culture = self.read_culture(row[8])?;

        Ok(AssemblyIdentity {
            name,
            version,
            culture,
            flags,
            public_key,
        })
    }

    /// Read every AssemblyRef row
    pub fn references(&mut self) -> Result<Vec<AssemblyReference>> {
        let rows = self.tables.read_rows(&mut self.reader, table::ASSEMBLY_REF)?;

        rows.iter()
            .map(|row| {
                // Major, Minor, Build, Revision, Flags, PublicKeyOrToken, Name, Culture, HashValue
                Ok(AssemblyReference {
                    name: self.read_string(row[6])?,
                    version: Version::new(
                        row[0] as u16,
                        row[1] as u16,
                        row[2] as u16,
                        row[3] as u16,
                    ),
                    culture: self.read_culture(row[7])?,
                    flags: row[4],
                    public_key_or_token: self.read_blob(row[5])?,
                })
            })
            .collect()
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the whole underlying image into memory
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        self.reader.read_to_end(&mut data)?;
        Ok(data)
    }

    fn read_culture(&mut self, index: u32) -> Result<Option<String>> {
        let culture = self.read_string(index)?;
        Ok(if culture.is_empty() { None } else { Some(culture) })
    }

    /// Read a NUL terminated UTF-8 string from `#Strings`
    fn read_string(&mut self, index: u32) -> Result<String> {
        if index == 0 {
            return Ok(String::new());
        }
        if index >= self.strings.size {
            return Err(Error::invalid_format(format!(
                "#Strings index {index} outside heap of {} bytes",
                self.strings.size
            )));
        }

        let available = (self.strings.size - index) as usize;
        let window = available.min(self.limits.max_string_length + 1);
        let mut buffer = vec![0u8; window];
        self.reader
            .seek(SeekFrom::Start(self.strings.offset + u64::from(index)))?;
        self.reader.read_exact(&mut buffer)?;

        let Some(end) = buffer.iter().position(|&b| b == 0) else {
            return Err(if window < available {
                Error::limit(format!(
                    "string at #Strings offset {index} is longer than {} bytes",
                    self.limits.max_string_length
                ))
            } else {
                Error::invalid_format(format!("unterminated string at #Strings offset {index}"))
            });
        };
        buffer.truncate(end);
        String::from_utf8(buffer).map_err(|_| Error::InvalidUtf8(index))
    }

    /// Read a length-prefixed entry from `#Blob`
    fn read_blob(&mut self, index: u32) -> Result<Vec<u8>> {
        if index == 0 {
            return Ok(Vec::new());
        }
        let heap = self.blobs.ok_or(Error::MissingStream(streams::BLOB))?;
        if index >= heap.size {
            return Err(Error::invalid_format(format!(
                "#Blob index {index} outside heap of {} bytes",
                heap.size
            )));
        }

        self.reader
            .seek(SeekFrom::Start(heap.offset + u64::from(index)))?;
        let (length, prefix) = read_compressed_length(&mut self.reader)?;
        if u64::from(index) + u64::from(prefix) + u64::from(length) > u64::from(heap.size) {
            return Err(Error::invalid_format(format!(
                "blob at #Blob offset {index} overruns the heap"
            )));
        }

        let mut data = vec![0u8; length as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }
}

/// Decode an ECMA-335 compressed unsigned integer, returning the value and
/// the number of bytes it occupied
fn read_compressed_length<R: Read>(reader: &mut R) -> Result<(u32, u32)> {
    let first = reader.read_u8()?;
    if first & 0x80 == 0 {
        return Ok((u32::from(first), 1));
    }
    if first & 0xC0 == 0x80 {
        let second = reader.read_u8()?;
        return Ok(((u32::from(first & 0x3F) << 8) | u32::from(second), 2));
    }
    if first & 0xE0 == 0xC0 {
        let mut rest = [0u8; 3];
        reader.read_exact(&mut rest)?;
        let value = (u32::from(first & 0x1F) << 24)
            | (u32::from(rest[0]) << 16)
            | (u32::from(rest[1]) << 8)
            | u32::from(rest[2]);
        return Ok((value, 4));
    }
    Err(Error::invalid_format(format!(
        "bad compressed length prefix 0x{first:02X}"
    )))
}

//! Builder for minimal managed images
//!
//! The images carry a single `.text` section with a CLI header and a
//! metadata block holding the Module, Assembly and AssemblyRef tables. They
//! contain no types or IL, which is enough for identity probing, reference
//! stubs and tests.

use crate::identity::{AssemblyReference, Version};
use crate::metadata::{CLI_HEADER_SIZE, METADATA_SIGNATURE};
use crate::pe::{DOS_SIGNATURE, PE_SIGNATURE, PE32_MAGIC, PE32_PLUS_MAGIC};
use crate::tables::{HEAP_BLOB_WIDE, HEAP_STRINGS_WIDE, table};
use crate::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs;
use std::path::Path;

const DOS_HEADER_SIZE: usize = 0x80;
const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x2000;
const SECTION_RVA: u32 = 0x2000;
const RUNTIME_VERSION: &str = "v4.0.30319";
const SHA1_ALGORITHM: u32 = 0x8004;

/// Kind of image to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// A `.dll`
    Library,
    /// An `.exe`
    Executable,
}

/// Builder for minimal identity-only images
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    name: String,
    version: Version,
    culture: Option<String>,
    references: Vec<AssemblyReference>,
    kind: ImageKind,
    pe32_plus: bool,
    manifest: bool,
    managed: bool,
}

impl ImageBuilder {
    /// Start a library image declaring `name`
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            version: Version::new(1, 0, 0, 0),
            culture: None,
            references: Vec::new(),
            kind: ImageKind::Library,
            pe32_plus: false,
            manifest: true,
            managed: true,
        }
    }

    /// Set the declared version
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the declared culture
    pub fn culture<S: Into<String>>(mut self, culture: S) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Add an AssemblyRef row
    pub fn reference(mut self, reference: AssemblyReference) -> Self {
        self.references.push(reference);
        self
    }

    /// Set the image kind
    pub fn kind(mut self, kind: ImageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Emit a PE32+ optional header instead of PE32
    pub fn pe32_plus(mut self, enabled: bool) -> Self {
        self.pe32_plus = enabled;
        self
    }

    /// Leave out the Assembly table, producing a bare module
    pub fn without_manifest(mut self) -> Self {
        self.manifest = false;
        self
    }

    /// Leave out the CLI header entirely, producing a native image
    pub fn native(mut self) -> Self {
        self.managed = false;
        self
    }

    /// Build the image bytes
    pub fn build(&self) -> Result<Vec<u8>> {
        let metadata = if self.managed {
            self.build_metadata()?
        } else {
            Vec::new()
        };
        let section_data_size = if self.managed {
            CLI_HEADER_SIZE + to_u32(metadata.len())?
        } else {
            // Keep a non-empty section so the image is still well formed
            16
        };

        let optional_size: u16 = if self.pe32_plus { 240 } else { 224 };
        let section_table_end = DOS_HEADER_SIZE as u32 + 4 + 20 + u32::from(optional_size) + 40;
        let headers_size = align(section_table_end, FILE_ALIGNMENT);
        let raw_size = align(section_data_size, FILE_ALIGNMENT);

        let mut out = Vec::with_capacity((headers_size + raw_size) as usize);

        // DOS header
        out.write_u16::<LittleEndian>(DOS_SIGNATURE)?;
        out.resize(0x3C, 0);
        out.write_u32::<LittleEndian>(DOS_HEADER_SIZE as u32)?;
        out.resize(DOS_HEADER_SIZE, 0);

        // PE signature and COFF header
        let characteristics: u16 = match (self.kind, self.pe32_plus) {
            (ImageKind::Library, false) => 0x2102,
            (ImageKind::Library, true) => 0x2022,
            (ImageKind::Executable, false) => 0x0102,
            (ImageKind::Executable, true) => 0x0022,
        };
        out.write_u32::<LittleEndian>(PE_SIGNATURE)?;
        out.write_u16::<LittleEndian>(if self.pe32_plus { 0x8664 } else { 0x014C })?;
        out.write_u16::<LittleEndian>(1)?; // sections
        out.write_u32::<LittleEndian>(0)?; // timestamp
        out.write_u32::<LittleEndian>(0)?; // symbol table
        out.write_u32::<LittleEndian>(0)?; // symbol count
        out.write_u16::<LittleEndian>(optional_size)?;
        out.write_u16::<LittleEndian>(characteristics)?;

        self.write_optional_header(&mut out, raw_size, headers_size, section_data_size)?;

        // Section table
        out.extend_from_slice(b".text\0\0\0");
        out.write_u32::<LittleEndian>(section_data_size)?;
        out.write_u32::<LittleEndian>(SECTION_RVA)?;
        out.write_u32::<LittleEndian>(raw_size)?;
        out.write_u32::<LittleEndian>(headers_size)?;
        out.write_u32::<LittleEndian>(0)?; // relocations
        out.write_u32::<LittleEndian>(0)?; // line numbers
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0x6000_0020)?; // code | execute | read
        out.resize(headers_size as usize, 0);

        if self.managed {
            // CLI header
            out.write_u32::<LittleEndian>(CLI_HEADER_SIZE)?;
            out.write_u16::<LittleEndian>(2)?;
            out.write_u16::<LittleEndian>(5)?;
            out.write_u32::<LittleEndian>(SECTION_RVA + CLI_HEADER_SIZE)?;
            out.write_u32::<LittleEndian>(to_u32(metadata.len())?)?;
            out.write_u32::<LittleEndian>(0x0000_0001)?; // IL only
            out.write_u32::<LittleEndian>(0)?; // entry point token
            out.resize(headers_size as usize + CLI_HEADER_SIZE as usize, 0);
            out.extend_from_slice(&metadata);
        }
        out.resize((headers_size + raw_size) as usize, 0);

        Ok(out)
    }

    /// Build the image and write it to `path`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = self.build()?;
        fs::write(path, data)?;
        Ok(())
    }

    fn write_optional_header(
        &self,
        out: &mut Vec<u8>,
        code_size: u32,
        headers_size: u32,
        section_data_size: u32,
    ) -> Result<()> {
        out.write_u16::<LittleEndian>(if self.pe32_plus {
            PE32_PLUS_MAGIC
        } else {
            PE32_MAGIC
        })?;
        out.write_u8(8)?; // linker major
        out.write_u8(0)?; // linker minor
        out.write_u32::<LittleEndian>(code_size)?;
        out.write_u32::<LittleEndian>(0)?; // initialized data
        out.write_u32::<LittleEndian>(0)?; // uninitialized data
        out.write_u32::<LittleEndian>(0)?; // entry point
        out.write_u32::<LittleEndian>(SECTION_RVA)?; // base of code
        if self.pe32_plus {
            out.write_u64::<LittleEndian>(0x0040_0000)?;
        } else {
            out.write_u32::<LittleEndian>(0)?; // base of data
            out.write_u32::<LittleEndian>(0x0040_0000)?;
        }
        out.write_u32::<LittleEndian>(SECTION_ALIGNMENT)?;
        out.write_u32::<LittleEndian>(FILE_ALIGNMENT)?;
        for version in [4u16, 0, 0, 0, 4, 0] {
            out.write_u16::<LittleEndian>(version)?;
        }
        out.write_u32::<LittleEndian>(0)?; // win32 version
        out.write_u32::<LittleEndian>(SECTION_RVA + align(section_data_size, SECTION_ALIGNMENT))?;
        out.write_u32::<LittleEndian>(headers_size)?;
        out.write_u32::<LittleEndian>(0)?; // checksum
        out.write_u16::<LittleEndian>(3)?; // console subsystem
        out.write_u16::<LittleEndian>(0x8540)?; // dynamic base, nx, no seh, ts aware
        for size in [0x0010_0000u64, 0x1000, 0x0010_0000, 0x1000] {
            if self.pe32_plus {
                out.write_u64::<LittleEndian>(size)?;
            } else {
                out.write_u32::<LittleEndian>(size as u32)?;
            }
        }
        out.write_u32::<LittleEndian>(0)?; // loader flags
        out.write_u32::<LittleEndian>(16)?;
        for directory in 0..16 {
            if directory == 14 && self.managed {
                out.write_u32::<LittleEndian>(SECTION_RVA)?;
                out.write_u32::<LittleEndian>(CLI_HEADER_SIZE)?;
            } else {
                out.write_u64::<LittleEndian>(0)?;
            }
        }
        Ok(())
    }

    fn build_metadata(&self) -> Result<Vec<u8>> {
        let extension = match self.kind {
            ImageKind::Library => "dll",
            ImageKind::Executable => "exe",
        };

        let mut strings = StringHeap::default();
        let mut blobs = BlobHeap::default();
        let module_name = strings.add(&format!("{}.{extension}", self.name));
        let name = strings.add(&self.name);
        let culture = self.culture.as_deref().map_or(0, |c| strings.add(c));
        let references = self
            .references
            .iter()
            .map(|r| {
                (
                    r,
                    strings.add(&r.name),
                    r.culture.as_deref().map_or(0, |c| strings.add(c)),
                    blobs.add(&r.public_key_or_token),
                )
            })
            .collect::<Vec<_>>();

        let wide_strings = strings.data.len() > 0xFFFF;
        let wide_blobs = blobs.data.len() > 0xFFFF;
        let mut heap_sizes = 0u8;
        if wide_strings {
            heap_sizes |= HEAP_STRINGS_WIDE;
        }
        if wide_blobs {
            heap_sizes |= HEAP_BLOB_WIDE;
        }

        let mut valid = 1u64 << table::MODULE;
        if self.manifest {
            valid |= 1u64 << table::ASSEMBLY;
        }
        if !references.is_empty() {
            valid |= 1u64 << table::ASSEMBLY_REF;
        }

        let mut tables = Vec::new();
        tables.write_u32::<LittleEndian>(0)?;
        tables.write_u8(2)?;
        tables.write_u8(0)?;
        tables.write_u8(heap_sizes)?;
        tables.write_u8(1)?;
        tables.write_u64::<LittleEndian>(valid)?;
        tables.write_u64::<LittleEndian>(0)?;
        tables.write_u32::<LittleEndian>(1)?;
        if self.manifest {
            tables.write_u32::<LittleEndian>(1)?;
        }
        if !references.is_empty() {
            tables.write_u32::<LittleEndian>(to_u32(references.len())?)?;
        }

        // Module
        tables.write_u16::<LittleEndian>(0)?;
        write_index(&mut tables, module_name, wide_strings)?;
        tables.write_u16::<LittleEndian>(1)?; // mvid
        tables.write_u16::<LittleEndian>(0)?;
        tables.write_u16::<LittleEndian>(0)?;

        if self.manifest {
            tables.write_u32::<LittleEndian>(SHA1_ALGORITHM)?;
            write_version(&mut tables, self.version)?;
            tables.write_u32::<LittleEndian>(0)?; // flags
            write_index(&mut tables, 0, wide_blobs)?;
            write_index(&mut tables, name, wide_strings)?;
            write_index(&mut tables, culture, wide_strings)?;
        }

        for (reference, name, culture, token) in references {
            write_version(&mut tables, reference.version)?;
            tables.write_u32::<LittleEndian>(reference.flags)?;
            write_index(&mut tables, token, wide_blobs)?;
            write_index(&mut tables, name, wide_strings)?;
            write_index(&mut tables, culture, wide_strings)?;
            write_index(&mut tables, 0, wide_blobs)?;
        }
        pad4(&mut tables);

        let mut strings = strings.data;
        pad4(&mut strings);
        let mut blobs = blobs.data;
        pad4(&mut blobs);
        let guids = vec![0u8; 16];

        let mut version = RUNTIME_VERSION.as_bytes().to_vec();
        version.push(0);
        pad4(&mut version);

        let streams: [(&str, &[u8]); 4] = [
            ("#~", &tables),
            ("#Strings", &strings),
            ("#GUID", &guids),
            ("#Blob", &blobs),
        ];
        let headers_size: usize = 16
            + version.len()
            + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + padded_name_length(name))
                .sum::<usize>();

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(METADATA_SIGNATURE)?;
        out.write_u16::<LittleEndian>(1)?;
        out.write_u16::<LittleEndian>(1)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(to_u32(version.len())?)?;
        out.extend_from_slice(&version);
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(streams.len() as u16)?;

        let mut offset = headers_size;
        for (name, data) in &streams {
            out.write_u32::<LittleEndian>(to_u32(offset)?)?;
            out.write_u32::<LittleEndian>(to_u32(data.len())?)?;
            out.extend_from_slice(name.as_bytes());
            out.resize(out.len() + padded_name_length(name) - name.len(), 0);
            offset += data.len();
        }
        for (_, data) in &streams {
            out.extend_from_slice(data);
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct StringHeap {
    data: Vec<u8>,
}

impl Default for StringHeap {
    fn default() -> Self {
        Self { data: vec![0] }
    }
}

impl StringHeap {
    fn add(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        let index = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        index
    }
}

#[derive(Debug)]
struct BlobHeap {
    data: Vec<u8>,
}

impl Default for BlobHeap {
    fn default() -> Self {
        Self { data: vec![0] }
    }
}

impl BlobHeap {
    fn add(&mut self, value: &[u8]) -> u32 {
        if value.is_empty() {
            return 0;
        }
        let index = self.data.len() as u32;
        let length = value.len() as u32;
        if length < 0x80 {
            self.data.push(length as u8);
        } else if length < 0x4000 {
            self.data.push(0x80 | (length >> 8) as u8);
            self.data.push(length as u8);
        } else {
            self.data.extend_from_slice(&(0xC000_0000 | length).to_be_bytes());
        }
        self.data.extend_from_slice(value);
        index
    }
}

fn write_index(out: &mut Vec<u8>, value: u32, wide: bool) -> Result<()> {
    if wide {
        out.write_u32::<LittleEndian>(value)?;
    } else {
        out.write_u16::<LittleEndian>(value as u16)?;
    }
    Ok(())
}

fn write_version(out: &mut Vec<u8>, version: Version) -> Result<()> {
    out.write_u16::<LittleEndian>(version.major)?;
    out.write_u16::<LittleEndian>(version.minor)?;
    out.write_u16::<LittleEndian>(version.build)?;
    out.write_u16::<LittleEndian>(version.revision)?;
    Ok(())
}

fn padded_name_length(name: &str) -> usize {
    (name.len() + 1 + 3) & !3
}

fn pad4(data: &mut Vec<u8>) {
    while data.len() % 4 != 0 {
        data.push(0);
    }
}

fn align(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::limit(format!("{value} bytes do not fit an image")))
}

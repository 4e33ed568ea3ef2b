//! PE/COFF header structures and parsing
//!
//! Only the parts of a portable executable needed to find the CLI header are
//! read: the DOS stub pointer, the COFF file header, the optional header's
//! data directory table and the section table used to map RVAs to file
//! offsets.

use crate::limits::ReadLimits;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read, Seek, SeekFrom};

/// DOS header signature ('MZ')
pub const DOS_SIGNATURE: u16 = 0x5A4D;

/// Offset of `e_lfanew` inside the DOS header
pub const DOS_PE_POINTER_OFFSET: u64 = 0x3C;

/// PE header signature ('PE\0\0')
pub const PE_SIGNATURE: u32 = 0x0000_4550;

/// Optional header magic for PE32 images
pub const PE32_MAGIC: u16 = 0x010B;

/// Optional header magic for PE32+ images
pub const PE32_PLUS_MAGIC: u16 = 0x020B;

/// Index of the CLI header in the data directory table
pub const CLI_HEADER_DIRECTORY: u32 = 14;

/// Size of the COFF file header
pub const COFF_HEADER_SIZE: u64 = 20;

/// Size of one section table entry
pub const SECTION_HEADER_SIZE: u64 = 40;

/// COFF characteristics flag marking a DLL
pub const IMAGE_FILE_DLL: u16 = 0x2000;

/// RVA and size pair from the data directory table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    /// Relative virtual address
    pub rva: u32,
    /// Size in bytes
    pub size: u32,
}

impl DataDirectory {
    /// Read a directory entry from the current position
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            rva: reader.read_u32::<LittleEndian>()?,
            size: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Whether the directory points anywhere
    pub fn is_present(&self) -> bool {
        self.rva != 0 && self.size != 0
    }
}

/// Section table entry
#[derive(Debug, Clone)]
pub struct SectionHeader {
    /// Raw section name, NUL padded
    pub name: [u8; 8],
    /// Size of the section once loaded
    pub virtual_size: u32,
    /// RVA of the first byte of the section
    pub virtual_address: u32,
    /// Size of the initialized data on disk
    pub size_of_raw_data: u32,
    /// File offset of the section data
    pub pointer_to_raw_data: u32,
    /// Section flags
    pub characteristics: u32,
}

impl SectionHeader {
    fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut name = [0u8; 8];
        reader.read_exact(&mut name)?;
        let virtual_size = reader.read_u32::<LittleEndian>()?;
        let virtual_address = reader.read_u32::<LittleEndian>()?;
        let size_of_raw_data = reader.read_u32::<LittleEndian>()?;
        let pointer_to_raw_data = reader.read_u32::<LittleEndian>()?;
        // Relocation and line number pointers/counts are irrelevant for images
        let mut skipped = [0u8; 12];
        reader.read_exact(&mut skipped)?;
        let characteristics = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            name,
            virtual_size,
            virtual_address,
            size_of_raw_data,
            pointer_to_raw_data,
            characteristics,
        })
    }

    /// Section name with the NUL padding removed
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Whether `rva` falls inside this section
    pub fn contains(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && u64::from(rva) < u64::from(self.virtual_address) + u64::from(extent)
    }
}

/// The subset of PE headers needed to reach CLI metadata
#[derive(Debug, Clone)]
pub struct PeHeaders {
    /// File offset of the PE signature
    pub pe_offset: u32,
    /// Target machine
    pub machine: u16,
    /// COFF characteristics flags
    pub characteristics: u16,
    /// True for PE32+ (64-bit) optional headers
    pub pe32_plus: bool,
    /// The CLI header directory, if the image is managed
    pub cli_header: Option<DataDirectory>,
    /// Section table
    pub sections: Vec<SectionHeader>,
}

impl PeHeaders {
    /// Read PE headers from the start of the stream
    pub fn read<R: Read + Seek>(reader: &mut R, limits: &ReadLimits) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let dos_signature = reader
            .read_u16::<LittleEndian>()
            .map_err(|e| eof_as_not_pe(e, "file too small for a DOS header"))?;
        if dos_signature != DOS_SIGNATURE {
            return Err(Error::not_pe("missing MZ signature"));
        }

        reader.seek(SeekFrom::Start(DOS_PE_POINTER_OFFSET))?;
        let pe_offset = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| eof_as_not_pe(e, "truncated DOS header"))?;

        reader.seek(SeekFrom::Start(u64::from(pe_offset)))?;
        let signature = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| eof_as_not_pe(e, "PE header pointer past end of file"))?;
        if signature != PE_SIGNATURE {
            return Err(Error::not_pe(format!(
                "missing PE signature at offset 0x{pe_offset:X}"
            )));
        }

        // COFF file header
        let machine = reader.read_u16::<LittleEndian>()?;
        let number_of_sections = reader.read_u16::<LittleEndian>()?;
        let _time_date_stamp = reader.read_u32::<LittleEndian>()?;
        let _pointer_to_symbol_table = reader.read_u32::<LittleEndian>()?;
        let _number_of_symbols = reader.read_u32::<LittleEndian>()?;
        let size_of_optional_header = reader.read_u16::<LittleEndian>()?;
        let characteristics = reader.read_u16::<LittleEndian>()?;

        limits.check_sections(number_of_sections)?;

        let optional_start = u64::from(pe_offset) + 4 + COFF_HEADER_SIZE;
        let magic = reader.read_u16::<LittleEndian>()?;
        let (pe32_plus, rva_count_offset) = match magic {
            PE32_MAGIC => (false, 92u64),
            PE32_PLUS_MAGIC => (true, 108u64),
            other => {
                return Err(Error::invalid_format(format!(
                    "unknown optional header magic 0x{other:04X}"
                )));
            }
        };

        let optional_size = u64::from(size_of_optional_header);
        if optional_size < rva_count_offset + 4 {
            return Err(Error::invalid_format(format!(
                "optional header of {optional_size} bytes is too small"
            )));
        }

        reader.seek(SeekFrom::Start(optional_start + rva_count_offset))?;
        let number_of_rva_and_sizes = reader.read_u32::<LittleEndian>()?;
        let directories_start = rva_count_offset + 4;
        let cli_entry_end = directories_start + u64::from(CLI_HEADER_DIRECTORY + 1) * 8;

        let cli_header = if number_of_rva_and_sizes > CLI_HEADER_DIRECTORY
            && optional_size >= cli_entry_end
        {
            reader.seek(SeekFrom::Start(
                optional_start + directories_start + u64::from(CLI_HEADER_DIRECTORY) * 8,
            ))?;
            Some(DataDirectory::read(reader)?).filter(DataDirectory::is_present)
        } else {
            None
        };

        reader.seek(SeekFrom::Start(optional_start + optional_size))?;
        let sections = (0..number_of_sections)
            .map(|_| SectionHeader::read(reader))
            .collect::<Result<Vec<_>>>()?;

        log::trace!(
            "PE headers: machine=0x{machine:04X} sections={} pe32+={pe32_plus} cli={cli_header:?}",
            sections.len()
        );

        Ok(Self {
            pe_offset,
            machine,
            characteristics,
            pe32_plus,
            cli_header,
            sections,
        })
    }

    /// Whether the COFF header marks this image as a DLL
    pub fn is_dll(&self) -> bool {
        self.characteristics & IMAGE_FILE_DLL != 0
    }

    /// Map a relative virtual address to a file offset
    pub fn rva_to_offset(&self, rva: u32) -> Result<u64> {
        self.sections
            .iter()
            .find(|section| section.contains(rva))
            .map(|section| {
                u64::from(rva - section.virtual_address) + u64::from(section.pointer_to_raw_data)
            })
            .ok_or_else(|| Error::invalid_format(format!("RVA 0x{rva:08X} is not in any section")))
    }
}

fn eof_as_not_pe(err: io::Error, msg: &str) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::not_pe(msg)
    } else {
        Error::Io(err)
    }
}

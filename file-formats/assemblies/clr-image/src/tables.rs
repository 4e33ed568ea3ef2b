//! Metadata table stream header and row layout
//!
//! Rows of the `#~` stream are packed back to back, table after table, in
//! table id order. Their widths depend on the heap size flags and on the
//! row counts of other tables (simple and coded indexes), so locating the
//! Assembly or AssemblyRef table means computing the row size of every table
//! that precedes it (ECMA-335 II.22 and II.24.2.6).

use crate::limits::ReadLimits;
use crate::metadata::HeapLocation;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// Number of table ids addressable by the valid mask
pub const TABLE_COUNT: usize = 64;

/// Table identifiers
pub mod table {
    #![allow(missing_docs)]
    pub const MODULE: u8 = 0x00;
    pub const TYPE_REF: u8 = 0x01;
    pub const TYPE_DEF: u8 = 0x02;
    pub const FIELD_PTR: u8 = 0x03;
    pub const FIELD: u8 = 0x04;
    pub const METHOD_PTR: u8 = 0x05;
    pub const METHOD_DEF: u8 = 0x06;
    pub const PARAM_PTR: u8 = 0x07;
    pub const PARAM: u8 = 0x08;
    pub const INTERFACE_IMPL: u8 = 0x09;
    pub const MEMBER_REF: u8 = 0x0A;
    pub const CONSTANT: u8 = 0x0B;
    pub const CUSTOM_ATTRIBUTE: u8 = 0x0C;
    pub const FIELD_MARSHAL: u8 = 0x0D;
    pub const DECL_SECURITY: u8 = 0x0E;
    pub const CLASS_LAYOUT: u8 = 0x0F;
    pub const FIELD_LAYOUT: u8 = 0x10;
    pub const STAND_ALONE_SIG: u8 = 0x11;
    pub const EVENT_MAP: u8 = 0x12;
    pub const EVENT_PTR: u8 = 0x13;
    pub const EVENT: u8 = 0x14;
    pub const PROPERTY_MAP: u8 = 0x15;
    pub const PROPERTY_PTR: u8 = 0x16;
    pub const PROPERTY: u8 = 0x17;
    pub const METHOD_SEMANTICS: u8 = 0x18;
    pub const METHOD_IMPL: u8 = 0x19;
    pub const MODULE_REF: u8 = 0x1A;
    pub const TYPE_SPEC: u8 = 0x1B;
    pub const IMPL_MAP: u8 = 0x1C;
    pub const FIELD_RVA: u8 = 0x1D;
    pub const ENC_LOG: u8 = 0x1E;
    pub const ENC_MAP: u8 = 0x1F;
    pub const ASSEMBLY: u8 = 0x20;
    pub const ASSEMBLY_PROCESSOR: u8 = 0x21;
    pub const ASSEMBLY_OS: u8 = 0x22;
    pub const ASSEMBLY_REF: u8 = 0x23;
    pub const ASSEMBLY_REF_PROCESSOR: u8 = 0x24;
    pub const ASSEMBLY_REF_OS: u8 = 0x25;
    pub const FILE: u8 = 0x26;
    pub const EXPORTED_TYPE: u8 = 0x27;
    pub const MANIFEST_RESOURCE: u8 = 0x28;
    pub const NESTED_CLASS: u8 = 0x29;
    pub const GENERIC_PARAM: u8 = 0x2A;
    pub const METHOD_SPEC: u8 = 0x2B;
    pub const GENERIC_PARAM_CONSTRAINT: u8 = 0x2C;
}

/// Heap size flag: `#Strings` indexes are 4 bytes wide
pub const HEAP_STRINGS_WIDE: u8 = 0x01;
/// Heap size flag: `#GUID` indexes are 4 bytes wide
pub const HEAP_GUID_WIDE: u8 = 0x02;
/// Heap size flag: `#Blob` indexes are 4 bytes wide
pub const HEAP_BLOB_WIDE: u8 = 0x04;
/// Heap size flag: an extra dword follows the row counts
pub const HEAP_EXTRA_DATA: u8 = 0x40;

/// Marks an unused slot of a coded index
const UNUSED: u8 = 0xFF;

/// Coded index kinds (ECMA-335 II.24.2.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedIndex {
    /// TypeDef, TypeRef, TypeSpec
    TypeDefOrRef,
    /// Field, Param, Property
    HasConstant,
    /// Anything that can carry a custom attribute
    HasCustomAttribute,
    /// Field, Param
    HasFieldMarshal,
    /// TypeDef, MethodDef, Assembly
    HasDeclSecurity,
    /// TypeDef, TypeRef, ModuleRef, MethodDef, TypeSpec
    MemberRefParent,
    /// Event, Property
    HasSemantics,
    /// MethodDef, MemberRef
    MethodDefOrRef,
    /// Field, MethodDef
    MemberForwarded,
    /// File, AssemblyRef, ExportedType
    Implementation,
    /// MethodDef, MemberRef (three unused slots)
    CustomAttributeType,
    /// Module, ModuleRef, AssemblyRef, TypeRef
    ResolutionScope,
    /// TypeDef, MethodDef
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Tables addressed by this coded index, in tag order
    pub fn tables(self) -> &'static [u8] {
        use table::*;
        match self {
            CodedIndex::TypeDefOrRef => &[TYPE_DEF, TYPE_REF, TYPE_SPEC],
            CodedIndex::HasConstant => &[FIELD, PARAM, PROPERTY],
            CodedIndex::HasCustomAttribute => &[
                METHOD_DEF,
                FIELD,
                TYPE_REF,
                TYPE_DEF,
                PARAM,
                INTERFACE_IMPL,
                MEMBER_REF,
                MODULE,
                DECL_SECURITY,
                PROPERTY,
                EVENT,
                STAND_ALONE_SIG,
                MODULE_REF,
                TYPE_SPEC,
                ASSEMBLY,
                ASSEMBLY_REF,
                FILE,
                EXPORTED_TYPE,
                MANIFEST_RESOURCE,
                GENERIC_PARAM,
                GENERIC_PARAM_CONSTRAINT,
                METHOD_SPEC,
            ],
            CodedIndex::HasFieldMarshal => &[FIELD, PARAM],
            CodedIndex::HasDeclSecurity => &[TYPE_DEF, METHOD_DEF, ASSEMBLY],
            CodedIndex::MemberRefParent => &[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC],
            CodedIndex::HasSemantics => &[EVENT, PROPERTY],
            CodedIndex::MethodDefOrRef => &[METHOD_DEF, MEMBER_REF],
            CodedIndex::MemberForwarded => &[FIELD, METHOD_DEF],
            CodedIndex::Implementation => &[FILE, ASSEMBLY_REF, EXPORTED_TYPE],
            CodedIndex::CustomAttributeType => &[UNUSED, UNUSED, METHOD_DEF, MEMBER_REF, UNUSED],
            CodedIndex::ResolutionScope => &[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF],
            CodedIndex::TypeOrMethodDef => &[TYPE_DEF, METHOD_DEF],
        }
    }

    /// Number of low bits used for the tag
    pub fn tag_bits(self) -> u32 {
        let slots = self.tables().len() as u32;
        u32::BITS - (slots - 1).leading_zeros()
    }
}

/// Column kinds used to describe a table row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Fixed width constant (bytes)
    Fixed(u8),
    /// Index into `#Strings`
    Strings,
    /// Index into `#GUID`
    Guid,
    /// Index into `#Blob`
    Blob,
    /// Simple index into another table
    Table(u8),
    /// Coded index
    Coded(CodedIndex),
}

/// Row schema of a table, or `None` for ids this reader does not know
pub fn schema(id: u8) -> Option<&'static [Column]> {
    use Column::{Blob, Coded, Fixed, Guid, Strings, Table};
    use CodedIndex as C;
    use table::*;

    let columns: &'static [Column] = match id {
        MODULE => &[Fixed(2), Strings, Guid, Guid, Guid],
        TYPE_REF => &[Coded(C::ResolutionScope), Strings, Strings],
        TYPE_DEF => &[
            Fixed(4),
            Strings,
            Strings,
            Coded(C::TypeDefOrRef),
            Table(FIELD),
            Table(METHOD_DEF),
        ],
        FIELD_PTR => &[Table(FIELD)],
        FIELD => &[Fixed(2), Strings, Blob],
        METHOD_PTR => &[Table(METHOD_DEF)],
        METHOD_DEF => &[Fixed(4), Fixed(2), Fixed(2), Strings, Blob, Table(PARAM)],
        PARAM_PTR => &[Table(PARAM)],
        PARAM => &[Fixed(2), Fixed(2), Strings],
        INTERFACE_IMPL => &[Table(TYPE_DEF), Coded(C::TypeDefOrRef)],
        MEMBER_REF => &[Coded(C::MemberRefParent), Strings, Blob],
        CONSTANT => &[Fixed(2), Coded(C::HasConstant), Blob],
        CUSTOM_ATTRIBUTE => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        FIELD_MARSHAL => &[Coded(C::HasFieldMarshal), Blob],
        DECL_SECURITY => &[Fixed(2), Coded(C::HasDeclSecurity), Blob],
        CLASS_LAYOUT => &[Fixed(2), Fixed(4), Table(TYPE_DEF)],
        FIELD_LAYOUT => &[Fixed(4), Table(FIELD)],
        STAND_ALONE_SIG => &[Blob],
        EVENT_MAP => &[Table(TYPE_DEF), Table(EVENT)],
        EVENT_PTR => &[Table(EVENT)],
        EVENT => &[Fixed(2), Strings, Coded(C::TypeDefOrRef)],
        PROPERTY_MAP => &[Table(TYPE_DEF), Table(PROPERTY)],
        PROPERTY_PTR => &[Table(PROPERTY)],
        PROPERTY => &[Fixed(2), Strings, Blob],
        METHOD_SEMANTICS => &[Fixed(2), Table(METHOD_DEF), Coded(C::HasSemantics)],
        METHOD_IMPL => &[
            Table(TYPE_DEF),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        MODULE_REF => &[Strings],
        TYPE_SPEC => &[Blob],
        IMPL_MAP => &[
            Fixed(2),
            Coded(C::MemberForwarded),
            Strings,
            Table(MODULE_REF),
        ],
        FIELD_RVA => &[Fixed(4), Table(FIELD)],
        ENC_LOG => &[Fixed(4), Fixed(4)],
        ENC_MAP => &[Fixed(4)],
        ASSEMBLY => &[
            Fixed(4),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(4),
            Blob,
            Strings,
            Strings,
        ],
        ASSEMBLY_PROCESSOR => &[Fixed(4)],
        ASSEMBLY_OS => &[Fixed(4), Fixed(4), Fixed(4)],
        ASSEMBLY_REF => &[
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(4),
            Blob,
            Strings,
            Strings,
            Blob,
        ],
        ASSEMBLY_REF_PROCESSOR => &[Fixed(4), Table(ASSEMBLY_REF)],
        ASSEMBLY_REF_OS => &[Fixed(4), Fixed(4), Fixed(4), Table(ASSEMBLY_REF)],
        FILE => &[Fixed(4), Strings, Blob],
        EXPORTED_TYPE => &[
            Fixed(4),
            Fixed(4),
            Strings,
            Strings,
            Coded(C::Implementation),
        ],
        MANIFEST_RESOURCE => &[Fixed(4), Fixed(4), Strings, Coded(C::Implementation)],
        NESTED_CLASS => &[Table(TYPE_DEF), Table(TYPE_DEF)],
        GENERIC_PARAM => &[Fixed(2), Fixed(2), Coded(C::TypeOrMethodDef), Strings],
        METHOD_SPEC => &[Coded(C::MethodDefOrRef), Blob],
        GENERIC_PARAM_CONSTRAINT => &[Table(GENERIC_PARAM), Coded(C::TypeDefOrRef)],
        _ => return None,
    };
    Some(columns)
}

/// Header of the `#~` stream plus the derived layout information
#[derive(Debug, Clone)]
pub struct TablesHeader {
    /// Table schema major version
    pub major_version: u8,
    /// Table schema minor version
    pub minor_version: u8,
    /// Heap size flags
    pub heap_sizes: u8,
    /// Bit mask of present tables
    pub valid: u64,
    /// Bit mask of sorted tables
    pub sorted: u64,
    /// Row count per table id (zero for absent tables)
    pub rows: [u32; TABLE_COUNT],
    /// File offset of the first row of the first present table
    pub data_offset: u64,
}

impl TablesHeader {
    /// Read the table stream header located at `stream`
    pub fn read<R: Read + Seek>(
        reader: &mut R,
        stream: HeapLocation,
        limits: &ReadLimits,
    ) -> Result<Self> {
        reader.seek(SeekFrom::Start(stream.offset))?;
        let _reserved = reader.read_u32::<LittleEndian>()?;
        let major_version = reader.read_u8()?;
        let minor_version = reader.read_u8()?;
        let heap_sizes = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let valid = reader.read_u64::<LittleEndian>()?;
        let sorted = reader.read_u64::<LittleEndian>()?;

        let mut rows = [0u32; TABLE_COUNT];
        for (id, count) in rows.iter_mut().enumerate() {
            if valid & (1u64 << id) != 0 {
                let value = reader.read_u32::<LittleEndian>()?;
                limits.check_rows(id as u8, value)?;
                *count = value;
            }
        }

        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            let _extra = reader.read_u32::<LittleEndian>()?;
        }

        let data_offset = reader.stream_position()?;
        if data_offset > stream.offset + u64::from(stream.size) {
            return Err(Error::invalid_format("table stream header overruns stream"));
        }

        Ok(Self {
            major_version,
            minor_version,
            heap_sizes,
            valid,
            sorted,
            rows,
            data_offset,
        })
    }

    /// Whether a table is present in the stream
    pub fn is_present(&self, id: u8) -> bool {
        (id as usize) < TABLE_COUNT && self.valid & (1u64 << id) != 0
    }

    /// Row count of a table (zero when absent or out of range)
    pub fn row_count(&self, id: u8) -> u32 {
        self.rows.get(id as usize).copied().unwrap_or(0)
    }

    /// Width of a `#Strings` index
    pub fn strings_index_size(&self) -> u8 {
        if self.heap_sizes & HEAP_STRINGS_WIDE != 0 { 4 } else { 2 }
    }

    /// Width of a `#GUID` index
    pub fn guid_index_size(&self) -> u8 {
        if self.heap_sizes & HEAP_GUID_WIDE != 0 { 4 } else { 2 }
    }

    /// Width of a `#Blob` index
    pub fn blob_index_size(&self) -> u8 {
        if self.heap_sizes & HEAP_BLOB_WIDE != 0 { 4 } else { 2 }
    }

    /// Width of a simple index into table `id`
    pub fn table_index_size(&self, id: u8) -> u8 {
        if self.row_count(id) < 0x1_0000 { 2 } else { 4 }
    }

    /// Width of a coded index
    pub fn coded_index_size(&self, coded: CodedIndex) -> u8 {
        let max_rows = coded
            .tables()
            .iter()
            .map(|&id| self.row_count(id))
            .max()
            .unwrap_or(0);
        if max_rows < (1u32 << (16 - coded.tag_bits())) { 2 } else { 4 }
    }

    /// Width of a single column
    pub fn column_size(&self, column: Column) -> u8 {
        match column {
            Column::Fixed(width) => width,
            Column::Strings => self.strings_index_size(),
            Column::Guid => self.guid_index_size(),
            Column::Blob => self.blob_index_size(),
            Column::Table(id) => self.table_index_size(id),
            Column::Coded(coded) => self.coded_index_size(coded),
        }
    }

    /// Size in bytes of one row of table `id`
    pub fn row_size(&self, id: u8) -> Result<u32> {
        let columns = schema(id).ok_or(Error::UnsupportedTable(id))?;
        Ok(columns.iter().map(|&c| u32::from(self.column_size(c))).sum())
    }

    /// File offset of the first row of table `id`
    pub fn table_offset(&self, id: u8) -> Result<u64> {
        let mut offset = self.data_offset;
        for preceding in 0..id {
            if !self.is_present(preceding) {
                continue;
            }
            let row_size = self.row_size(preceding)?;
            offset += u64::from(row_size) * u64::from(self.row_count(preceding));
        }
        Ok(offset)
    }

    /// Read every row of table `id` as raw column values
    pub fn read_rows<R: Read + Seek>(&self, reader: &mut R, id: u8) -> Result<Vec<Vec<u32>>> {
        let count = self.row_count(id);
        if count == 0 {
            return Ok(Vec::new());
        }
        let columns = schema(id).ok_or(Error::UnsupportedTable(id))?;
        reader.seek(SeekFrom::Start(self.table_offset(id)?))?;

        let mut rows = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let row = columns
                .iter()
                .map(|&column| read_value(reader, self.column_size(column)))
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        Ok(rows)
    }
}

fn read_value<R: Read>(reader: &mut R, width: u8) -> Result<u32> {
    Ok(match width {
        1 => u32::from(reader.read_u8()?),
        2 => u32::from(reader.read_u16::<LittleEndian>()?),
        4 => reader.read_u32::<LittleEndian>()?,
        other => {
            return Err(Error::invalid_format(format!("unsupported column width {other}")));
        }
    })
}

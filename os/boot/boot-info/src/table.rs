//! # Handoff Tables
//!
//! Binary tables handed to the next boot stage. Every table starts with a
//! [`TableHeader`]; its `length` covers the header and the payload. Tables are
//! laid out back to back, each starting on an 8-byte boundary.

use bytemuck::{Pod, Zeroable};
use core::fmt;

/// Four ASCII bytes identifying a table, packed big-endian into a `u32`.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct TableId(u32);

impl TableId {
    /// The physical memory map.
    pub const MEMORY_MAP: Self = Self::from_ascii(*b"MMAP");

    #[inline]
    #[must_use]
    pub const fn from_ascii(tag: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(tag))
    }

    #[inline]
    #[must_use]
    pub const fn to_ascii(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_ascii() {
            let c = if b.is_ascii_graphic() { char::from(b) } else { '?' };
            fmt::Write::write_char(f, c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId(\"{self}\")")
    }
}

/// Common header of every handoff table.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct TableHeader {
    pub id: TableId,
    /// Total table length in bytes, header included.
    pub length: u32,
}

impl TableHeader {
    #[must_use]
    pub const fn new(id: TableId, length: u32) -> Self {
        Self { id, length }
    }

    /// Offset of the table following this one, relative to this header.
    #[must_use]
    pub const fn next_table_offset(&self) -> usize {
        (self.length as usize + 7) & !7
    }
}

/// One memory map entry as seen by the next stage.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MemoryMapEntry {
    /// Memory type code (UEFI numbering).
    pub ty: u32,
    pub physical_start: u64,
    pub virtual_start: u64,
    pub size: u64,
    pub attributes: u64,
}

pub const TABLE_HEADER_LEN: usize = size_of::<TableHeader>();
pub const MEMORY_MAP_ENTRY_LEN: usize = size_of::<MemoryMapEntry>();

const _: () = {
    assert!(TABLE_HEADER_LEN == 8);
    assert!(MEMORY_MAP_ENTRY_LEN == 36);
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table truncated: {needed} bytes needed, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("unexpected table {found}, expected {expected}")]
    UnexpectedId { expected: TableId, found: TableId },
    #[error("table length {0} does not hold a whole number of entries")]
    RaggedLength(u32),
}

/// Reads the header at the start of `bytes`.
///
/// # Errors
/// [`TableError::Truncated`] if `bytes` is shorter than a header or than the
/// length the header announces.
pub fn read_header(bytes: &[u8]) -> Result<TableHeader, TableError> {
    let raw = bytes.get(..TABLE_HEADER_LEN).ok_or(TableError::Truncated {
        needed: TABLE_HEADER_LEN,
        available: bytes.len(),
    })?;
    let header: TableHeader = bytemuck::pod_read_unaligned(raw);
    let length = header.length as usize;
    if length < TABLE_HEADER_LEN || length > bytes.len() {
        return Err(TableError::Truncated {
            needed: length.max(TABLE_HEADER_LEN),
            available: bytes.len(),
        });
    }
    Ok(header)
}

/// A borrowed view of a memory map table.
#[derive(Debug, Copy, Clone)]
pub struct MemoryMapTable<'a> {
    header: TableHeader,
    entries: &'a [MemoryMapEntry],
}

impl<'a> MemoryMapTable<'a> {
    /// Parses a memory map table at the start of `bytes`.
    ///
    /// # Errors
    /// Fails if the header is truncated, names another table, or its length
    /// leaves a partial entry.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, TableError> {
        let header = read_header(bytes)?;
        let id = header.id;
        if id != TableId::MEMORY_MAP {
            return Err(TableError::UnexpectedId {
                expected: TableId::MEMORY_MAP,
                found: id,
            });
        }

        let body = &bytes[TABLE_HEADER_LEN..header.length as usize];
        let entries = bytemuck::try_cast_slice(body)
            .map_err(|_| TableError::RaggedLength(header.length))?;
        Ok(Self { header, entries })
    }

    #[must_use]
    pub const fn header(&self) -> TableHeader {
        self.header
    }

    #[must_use]
    pub const fn entries(&self) -> &'a [MemoryMapEntry] {
        self.entries
    }
}

/// Iterates over back-to-back tables in a handoff blob.
///
/// Yields each header together with the full table bytes (header included).
/// Iteration stops at the first malformed header.
pub struct Tables<'a> {
    rest: &'a [u8],
}

impl<'a> Tables<'a> {
    #[must_use]
    pub const fn new(blob: &'a [u8]) -> Self {
        Self { rest: blob }
    }
}

impl<'a> Iterator for Tables<'a> {
    type Item = (TableHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let header = read_header(self.rest).ok()?;
        let table = &self.rest[..header.length as usize];
        let next = header.next_table_offset().min(self.rest.len());
        self.rest = &self.rest[next..];
        Some((header, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_bytes(id: TableId, entries: &[MemoryMapEntry]) -> Vec<u8> {
        let length = TABLE_HEADER_LEN + entries.len() * MEMORY_MAP_ENTRY_LEN;
        let header = TableHeader::new(id, u32::try_from(length).unwrap());
        let mut bytes = bytemuck::bytes_of(&header).to_vec();
        bytes.extend_from_slice(bytemuck::cast_slice(entries));
        bytes
    }

    #[test]
    fn memory_map_id_is_big_endian_ascii() {
        assert_eq!(TableId::MEMORY_MAP.as_u32(), 0x4D4D_4150);
        assert_eq!(TableId::MEMORY_MAP.to_ascii(), *b"MMAP");
        assert_eq!(format!("{}", TableId::MEMORY_MAP), "MMAP");
    }

    #[test]
    fn next_table_is_eight_byte_aligned() {
        assert_eq!(TableHeader::new(TableId::MEMORY_MAP, 8).next_table_offset(), 8);
        assert_eq!(TableHeader::new(TableId::MEMORY_MAP, 44).next_table_offset(), 48);
        assert_eq!(TableHeader::new(TableId::MEMORY_MAP, 80).next_table_offset(), 80);
    }

    #[test]
    fn parses_memory_map_table() {
        let entries = [
            MemoryMapEntry {
                ty: 7,
                physical_start: 0,
                virtual_start: 0,
                size: 0x9_F000,
                attributes: 1,
            },
            MemoryMapEntry {
                ty: 8,
                physical_start: 0x9_F000,
                virtual_start: 0,
                size: 0x1000,
                attributes: 0,
            },
        ];
        let bytes = table_bytes(TableId::MEMORY_MAP, &entries);
        let table = MemoryMapTable::parse(&bytes).unwrap();
        assert_eq!({ table.header().length }, 8 + 2 * 36);
        assert_eq!(table.entries(), &entries);
    }

    #[test]
    fn rejects_foreign_and_truncated_tables() {
        let bytes = table_bytes(TableId::from_ascii(*b"ACPI"), &[]);
        assert!(matches!(
            MemoryMapTable::parse(&bytes),
            Err(TableError::UnexpectedId { .. })
        ));

        let bytes = table_bytes(TableId::MEMORY_MAP, &[MemoryMapEntry::default()]);
        assert_eq!(
            MemoryMapTable::parse(&bytes[..20]).unwrap_err(),
            TableError::Truncated {
                needed: 44,
                available: 20
            }
        );

        let mut bytes = table_bytes(TableId::MEMORY_MAP, &[MemoryMapEntry::default()]);
        bytes[4] = 40;
        assert_eq!(
            MemoryMapTable::parse(&bytes).unwrap_err(),
            TableError::RaggedLength(40)
        );
    }

    #[test]
    fn walks_chained_tables() {
        let mut blob = table_bytes(TableId::MEMORY_MAP, &[MemoryMapEntry::default()]);
        blob.resize(48, 0);
        blob.extend(table_bytes(TableId::from_ascii(*b"BOOT"), &[]));

        let ids: Vec<_> = Tables::new(&blob).map(|(h, _)| h.id).collect();
        assert_eq!(ids, [TableId::MEMORY_MAP, TableId::from_ascii(*b"BOOT")]);
    }
}

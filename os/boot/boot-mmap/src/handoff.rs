//! # Memory Map Handoff
//!
//! Serializes the map into the `MMAP` table passed to the next boot stage.
//! The caller snapshots the map, sizes its buffer and writes the table with
//! the snapshot's key; if the map changed in between (for example because
//! the buffer itself was allocated from it) the write is refused and the
//! caller starts over.

use crate::map::{MapKey, MemoryMap};
use crate::phys_mapper::PhysMapper;
use crate::region::MemoryRegion;
use boot_info::table::{
    MEMORY_MAP_ENTRY_LEN, MemoryMapEntry, TABLE_HEADER_LEN, TableHeader, TableId,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    #[error("memory map changed since snapshot {expected} (now {current})")]
    StaleKey { expected: MapKey, current: MapKey },
    #[error("handoff buffer holds {available} bytes, {needed} required")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("memory map table of {0} bytes exceeds the table length field")]
    TooLarge(usize),
}

impl From<MemoryRegion> for MemoryMapEntry {
    fn from(region: MemoryRegion) -> Self {
        Self {
            ty: region.ty.as_raw(),
            physical_start: region.start.as_u64(),
            virtual_start: 0,
            size: region.size,
            attributes: region.attributes.bits(),
        }
    }
}

impl<M: PhysMapper, const SLOTS: usize> MemoryMap<M, SLOTS> {
    /// Bytes needed for the memory map table, header included.
    #[must_use]
    pub const fn table_len(&self) -> usize {
        TABLE_HEADER_LEN + self.len() * MEMORY_MAP_ENTRY_LEN
    }

    /// Writes the memory map table to the start of `buf`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    /// [`HandoffError::StaleKey`] if the map changed since `key` was taken,
    /// [`HandoffError::BufferTooSmall`] if `buf` cannot hold the table.
    pub fn write_table(&self, key: MapKey, buf: &mut [u8]) -> Result<usize, HandoffError> {
        if key != self.key() {
            return Err(HandoffError::StaleKey {
                expected: key,
                current: self.key(),
            });
        }

        let needed = self.table_len();
        if buf.len() < needed {
            return Err(HandoffError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        let length = u32::try_from(needed).map_err(|_| HandoffError::TooLarge(needed))?;

        let (header, body) = buf[..needed].split_at_mut(TABLE_HEADER_LEN);
        header.copy_from_slice(bytemuck::bytes_of(&TableHeader::new(
            TableId::MEMORY_MAP,
            length,
        )));
        for (chunk, region) in body.chunks_exact_mut(MEMORY_MAP_ENTRY_LEN).zip(self.regions()) {
            chunk.copy_from_slice(bytemuck::bytes_of(&MemoryMapEntry::from(region)));
        }
        Ok(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::test_map;
    use crate::region::{MemoryAttributes, MemoryType};
    use boot_info::table::MemoryMapTable;

    #[test]
    fn table_mirrors_the_map() {
        let mut map = test_map::<8>();
        map.insert(
            MemoryRegion::new(0x0, 0x9_F000, MemoryType::Conventional)
                .with_attributes(MemoryAttributes::from_bits(0xF)),
        );
        map.insert(MemoryRegion::new(0x9_F000, 0x6_1000, MemoryType::Reserved));

        let mut buf = vec![0u8; map.table_len()];
        let written = map.write_table(map.key(), &mut buf).unwrap();
        assert_eq!(written, 8 + 2 * 36);

        let table = MemoryMapTable::parse(&buf).unwrap();
        let entries = table.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!({ entries[0].ty }, 7);
        assert_eq!({ entries[0].size }, 0x9_F000);
        assert_eq!({ entries[0].attributes }, 0xF);
        assert_eq!({ entries[1].ty }, 0);
        assert_eq!({ entries[1].physical_start }, 0x9_F000);
    }

    #[test]
    fn stale_snapshot_is_refused() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x10_0000, MemoryType::Conventional));
        let key = map.key();

        // Allocating the handoff buffer itself changes the map.
        map.alloc_pages(MemoryType::LoaderData, 1).unwrap();
        let mut buf = [0u8; 256];
        assert_eq!(
            map.write_table(key, &mut buf),
            Err(HandoffError::StaleKey {
                expected: key,
                current: map.key()
            })
        );
        assert_eq!(map.write_table(map.key(), &mut buf), Ok(8 + 2 * 36));
    }

    #[test]
    fn short_buffer_is_refused() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x1000, MemoryType::Conventional));
        let mut buf = [0u8; 40];
        assert_eq!(
            map.write_table(map.key(), &mut buf),
            Err(HandoffError::BufferTooSmall {
                needed: 44,
                available: 40
            })
        );
    }
}

//! # Page Allocation
//!
//! Hands out and takes back whole pages by retyping ranges of the map. There
//! is no separate free list: conventional entries *are* the free memory.

use crate::map::MemoryMap;
use crate::phys_mapper::PhysMapper;
use crate::precedence::Precedence;
use crate::region::{MemoryRegion, MemoryType};
use boot_addresses::{PageSize, PhysicalAddress, Size4K, bytes_for};
use log::{debug, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("not enough conventional memory for {pages} pages of {ty}")]
    OutOfMemory { ty: MemoryType, pages: u64 },
    #[error("cannot allocate zero pages")]
    ZeroPages,
    #[error("pages cannot be allocated as conventional memory")]
    ConventionalTarget,
    #[error("{pages} pages do not fit into the address space")]
    TooLarge { pages: u64 },
    #[error("address {0} is not page aligned")]
    Unaligned(PhysicalAddress),
}

impl<M: PhysMapper, const SLOTS: usize> MemoryMap<M, SLOTS> {
    /// Retypes `count` contiguous conventional pages below the ceiling to `ty`
    /// and returns the first page's address.
    ///
    /// Takes the lowest fitting conventional entry. If an entry of type `ty`
    /// touches it, the pages are taken from that side so the neighbour simply
    /// grows. The slice keeps the attributes of the memory it came from.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if no conventional entry below the ceiling
    /// can hold the request; requests are never partially satisfied.
    ///
    /// # Panics
    /// If the bookkeeping itself runs out of memory, as for
    /// [`insert`](Self::insert).
    pub fn alloc_pages(
        &mut self,
        ty: MemoryType,
        count: u64,
    ) -> Result<PhysicalAddress, AllocError> {
        if ty == MemoryType::Conventional {
            return Err(AllocError::ConventionalTarget);
        }
        if count == 0 {
            return Err(AllocError::ZeroPages);
        }
        let bytes = bytes_for::<Size4K>(count).ok_or(AllocError::TooLarge { pages: count })?;

        // A request that cannot be met must not carve anything.
        if self.find_slice(bytes, ty, 0..0).is_none() {
            warn!("memory map: cannot allocate {count} pages of {ty}");
            return Err(AllocError::OutOfMemory { ty, pages: count });
        }

        // Carving map entries changes the map, so choose again afterwards.
        self.reserve_slots(1);
        let Some(slice) = self.find_slice(bytes, ty, 0..0) else {
            warn!("memory map: carving map entries left no room for {count} pages of {ty}");
            self.commit();
            return Err(AllocError::OutOfMemory { ty, pages: count });
        };

        self.take_slice(slice, bytes, ty);
        self.commit();
        debug!("allocated {count} pages of {ty} at {:#x}", slice.start);
        Ok(PhysicalAddress::new(slice.start))
    }

    /// Returns `count` pages starting at `address` to conventional memory.
    ///
    /// Uses [`Precedence::RECLAIM`], so the range becomes conventional no
    /// matter what the map says about it, unless it is unusable.
    ///
    /// # Errors
    /// [`AllocError::Unaligned`] for an address that is not page aligned and
    /// [`AllocError::TooLarge`] for a range past the end of the address space.
    ///
    /// # Panics
    /// As for [`insert`](Self::insert).
    pub fn free_pages(&mut self, address: PhysicalAddress, count: u64) -> Result<(), AllocError> {
        if !address.is_aligned::<Size4K>() {
            return Err(AllocError::Unaligned(address));
        }
        if count == 0 {
            return Ok(());
        }
        let bytes = bytes_for::<Size4K>(count)
            .filter(|&b| address.checked_add(b).is_some())
            .ok_or(AllocError::TooLarge { pages: count })?;

        debug!("freeing {count} pages at {address:#x}");
        self.insert_with(
            MemoryRegion::new(address.as_u64(), bytes, MemoryType::Conventional),
            &Precedence::RECLAIM,
        );
        Ok(())
    }
}

const _: () = assert!(Size4K::SIZE == boot_info::memory::PAGE_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SparsePhys;
    use crate::map::tests::{assert_canonical, layout, test_map};
    use crate::region::MemoryAttributes;
    use crate::region::MemoryType::{BootServicesData, Conventional, LoaderData, Reserved, Unusable};

    #[test]
    fn single_page_alloc_and_free() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x10_0000, Conventional));

        let pa = map.alloc_pages(LoaderData, 1).unwrap();
        assert_eq!(pa, PhysicalAddress::new(0));
        assert_eq!(
            layout(&map),
            [(0x0, 0x1000, LoaderData), (0x1000, 0x10_0000, Conventional)]
        );

        map.free_pages(pa, 1).unwrap();
        assert_eq!(layout(&map), [(0x0, 0x10_0000, Conventional)]);
    }

    #[test]
    fn alloc_then_free_restores_the_map() {
        let mut map = test_map::<8>();
        let wb = MemoryAttributes::from_bits(0x8);
        map.insert(MemoryRegion::new(0x0, 0x9_F000, Conventional).with_attributes(wb));
        map.insert(MemoryRegion::new(0x9_F000, 0x6_1000, Reserved));
        map.insert(MemoryRegion::new(0x10_0000, 0x70_0000, Conventional).with_attributes(wb));
        let before: Vec<_> = map.regions().collect();

        // Too large for low memory, so it lands at 1 MiB.
        let pa = map.alloc_pages(BootServicesData, 0xA0).unwrap();
        assert_eq!(pa, PhysicalAddress::new(0x10_0000));
        let taken = map.find(pa).unwrap();
        assert_eq!(taken.ty, BootServicesData);
        assert_eq!(taken.size, 0xA_0000);
        assert_eq!(taken.attributes, wb);
        assert_canonical(&map);

        map.free_pages(pa, 0xA0).unwrap();
        assert_eq!(map.regions().collect::<Vec<_>>(), before);
    }

    #[test]
    fn allocation_grows_a_loader_data_predecessor() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x1000, LoaderData));
        map.insert(MemoryRegion::new(0x1000, 0xF000, Conventional));

        let pa = map.alloc_pages(LoaderData, 2).unwrap();
        assert_eq!(pa, PhysicalAddress::new(0x1000));
        assert_eq!(
            layout(&map),
            [(0x0, 0x3000, LoaderData), (0x3000, 0x10000, Conventional)]
        );
    }

    #[test]
    fn allocation_grows_a_successor_of_the_same_type() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x4000, Conventional));
        map.insert(MemoryRegion::new(0x4000, 0x1000, BootServicesData));

        let pa = map.alloc_pages(BootServicesData, 1).unwrap();
        assert_eq!(pa, PhysicalAddress::new(0x3000));
        assert_eq!(
            layout(&map),
            [(0x0, 0x3000, Conventional), (0x3000, 0x5000, BootServicesData)]
        );
    }

    #[test]
    fn consuming_a_gap_joins_both_neighbours() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x1000, LoaderData));
        map.insert(MemoryRegion::new(0x1000, 0x1000, Conventional));
        map.insert(MemoryRegion::new(0x2000, 0x1000, LoaderData));

        assert_eq!(map.alloc_pages(LoaderData, 1), Ok(PhysicalAddress::new(0x1000)));
        assert_eq!(layout(&map), [(0x0, 0x3000, LoaderData)]);
    }

    #[test]
    fn requests_are_never_partially_satisfied() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x2000, Conventional));
        map.insert(MemoryRegion::new(0x3000, 0x2000, Conventional));
        let key = map.key();

        assert_eq!(
            map.alloc_pages(LoaderData, 3),
            Err(AllocError::OutOfMemory {
                ty: LoaderData,
                pages: 3
            })
        );
        assert_eq!(map.key(), key);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn allocations_stay_below_the_ceiling() {
        let mut map: MemoryMap<_, 8> =
            MemoryMap::new(SparsePhys::new(), PhysicalAddress::new(0x10_0000));
        map.insert(MemoryRegion::new(0x8_0000, 0x18_0000, Conventional));

        assert_eq!(map.alloc_pages(LoaderData, 0x80), Ok(PhysicalAddress::new(0x8_0000)));
        assert!(matches!(
            map.alloc_pages(LoaderData, 1),
            Err(AllocError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x10000, Conventional));
        let key = map.key();

        assert_eq!(map.alloc_pages(Conventional, 1), Err(AllocError::ConventionalTarget));
        assert_eq!(map.alloc_pages(LoaderData, 0), Err(AllocError::ZeroPages));
        assert_eq!(
            map.alloc_pages(LoaderData, u64::MAX),
            Err(AllocError::TooLarge { pages: u64::MAX })
        );
        assert_eq!(
            map.free_pages(PhysicalAddress::new(0x1234), 1),
            Err(AllocError::Unaligned(PhysicalAddress::new(0x1234)))
        );
        assert_eq!(map.free_pages(PhysicalAddress::new(0x1000), 0), Ok(()));
        assert_eq!(map.key(), key);
    }

    #[test]
    fn free_reclaims_anything_but_unusable() {
        let mut map = test_map::<8>();
        map.insert(MemoryRegion::new(0x0, 0x4000, Reserved));
        map.insert(MemoryRegion::new(0x8000, 0x1000, Unusable));

        map.free_pages(PhysicalAddress::new(0x1000), 1).unwrap();
        map.free_pages(PhysicalAddress::new(0x8000), 1).unwrap();
        assert_eq!(
            layout(&map),
            [
                (0x0, 0x1000, Reserved),
                (0x1000, 0x2000, Conventional),
                (0x2000, 0x4000, Reserved),
                (0x8000, 0x9000, Unusable)
            ]
        );
    }

    #[test]
    fn allocation_can_trigger_entry_carving() {
        let mut map = test_map::<1>();
        map.insert(MemoryRegion::new(0x0, 0x10_0000, Conventional));

        let pa = map.alloc_pages(LoaderData, 1).unwrap();
        assert_eq!(map.carved_pages(), 1);
        assert_eq!(pa, PhysicalAddress::new(0x1000));
        assert_eq!(
            layout(&map),
            [(0x0, 0x2000, LoaderData), (0x2000, 0x10_0000, Conventional)]
        );
    }

    #[test]
    fn failed_allocation_does_not_carve() {
        let mut map = test_map::<1>();
        map.insert(MemoryRegion::new(0x0, 0x10_0000, Reserved));
        let key = map.key();

        assert_eq!(
            map.alloc_pages(LoaderData, 1),
            Err(AllocError::OutOfMemory {
                ty: LoaderData,
                pages: 1
            })
        );
        assert_eq!(layout(&map), [(0x0, 0x10_0000, Reserved)]);
        assert_eq!(map.carved_pages(), 0);
        assert_eq!(map.key(), key);
    }

    #[test]
    fn oversized_allocation_leaves_the_map_alone() {
        let mut map = test_map::<1>();
        map.insert(MemoryRegion::new(0x0, 0x10_0000, Conventional));
        let key = map.key();

        assert!(matches!(
            map.alloc_pages(LoaderData, 0x1000),
            Err(AllocError::OutOfMemory { .. })
        ));
        assert_eq!(layout(&map), [(0x0, 0x10_0000, Conventional)]);
        assert_eq!(map.carved_pages(), 0);
        assert_eq!(map.key(), key);
    }

    #[test]
    fn carving_that_defeats_an_allocation_still_bumps_the_key() {
        let mut map = test_map::<1>();
        map.insert(MemoryRegion::new(0x0, 0x10_0000, Conventional));
        let key = map.key();

        // Fits before the entry page is carved, but not after.
        assert!(matches!(
            map.alloc_pages(LoaderData, 0x100),
            Err(AllocError::OutOfMemory { .. })
        ));
        assert_eq!(map.carved_pages(), 1);
        assert_eq!(
            layout(&map),
            [(0x0, 0x1000, LoaderData), (0x1000, 0x10_0000, Conventional)]
        );
        assert_ne!(map.key(), key);
        assert_canonical(&map);
    }
}

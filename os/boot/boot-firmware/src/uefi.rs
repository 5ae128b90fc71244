//! # UEFI Memory Map Conversion
//!
//! Replays the firmware's memory descriptors into a [`RegionSink`]. The UEFI
//! memory type codes are the ones [`MemoryType`] uses, so the conversion is a
//! straight copy; codes outside the standard range (OEM and OS-defined types)
//! become [`MemoryType::Unusable`].

use boot_info::memory::PAGE_SIZE;
use boot_mmap::{MemoryAttributes, MemoryRegion, MemoryType, RegionSink};
use log::{debug, warn};
use uefi::mem::memory_map::{MemoryDescriptor, MemoryMap};

/// Translates a UEFI memory type.
#[must_use]
pub fn memory_type(ty: uefi::mem::memory_map::MemoryType) -> MemoryType {
    MemoryType::from_raw(ty.0).unwrap_or(MemoryType::Unusable)
}

/// Converts one descriptor into a region.
///
/// The page count is always in 4 KiB pages, whatever the platform page size.
#[must_use]
pub fn to_region(descriptor: &MemoryDescriptor) -> MemoryRegion {
    let size = descriptor.page_count.saturating_mul(PAGE_SIZE);
    MemoryRegion::new(descriptor.phys_start, size, memory_type(descriptor.ty))
        .with_attributes(MemoryAttributes::from_bits(descriptor.att.bits()))
}

/// Feeds descriptors into `sink`.
///
/// Returns the number of descriptors forwarded.
pub fn insert_descriptors<'a, S, I>(sink: &mut S, descriptors: I) -> usize
where
    S: RegionSink + ?Sized,
    I: IntoIterator<Item = &'a MemoryDescriptor>,
{
    let mut inserted = 0;
    for descriptor in descriptors {
        let region = to_region(descriptor);
        if MemoryType::from_raw(descriptor.ty.0).is_none() {
            warn!(
                "UEFI: treating {:#x}+{:#x} of type {:#x} as unusable",
                descriptor.phys_start, region.size, descriptor.ty.0
            );
        }
        sink.insert(region);
        inserted += 1;
    }
    debug!("UEFI: {inserted} descriptors");
    inserted
}

/// Feeds a whole firmware memory map into `sink`.
pub fn insert_memory_map<S, M>(sink: &mut S, map: &M) -> usize
where
    S: RegionSink + ?Sized,
    M: MemoryMap + ?Sized,
{
    insert_descriptors(sink, map.entries())
}

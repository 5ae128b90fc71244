//! # Physical Memory Access
//!
//! The entry allocator formats pages it carves out of conventional memory, so
//! it needs to turn a physical address into a pointer. How that works depends
//! on where the map runs:
//!
//! - a flat or identity-mapped loader dereferences physical addresses directly
//!   ([`IdentityPhysMapper`]);
//! - hosted tools and tests back physical pages with heap memory
//!   ([`SparsePhys`](crate::host::SparsePhys), feature `host`).

use boot_addresses::PhysicalAddress;

/// Translates physical addresses into pointers usable by the current code.
pub trait PhysMapper {
    /// Returns a pointer through which `pa` can be read and written as a `T`.
    ///
    /// # Safety
    /// The caller must ensure `pa` is backed by memory it owns, that
    /// `size_of::<T>()` bytes starting at `pa` stay within one page, and that
    /// `pa` is suitably aligned for `T`.
    unsafe fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T;
}

/// [`PhysMapper`] for code running with physical addresses identity mapped.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        pa.as_u64() as usize as *mut T
    }
}

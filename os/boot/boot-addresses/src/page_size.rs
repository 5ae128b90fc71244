use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page sizes.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
}

/// 4 KiB page (4096 bytes), the granule of the physical memory map.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Size4K;

impl sealed::Sealed for Size4K {}

impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
}

const _: () = assert!(1 << Size4K::SHIFT == Size4K::SIZE);

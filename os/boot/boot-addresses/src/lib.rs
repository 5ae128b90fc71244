//! # Physical Address Types
//!
//! Strongly typed wrappers for the physical addresses and page bases handled
//! while the boot environment probes and carves up system memory.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical address (RAM or MMIO). |
//! | [`PhysicalPage<S>`] | A page-aligned physical base of a page of size `S`. |
//! | [`PageSize`] | Marker trait carrying [`SIZE`](PageSize::SIZE) and [`SHIFT`](PageSize::SHIFT). |
//!
//! The memory map only ever deals in 4 KiB granules, so [`Size4K`] is the
//! single page size marker. The alignment helpers are plain `const fn`s over
//! `u64` so that range arithmetic in the map can stay in integers and only
//! wrap values into [`PhysicalAddress`] at API boundaries.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use boot_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! assert_eq!(pa.page::<Size4K>().base().as_u64(), 0x0010_2000);
//! assert_eq!(pa.offset::<Size4K>(), 0x42);
//! assert_eq!(align_up(0x1001, Size4K::SIZE), Some(0x2000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod physical_page;

pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline(always)]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` if the rounded value does not fit into 64 bits.
#[inline(always)]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Whether `value` is a multiple of `align` (a power of two).
#[inline(always)]
#[must_use]
pub const fn is_aligned(value: u64, align: u64) -> bool {
    value & (align - 1) == 0
}

/// Number of `S`-sized pages needed to hold `bytes`.
#[inline]
#[must_use]
pub const fn pages_for<S: PageSize>(bytes: u64) -> u64 {
    bytes.div_ceil(S::SIZE)
}

/// Byte length of `pages` pages of size `S`, if it fits into 64 bits.
#[inline]
#[must_use]
pub const fn bytes_for<S: PageSize>(pages: u64) -> Option<u64> {
    pages.checked_mul(S::SIZE)
}

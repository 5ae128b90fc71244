//! Heap-backed physical memory for hosted builds and tests.

use crate::phys_mapper::PhysMapper;
use boot_addresses::{PageSize, PhysicalAddress, Size4K};
use std::boxed::Box;
use std::cell::RefCell;
use std::collections::BTreeMap;

#[repr(C, align(4096))]
struct Frame([u8; Size4K::SIZE as usize]);

/// Physical address space whose pages spring into existence, zeroed, on first
/// access.
///
/// Only pages the map actually touches are allocated, so a hosted map can
/// describe gigabytes of "physical" memory.
#[derive(Default)]
pub struct SparsePhys {
    frames: RefCell<BTreeMap<u64, Box<Frame>>>,
}

impl SparsePhys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages that have been touched so far.
    #[must_use]
    pub fn touched_pages(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Whether the page containing `pa` has been touched.
    #[must_use]
    pub fn is_touched(&self, pa: PhysicalAddress) -> bool {
        self.frames
            .borrow()
            .contains_key(&pa.page::<Size4K>().base().as_u64())
    }
}

impl PhysMapper for SparsePhys {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        let base = pa.page::<Size4K>().base().as_u64();
        let offset = pa.offset::<Size4K>() as usize;
        debug_assert!(offset + size_of::<T>() <= Size4K::SIZE as usize);

        let mut frames = self.frames.borrow_mut();
        let frame = frames
            .entry(base)
            .or_insert_with(|| Box::new(Frame([0; Size4K::SIZE as usize])));
        // SAFETY: the offset stays within the boxed frame, which never moves.
        unsafe { frame.0.as_mut_ptr().add(offset).cast() }
    }
}

//! # Entry Storage
//!
//! Backing store for catalog nodes. A fixed number of slots is embedded in the
//! map so that probing can begin before any memory is known; once those run
//! out the map carves pages from conventional memory and formats them into
//! further slots. Slots are never returned to a general allocator, vacant ones
//! form a free list that is always consulted first.

use crate::phys_mapper::PhysMapper;
use crate::region::MemoryRegion;
use boot_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};

/// Number of node slots embedded in a map by default.
///
/// Comfortably covers the memory map of a typical PC or board before the first
/// page has to be carved; it is a tuning knob, not a limit.
pub const DEFAULT_STATIC_SLOTS: usize = 64;

/// Location of a slot: in the embedded array or in a carved page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SlotRef {
    Fixed(u16),
    Carved(PhysicalAddress),
}

pub(crate) type Link = Option<SlotRef>;

/// A catalog node: the region plus its treap links.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Node {
    pub region: MemoryRegion,
    pub parent: Link,
    pub left: Link,
    pub right: Link,
    pub priority: u32,
}

#[derive(Copy, Clone, Debug)]
enum Slot {
    Vacant { next: Link },
    Occupied(Node),
}

const SLOT_SIZE: usize = size_of::<Slot>();

/// Slots obtained from one carved page.
#[allow(clippy::cast_possible_truncation)]
pub(crate) const SLOTS_PER_PAGE: usize = Size4K::SIZE as usize / SLOT_SIZE;

const _: () = assert!(SLOTS_PER_PAGE >= 2);

pub(crate) struct NodePool<M, const N: usize> {
    mapper: M,
    fixed: [Slot; N],
    free: Link,
    free_len: usize,
    pages: usize,
}

impl<M: PhysMapper, const N: usize> NodePool<M, N> {
    pub(crate) const fn new(mapper: M) -> Self {
        const { assert!(N <= u16::MAX as usize, "too many static slots") };
        let mut pool = Self {
            mapper,
            fixed: [Slot::Vacant { next: None }; N],
            free: None,
            free_len: 0,
            pages: 0,
        };
        pool.link_fixed();
        pool
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn link_fixed(&mut self) {
        let mut i = 0;
        while i < N {
            let next = if i + 1 < N {
                Some(SlotRef::Fixed((i + 1) as u16))
            } else {
                None
            };
            self.fixed[i] = Slot::Vacant { next };
            i += 1;
        }
        self.free = if N > 0 { Some(SlotRef::Fixed(0)) } else { None };
        self.free_len = N;
    }

    pub(crate) const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Number of vacant slots.
    pub(crate) const fn free_len(&self) -> usize {
        self.free_len
    }

    /// Number of pages carved so far.
    pub(crate) const fn pages(&self) -> usize {
        self.pages
    }

    fn slot(&self, slot: SlotRef) -> &Slot {
        match slot {
            SlotRef::Fixed(i) => &self.fixed[usize::from(i)],
            // SAFETY: carved slots lie in pages formatted by `adopt_page`.
            SlotRef::Carved(pa) => unsafe { &*self.mapper.phys_to_ptr::<Slot>(pa) },
        }
    }

    fn slot_mut(&mut self, slot: SlotRef) -> &mut Slot {
        match slot {
            SlotRef::Fixed(i) => &mut self.fixed[usize::from(i)],
            // SAFETY: carved slots lie in pages formatted by `adopt_page`.
            SlotRef::Carved(pa) => unsafe { &mut *self.mapper.phys_to_ptr::<Slot>(pa) },
        }
    }

    pub(crate) fn node(&self, slot: SlotRef) -> &Node {
        match self.slot(slot) {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => panic!("memory map: vacant slot {slot:?} referenced"),
        }
    }

    pub(crate) fn node_mut(&mut self, slot: SlotRef) -> &mut Node {
        match self.slot_mut(slot) {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => panic!("memory map: vacant slot {slot:?} referenced"),
        }
    }

    /// Moves `node` into a vacant slot, or returns `None` if there is none.
    pub(crate) fn alloc(&mut self, node: Node) -> Option<SlotRef> {
        let slot = self.free?;
        let entry = self.slot_mut(slot);
        let Slot::Vacant { next } = *entry else {
            panic!("memory map: free list points at live slot {slot:?}");
        };
        *entry = Slot::Occupied(node);
        self.free = next;
        self.free_len -= 1;
        Some(slot)
    }

    pub(crate) fn release(&mut self, slot: SlotRef) {
        let next = self.free;
        *self.slot_mut(slot) = Slot::Vacant { next };
        self.free = Some(slot);
        self.free_len += 1;
    }

    /// Formats `page` into vacant slots.
    ///
    /// # Safety
    /// The page must be conventional memory reachable through the mapper that
    /// nothing else uses, and must stay reserved for the lifetime of the pool.
    pub(crate) unsafe fn adopt_page(&mut self, page: PhysicalPage<Size4K>) {
        // Push in reverse so that the lowest slot is handed out first.
        for i in (0..SLOTS_PER_PAGE).rev() {
            let pa = page.join((i * SLOT_SIZE) as u64);
            let next = self.free;
            // SAFETY: the slot lies within the page the caller hands over.
            unsafe {
                self.mapper
                    .phys_to_ptr::<Slot>(pa)
                    .write(Slot::Vacant { next });
            }
            self.free = Some(SlotRef::Carved(pa));
        }
        self.free_len += SLOTS_PER_PAGE;
        self.pages += 1;
    }

    /// Drops every node and forgets carved pages.
    pub(crate) fn reset(&mut self) {
        self.link_fixed();
        self.pages = 0;
    }
}

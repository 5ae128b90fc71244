//! # Region Catalog
//!
//! [`MemoryMap`] keeps the physical address space as a sorted set of
//! non-overlapping regions in which no two touching regions share a type.
//! Every mutation goes through the resolver in this module:
//!
//! 1. the incoming region is clamped to whole pages, partial pages at either
//!    end become [`MemoryType::Unusable`];
//! 2. each aligned piece is placed left to right: uncovered bytes take the
//!    incoming type, covered bytes go to whichever type the [`Precedence`]
//!    table ranks first;
//! 3. touching regions of equal type around the affected span are merged
//!    until no merge applies.
//!
//! Node storage is topped up before every step of (2), carving a page out of
//! conventional memory if the static slots are gone.

use crate::phys_mapper::PhysMapper;
use crate::pool::{DEFAULT_STATIC_SLOTS, SlotRef};
use crate::precedence::{Precedence, Side};
use crate::region::{MemoryAttributes, MemoryRegion, MemoryType, RegionSink};
use crate::tree::RegionTree;
use boot_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K, align_down};
use core::fmt;
use core::ops::Range;
use log::{debug, error, info, trace};

const PAGE: u64 = Size4K::SIZE;

/// Generation counter of a [`MemoryMap`].
///
/// Changes whenever the map changes; a snapshot is current only as long as
/// its key matches [`MemoryMap::key`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapKey(u64);

impl MapKey {
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of [`MemoryMap::enumerate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Entries copied into the caller's buffer.
    pub written: usize,
    /// Entries in the map; larger than `written` if the buffer was too small.
    pub total: usize,
    pub key: MapKey,
}

impl Snapshot {
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.written < self.total
    }
}

/// One resolver step over `[cursor, ..)` of the incoming region.
#[derive(Copy, Clone, Debug)]
enum Step {
    /// `[start, end)` is not described by any entry yet.
    Fill { start: u64, end: u64 },
    /// The existing entry keeps `[.., end)` and takes on the incoming
    /// attributes.
    Keep { entry: SlotRef, end: u64 },
    /// The incoming type takes `[start, end)` out of `entry`.
    Split {
        entry: SlotRef,
        start: u64,
        end: u64,
    },
}

/// The physical memory map.
///
/// `SLOTS` node slots are embedded in the map; further nodes are carved from
/// conventional memory below the address ceiling through `M`.
pub struct MemoryMap<M: PhysMapper, const SLOTS: usize = DEFAULT_STATIC_SLOTS> {
    pub(crate) tree: RegionTree<M, SLOTS>,
    ceiling: u64,
    key: MapKey,
    dirty: bool,
}

impl<M: PhysMapper, const SLOTS: usize> MemoryMap<M, SLOTS> {
    /// Creates an empty map.
    ///
    /// Neither carved node pages nor page allocations will extend past
    /// `ceiling` (exclusive).
    #[must_use]
    pub const fn new(mapper: M, ceiling: PhysicalAddress) -> Self {
        Self {
            tree: RegionTree::new(mapper),
            ceiling: align_down(ceiling.as_u64(), PAGE),
            key: MapKey(0),
            dirty: false,
        }
    }

    #[must_use]
    pub const fn ceiling(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.ceiling)
    }

    #[must_use]
    pub const fn key(&self) -> MapKey {
        self.key
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }

    /// Pages taken from conventional memory to hold map entries.
    #[must_use]
    pub const fn carved_pages(&self) -> usize {
        self.tree.pool().pages()
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        self.tree.pool().mapper()
    }

    /// Entries in address order.
    #[must_use]
    pub fn regions(&self) -> Regions<'_, M, SLOTS> {
        Regions {
            tree: &self.tree,
            cursor: self.tree.first(),
        }
    }

    /// The entry containing `address`, if any.
    #[must_use]
    pub fn find(&self, address: PhysicalAddress) -> Option<MemoryRegion> {
        let node = self.tree.floor(address.as_u64())?;
        let region = self.tree.region(node);
        region.contains(address.as_u64()).then_some(region)
    }

    /// Copies up to `out.len()` entries in address order.
    pub fn enumerate(&self, out: &mut [MemoryRegion]) -> Snapshot {
        let mut written = 0;
        for (slot, region) in out.iter_mut().zip(self.regions()) {
            *slot = region;
            written += 1;
        }
        Snapshot {
            written,
            total: self.len(),
            key: self.key,
        }
    }

    /// Drops every entry and forgets carved pages.
    pub fn reset(&mut self) {
        self.tree.clear();
        self.key = self.key.next();
        self.dirty = false;
    }

    /// Records `region` using the probing precedence table.
    ///
    /// Zero-sized regions are ignored.
    ///
    /// # Panics
    /// Halts the boot if a map entry is needed and no conventional page below
    /// the ceiling is left to carve one from.
    pub fn insert(&mut self, region: MemoryRegion) {
        self.insert_with(region, &Precedence::PROBING);
    }

    /// Records `region`, deciding contested bytes with `precedence`.
    ///
    /// # Panics
    /// See [`insert`](Self::insert).
    pub fn insert_with(&mut self, region: MemoryRegion, precedence: &Precedence) {
        if region.is_empty() {
            return;
        }
        debug!("insert {region}");
        for piece in page_aligned_pieces(region).into_iter().flatten() {
            self.place(piece, precedence);
        }
        self.commit();
    }

    /// Bumps the key if anything changed since the last commit.
    pub(crate) const fn commit(&mut self) {
        if self.dirty {
            self.key = self.key.next();
            self.dirty = false;
        }
    }

    /// Resolves one page-aligned region into the tree.
    pub(crate) fn place(&mut self, incoming: MemoryRegion, precedence: &Precedence) {
        let end = incoming.end();
        let mut cursor = incoming.start.as_u64();
        while cursor < end {
            let step = self.plan(&incoming, cursor, precedence);
            if self.tree.pool().free_len() < self.slots_needed(step) {
                // Carving changes the tree, so the step is planned again. The
                // page must not come out of the bytes still to be placed.
                self.carve_entry_page(cursor..end);
                continue;
            }
            cursor = self.apply(step, &incoming);
        }
        self.coalesce(incoming.start.as_u64(), end);
    }

    fn plan(&self, incoming: &MemoryRegion, cursor: u64, precedence: &Precedence) -> Step {
        let end = incoming.end();
        let floor = self.tree.floor(cursor);

        if let Some(entry) = floor {
            let existing = self.tree.region(entry);
            if existing.end() > cursor {
                let overlap_end = existing.end().min(end);
                return match precedence.winner(existing.ty, incoming.ty) {
                    Side::Incoming => Step::Split {
                        entry,
                        start: cursor,
                        end: overlap_end,
                    },
                    Side::Existing => Step::Keep {
                        entry,
                        end: overlap_end,
                    },
                };
            }
        }

        let next = match floor {
            Some(entry) => self.tree.next(entry),
            None => self.tree.first(),
        };
        let fill_end = next.map_or(end, |n| self.tree.region(n).start.as_u64().min(end));
        Step::Fill {
            start: cursor,
            end: fill_end,
        }
    }

    fn slots_needed(&self, step: Step) -> usize {
        match step {
            Step::Fill { .. } => 1,
            Step::Keep { .. } => 0,
            Step::Split { entry, start, end } => {
                let existing = self.tree.region(entry);
                let head = existing.start.as_u64() < start;
                let tail = end < existing.end();
                usize::from(head) + usize::from(tail)
            }
        }
    }

    fn apply(&mut self, step: Step, incoming: &MemoryRegion) -> u64 {
        trace!("resolve {step:?}");
        match step {
            Step::Fill { start, end } => {
                self.link(incoming.with_range(start, end));
                end
            }
            Step::Keep { entry, end } => {
                // Contested bytes carry both attribute sets; an entry has
                // only one, so the whole entry takes the union.
                let region = self.tree.region_mut(entry);
                let merged = region.attributes | incoming.attributes;
                if merged != region.attributes {
                    region.attributes = merged;
                    self.dirty = true;
                }
                end
            }
            Step::Split { entry, start, end } => {
                let existing = self.tree.region(entry);
                let contested = MemoryRegion {
                    attributes: existing.attributes | incoming.attributes,
                    ..incoming.with_range(start, end)
                };

                if existing.start.as_u64() < start {
                    *self.tree.region_mut(entry) = existing.with_range(existing.start.as_u64(), start);
                    self.link(contested);
                } else {
                    *self.tree.region_mut(entry) = contested;
                    self.dirty = true;
                }
                if end < existing.end() {
                    self.link(existing.with_range(end, existing.end()));
                }
                end
            }
        }
    }

    /// Links a new entry; the caller has reserved a slot for it.
    fn link(&mut self, region: MemoryRegion) -> SlotRef {
        self.dirty = true;
        match self.tree.insert(region) {
            Some(node) => node,
            None => panic!("memory map: no slot reserved for {region}"),
        }
    }

    /// Merges touching entries of equal type from just before `start` up to
    /// the first entry beyond `end`.
    pub(crate) fn coalesce(&mut self, start: u64, end: u64) {
        let Some(mut current) = self.tree.floor(start).or_else(|| self.tree.first()) else {
            return;
        };
        if let Some(prev) = self.tree.prev(current) {
            current = prev;
        }

        while let Some(next) = self.tree.next(current) {
            let left = self.tree.region(current);
            let right = self.tree.region(next);
            if left.ty == right.ty && left.end() == right.start.as_u64() {
                self.tree.remove(next);
                let merged = self.tree.region_mut(current);
                merged.size += right.size;
                merged.attributes |= right.attributes;
                self.dirty = true;
                continue;
            }
            if right.start.as_u64() > end {
                break;
            }
            current = next;
        }
    }

    /// Ensures at least `count` vacant node slots.
    ///
    /// # Panics
    /// See [`insert`](Self::insert).
    pub(crate) fn reserve_slots(&mut self, count: usize) {
        while self.tree.pool().free_len() < count {
            self.carve_entry_page(0..0);
        }
    }

    /// Takes one conventional page below the ceiling and outside `avoid` and
    /// turns it into node slots, recording it as loader data.
    fn carve_entry_page(&mut self, avoid: Range<u64>) {
        let Some(slice) = self.find_slice(PAGE, MemoryType::LoaderData, avoid) else {
            error!(
                "memory map: no conventional page below {:#x} left for map entries",
                self.ceiling
            );
            panic!("memory map exhausted: cannot allocate map entries");
        };
        let page = PhysicalPage::<Size4K>::containing(PhysicalAddress::new(slice.start));

        // SAFETY: the page is conventional memory below the ceiling; the map
        // records it as loader data right below, before anything can reuse it.
        unsafe { self.tree.pool_mut().adopt_page(page) };
        info!(
            "memory map: carved entry page {:#x} ({} pages total)",
            slice.start,
            self.carved_pages()
        );

        self.take_slice(slice, PAGE, MemoryType::LoaderData);
    }

    /// Finds where `bytes` of conventional memory below the ceiling and
    /// outside `avoid` can be retyped to `ty`: the first large enough
    /// conventional range, sliced so that an adjacent entry of type `ty` can
    /// absorb the bytes if there is one.
    pub(crate) fn find_slice(&self, bytes: u64, ty: MemoryType, avoid: Range<u64>) -> Option<Slice> {
        let mut cursor = self.tree.first();
        while let Some(entry) = cursor {
            let region = self.tree.region(entry);
            let start = region.start.as_u64();
            if start >= self.ceiling {
                break;
            }
            cursor = self.tree.next(entry);
            if region.ty != MemoryType::Conventional {
                continue;
            }

            let limit = region.end().min(self.ceiling);
            let pieces = if avoid.start < limit && avoid.end > start {
                [start..avoid.start.max(start), avoid.end.min(limit)..limit]
            } else {
                [start..limit, limit..limit]
            };

            let touches = |node: SlotRef, at: u64, before: bool| {
                let n = self.tree.region(node);
                n.ty == ty && if before { n.end() == at } else { n.start.as_u64() == at }
            };
            for piece in pieces {
                if piece.end.saturating_sub(piece.start) < bytes {
                    continue;
                }
                if piece.start == start
                    && let Some(prev) = self.tree.prev(entry).filter(|&p| touches(p, start, true))
                {
                    return Some(Slice {
                        source: entry,
                        start,
                        extend: Some(prev),
                    });
                }
                if piece.end == region.end()
                    && let Some(next) = cursor.filter(|&n| touches(n, region.end(), false))
                {
                    return Some(Slice {
                        source: entry,
                        start: region.end() - bytes,
                        extend: Some(next),
                    });
                }
                return Some(Slice {
                    source: entry,
                    start: piece.start,
                    extend: None,
                });
            }
        }
        None
    }

    /// Retypes the slice found by [`find_slice`](Self::find_slice).
    pub(crate) fn take_slice(&mut self, slice: Slice, bytes: u64, ty: MemoryType) {
        match slice.extend {
            Some(neighbor) => self.shift_boundary(slice.source, neighbor, bytes),
            None => self.place(
                MemoryRegion::new(slice.start, bytes, ty),
                &Precedence::PROBING,
            ),
        }
    }

    /// Moves `bytes` from the edge of `source` into the touching `neighbor`.
    ///
    /// Needs no new node; `source` disappears if it is used up.
    fn shift_boundary(&mut self, source: SlotRef, neighbor: SlotRef, bytes: u64) {
        let src = self.tree.region(source);
        let attributes: MemoryAttributes = src.attributes;

        let grown = self.tree.region_mut(neighbor);
        grown.size += bytes;
        grown.attributes |= attributes;
        let neighbor_first = grown.start < src.start;
        if !neighbor_first {
            grown.start = grown.start - bytes;
        }

        let shrunk = self.tree.region_mut(source);
        shrunk.size -= bytes;
        if neighbor_first {
            shrunk.start += bytes;
        }
        self.dirty = true;

        if self.tree.region(source).is_empty() {
            self.tree.remove(source);
            let grown = self.tree.region(neighbor);
            self.coalesce(grown.start.as_u64(), grown.end());
        }
    }
}

impl<M: PhysMapper, const SLOTS: usize> RegionSink for MemoryMap<M, SLOTS> {
    fn insert(&mut self, region: MemoryRegion) {
        Self::insert(self, region);
    }
}

impl<M: PhysMapper, const SLOTS: usize> fmt::Debug for MemoryMap<M, SLOTS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMap")
            .field("key", &self.key)
            .field("ceiling", &self.ceiling())
            .field("regions", &DebugRegions(self))
            .finish()
    }
}

struct DebugRegions<'a, M: PhysMapper, const SLOTS: usize>(&'a MemoryMap<M, SLOTS>);

impl<M: PhysMapper, const SLOTS: usize> fmt::Debug for DebugRegions<'_, M, SLOTS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.regions()).finish()
    }
}

/// Where a slice of conventional memory will be taken from.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Slice {
    pub source: SlotRef,
    pub start: u64,
    /// Touching entry of the target type that absorbs the slice.
    pub extend: Option<SlotRef>,
}

/// Iterator over the entries of a [`MemoryMap`] in address order.
pub struct Regions<'a, M: PhysMapper, const SLOTS: usize> {
    tree: &'a RegionTree<M, SLOTS>,
    cursor: Option<SlotRef>,
}

impl<M: PhysMapper, const SLOTS: usize> Iterator for Regions<'_, M, SLOTS> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        self.cursor = self.tree.next(node);
        Some(self.tree.region(node))
    }
}

/// Splits `region` into whole pages: an unusable page for a partial page at
/// the start, the aligned body, and an unusable page for a partial page at the
/// end.
fn page_aligned_pieces(region: MemoryRegion) -> [Option<MemoryRegion>; 3] {
    let start = region.start.as_u64();
    let end = region.end();
    let mut pieces = [None; 3];

    let mut body_start = start;
    if start % PAGE != 0 {
        let head = align_down(start, PAGE);
        let Some(head_end) = head.checked_add(PAGE) else {
            return pieces;
        };
        pieces[0] = Some(MemoryRegion::new(head, PAGE, MemoryType::Unusable));
        body_start = head_end;
    }
    if body_start >= end {
        return pieces;
    }

    let body_end = align_down(end, PAGE);
    if body_end != end && body_end.checked_add(PAGE).is_some() {
        pieces[2] = Some(MemoryRegion::new(body_end, PAGE, MemoryType::Unusable));
    }
    if body_end > body_start {
        pieces[1] = Some(region.with_range(body_start, body_end));
    }
    pieces
}

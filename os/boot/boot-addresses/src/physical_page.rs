use crate::{PageSize, PhysicalAddress};
use core::fmt;
use core::marker::PhantomData;

/// Physical memory page base for size `S`.
///
/// ### Invariants
/// - The low `S::SHIFT` bits of the base are always zero (page aligned).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: PhysicalAddress,
    _size: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// The page containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self {
            base: PhysicalAddress::new(pa.as_u64() & !(S::SIZE - 1)),
            _size: PhantomData,
        }
    }

    /// The page starting exactly at `base`, or `None` if `base` is misaligned.
    #[inline]
    #[must_use]
    pub const fn from_base(base: PhysicalAddress) -> Option<Self> {
        if base.is_aligned::<S>() {
            Some(Self::containing(base))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.base
    }

    /// Exclusive end of the page.
    #[inline]
    #[must_use]
    pub const fn end(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64() + S::SIZE)
    }

    /// The address `offset` bytes into this page.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < S::SIZE);
        PhysicalAddress::new(self.base.as_u64() + offset)
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:?})", self.base)
    }
}

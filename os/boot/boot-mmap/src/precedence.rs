//! # Type Precedence
//!
//! When two descriptors claim the same bytes, the type listed earlier in a
//! [`Precedence`] table keeps them. The resolver takes the table as an
//! argument; probing and page allocation use [`Precedence::PROBING`], freeing
//! pages uses [`Precedence::RECLAIM`].

use crate::region::MemoryType;

/// Which side of a contested range keeps it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    /// The entry already in the map.
    Existing,
    /// The region being inserted.
    Incoming,
}

/// Ordering over memory types; earlier entries win contested bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Precedence {
    order: [MemoryType; MemoryType::COUNT],
}

impl Precedence {
    /// Table used while probing firmware and allocating pages.
    ///
    /// Anything specific beats [`MemoryType::Conventional`], which loses every
    /// contest.
    pub const PROBING: Self = Self::new([
        MemoryType::Unusable,
        MemoryType::PalCode,
        MemoryType::MmioPortSpace,
        MemoryType::Mmio,
        MemoryType::AcpiNvs,
        MemoryType::RuntimeServicesCode,
        MemoryType::RuntimeServicesData,
        MemoryType::AcpiReclaim,
        MemoryType::LoaderCode,
        MemoryType::LoaderData,
        MemoryType::BootServicesCode,
        MemoryType::BootServicesData,
        MemoryType::Reserved,
        MemoryType::Conventional,
    ]);

    /// Table used when pages are handed back.
    ///
    /// [`MemoryType::Conventional`] outranks everything except
    /// [`MemoryType::Unusable`], so a free always reclaims the range.
    pub const RECLAIM: Self = Self::new([
        MemoryType::Unusable,
        MemoryType::Conventional,
        MemoryType::PalCode,
        MemoryType::MmioPortSpace,
        MemoryType::Mmio,
        MemoryType::AcpiNvs,
        MemoryType::RuntimeServicesCode,
        MemoryType::RuntimeServicesData,
        MemoryType::AcpiReclaim,
        MemoryType::LoaderCode,
        MemoryType::LoaderData,
        MemoryType::BootServicesCode,
        MemoryType::BootServicesData,
        MemoryType::Reserved,
    ]);

    #[must_use]
    pub const fn new(order: [MemoryType; MemoryType::COUNT]) -> Self {
        Self { order }
    }

    /// Position of `ty` in the table. Types missing from the table rank last.
    #[must_use]
    pub fn rank(&self, ty: MemoryType) -> usize {
        self.order
            .iter()
            .position(|&t| t == ty)
            .unwrap_or(MemoryType::COUNT)
    }

    /// Decides a contest between an existing entry and an incoming region.
    ///
    /// Equal ranks keep the existing entry.
    #[must_use]
    pub fn winner(&self, existing: MemoryType, incoming: MemoryType) -> Side {
        if self.rank(incoming) < self.rank(existing) {
            Side::Incoming
        } else {
            Side::Existing
        }
    }
}

impl Default for Precedence {
    fn default() -> Self {
        Self::PROBING
    }
}

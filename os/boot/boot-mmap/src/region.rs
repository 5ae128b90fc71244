//! # Memory Regions
//!
//! The value types stored in the memory map: a closed set of memory types
//! using the UEFI numbering, an opaque attribute mask, and the region itself.

use boot_addresses::PhysicalAddress;
use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Type of a physical memory region.
///
/// Discriminants follow the UEFI memory type codes so that a type can be
/// handed to the next stage as-is.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryType {
    Reserved = 0,
    LoaderCode = 1,
    LoaderData = 2,
    BootServicesCode = 3,
    BootServicesData = 4,
    RuntimeServicesCode = 5,
    RuntimeServicesData = 6,
    Conventional = 7,
    Unusable = 8,
    AcpiReclaim = 9,
    AcpiNvs = 10,
    Mmio = 11,
    MmioPortSpace = 12,
    PalCode = 13,
}

impl MemoryType {
    /// Number of memory types.
    pub const COUNT: usize = 14;

    /// All memory types in code order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Reserved,
        Self::LoaderCode,
        Self::LoaderData,
        Self::BootServicesCode,
        Self::BootServicesData,
        Self::RuntimeServicesCode,
        Self::RuntimeServicesData,
        Self::Conventional,
        Self::Unusable,
        Self::AcpiReclaim,
        Self::AcpiNvs,
        Self::Mmio,
        Self::MmioPortSpace,
        Self::PalCode,
    ];

    /// Looks up a type by its code.
    #[must_use]
    pub const fn from_raw(code: u32) -> Option<Self> {
        if (code as usize) < Self::COUNT {
            Some(Self::ALL[code as usize])
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::LoaderCode => "loader code",
            Self::LoaderData => "loader data",
            Self::BootServicesCode => "boot services code",
            Self::BootServicesData => "boot services data",
            Self::RuntimeServicesCode => "runtime services code",
            Self::RuntimeServicesData => "runtime services data",
            Self::Conventional => "conventional",
            Self::Unusable => "unusable",
            Self::AcpiReclaim => "ACPI reclaimable",
            Self::AcpiNvs => "ACPI NVS",
            Self::Mmio => "MMIO",
            Self::MmioPortSpace => "MMIO port space",
            Self::PalCode => "PAL code",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute bits of a region.
///
/// The map never interprets these; overlapping and merged regions take the
/// union of their attribute sets.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct MemoryAttributes(u64);

impl MemoryAttributes {
    pub const EMPTY: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MemoryAttributes {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for MemoryAttributes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for MemoryAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryAttributes({:#x})", self.0)
    }
}

/// A contiguous range of physical memory of a single type.
///
/// The range is half-open: `[start, start + size)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    pub start: PhysicalAddress,
    pub size: u64,
    pub ty: MemoryType,
    pub attributes: MemoryAttributes,
}

impl MemoryRegion {
    /// A region without attribute bits.
    #[must_use]
    pub const fn new(start: u64, size: u64, ty: MemoryType) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            size,
            ty,
            attributes: MemoryAttributes::EMPTY,
        }
    }

    #[must_use]
    pub const fn with_attributes(self, attributes: MemoryAttributes) -> Self {
        Self { attributes, ..self }
    }

    /// Same type and attributes over `[start, end)`.
    #[must_use]
    pub(crate) const fn with_range(self, start: u64, end: u64) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            size: end - start,
            ..self
        }
    }

    /// Exclusive end address, saturated at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.as_u64().saturating_add(self.size)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, address: u64) -> bool {
        self.start.as_u64() <= address && address < self.end()
    }

    /// Whether `other` lies entirely within this region.
    #[inline]
    #[must_use]
    pub const fn covers(&self, other: &Self) -> bool {
        self.start.as_u64() <= other.start.as_u64() && other.end() <= self.end()
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:#014x}..{:#014x}) {} ({:#x})",
            self.start.as_u64(),
            self.end(),
            self.ty,
            self.attributes.bits()
        )
    }
}

/// Anything that accepts raw region descriptors, one at a time.
///
/// Firmware collectors feed a sink instead of a concrete map so that they can
/// be exercised against a plain recording sink.
pub trait RegionSink {
    fn insert(&mut self, region: MemoryRegion);
}

//! # BIOS Memory Queries
//!
//! Collects the memory map through `INT 15h, EAX=E820h`, falling back to
//! `INT 15h, AX=E801h` plus `INT 12h` on machines without it. The interrupt
//! calls themselves live behind [`BiosMemoryServices`]; this module only
//! interprets what they return.

use bitfield_struct::bitfield;
use boot_info::memory::{EXTENDED_MEMORY_HIGH_BASE, LOW_MEMORY_END};
use boot_mmap::{MemoryAttributes, MemoryRegion, MemoryType, RegionSink};
use bytemuck::{Pod, Zeroable};
use log::{debug, info, warn};

/// `"SMAP"`, passed in `EDX` and echoed back in `EAX`.
pub const E820_SIGNATURE: u32 = 0x534D_4150;

/// Descriptors staged per query; further ones are dropped.
pub const E820_MAX_ENTRIES: usize = 128;

/// Bytes of a descriptor without the ACPI 3.0 extended attributes.
pub const E820_MIN_ENTRY_LEN: u32 = 20;

/// Bytes of a descriptor with extended attributes.
#[allow(clippy::cast_possible_truncation)]
pub const E820_ENTRY_LEN: u32 = size_of::<AddressRangeDescriptor>() as u32;

/// ACPI address range types as returned by E820.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressRangeType {
    Memory = 1,
    Reserved = 2,
    Reclaimable = 3,
    Nvs = 4,
    Unusable = 5,
    Disabled = 6,
}

impl AddressRangeType {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Memory,
            2 => Self::Reserved,
            3 => Self::Reclaimable,
            4 => Self::Nvs,
            5 => Self::Unusable,
            6 => Self::Disabled,
            _ => return None,
        })
    }
}

/// Memory type for each ACPI range type code; codes past the end are
/// unusable.
const ACPI_MEMORY_TYPES: [MemoryType; 7] = [
    MemoryType::Unusable,
    MemoryType::Conventional,
    MemoryType::Unusable,
    MemoryType::AcpiReclaim,
    MemoryType::AcpiNvs,
    MemoryType::Unusable,
    MemoryType::Unusable,
];

/// Translates an ACPI address range type code.
#[must_use]
pub fn memory_type(raw: u32) -> MemoryType {
    usize::try_from(raw)
        .ok()
        .and_then(|i| ACPI_MEMORY_TYPES.get(i).copied())
        .unwrap_or(MemoryType::Unusable)
}

/// ACPI 3.0 extended attributes of an address range.
#[bitfield(u32, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct ExtendedAttributes {
    /// Bit 0 — the descriptor is valid; ranges without it are ignored.
    pub enabled: bool,
    /// Bit 1 — non-volatile memory.
    pub non_volatile: bool,
    /// Bit 2 — slower than regular memory.
    pub slow_access: bool,
    /// Bit 3 — holds hardware error logs.
    pub error_log: bool,
    #[bits(28)]
    __: u32,
}

/// One E820 descriptor as written by the BIOS.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AddressRangeDescriptor {
    pub base: u64,
    pub length: u64,
    pub kind: u32,
    pub attributes: u32,
}

impl AddressRangeDescriptor {
    /// An enabled descriptor.
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: u32) -> Self {
        Self {
            base,
            length,
            kind,
            attributes: ExtendedAttributes::new().with_enabled(true).into_bits(),
        }
    }

    #[must_use]
    pub const fn extended(&self) -> ExtendedAttributes {
        ExtendedAttributes::from_bits(self.attributes)
    }

    #[must_use]
    pub const fn range_type(&self) -> Option<AddressRangeType> {
        AddressRangeType::from_raw(self.kind)
    }

    /// The region this descriptor describes, or `None` if it is not enabled.
    #[must_use]
    pub fn to_region(&self) -> Option<MemoryRegion> {
        if !self.extended().enabled() {
            return None;
        }
        Some(
            MemoryRegion::new(self.base, self.length, memory_type(self.kind))
                .with_attributes(MemoryAttributes::from_bits(u64::from(self.attributes))),
        )
    }
}

/// Registers after one `INT 15h, EAX=E820h` call.
#[derive(Copy, Clone, Debug, Default)]
pub struct E820Reply {
    /// Carry flag.
    pub carry: bool,
    /// `EAX`; must echo [`E820_SIGNATURE`].
    pub signature: u32,
    /// `ECX`; bytes written to the descriptor.
    pub len: u32,
    /// `EBX`; zero once the last descriptor was returned.
    pub continuation: u32,
    pub descriptor: AddressRangeDescriptor,
}

impl E820Reply {
    const fn is_well_formed(&self) -> bool {
        self.signature == E820_SIGNATURE && self.len >= E820_MIN_ENTRY_LEN
    }
}

/// Result of `INT 15h, AX=E801h`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct E801Reply {
    /// KiB between 1 MiB and 16 MiB.
    pub low_kib: u16,
    /// 64 KiB blocks above 16 MiB.
    pub high_blocks: u16,
}

/// The BIOS interrupt services used to size memory.
///
/// Implementations perform the real-mode calls; they are synchronous and are
/// never re-entered.
pub trait BiosMemoryServices {
    /// Issues E820 with `EBX = continuation`, `ECX = 24` and `EDX = "SMAP"`.
    fn e820(&mut self, continuation: u32) -> E820Reply;

    /// Issues E801, or returns `None` if the BIOS does not support it.
    fn e801(&mut self) -> Option<E801Reply>;

    /// Issues `INT 12h` and returns the KiB of conventional low memory.
    fn base_memory_kib(&mut self) -> u16;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum E820Error {
    #[error("E820 is not supported")]
    Unsupported,
    #[error("E820 returned a malformed descriptor at index {0}")]
    InvalidEntry(usize),
}

/// Runs the E820 query, staging descriptors in `out`.
///
/// Returns the number of descriptors staged. Descriptors beyond `out.len()`
/// are dropped with a warning.
///
/// # Errors
/// [`E820Error::Unsupported`] if the first call fails, and
/// [`E820Error::InvalidEntry`] if a later one returns garbage; the staged
/// descriptors must be discarded in both cases.
pub fn read_e820<B: BiosMemoryServices>(
    bios: &mut B,
    out: &mut [AddressRangeDescriptor],
) -> Result<usize, E820Error> {
    let first = bios.e820(0);
    if first.carry || !first.is_well_formed() {
        return Err(E820Error::Unsupported);
    }

    let mut count = 0;
    let mut reply = first;
    let mut index = 0;
    loop {
        let mut descriptor = reply.descriptor;
        if reply.len < E820_ENTRY_LEN {
            // Legacy 20-byte descriptors carry no attributes and are always valid.
            descriptor.attributes = ExtendedAttributes::new().with_enabled(true).into_bits();
        }
        if let Some(slot) = out.get_mut(count) {
            *slot = descriptor;
            count += 1;
        } else {
            warn!("E820: dropping descriptor {index}, staging area full");
        }

        if reply.continuation == 0 {
            break;
        }
        index += 1;
        reply = bios.e820(reply.continuation);
        if reply.carry {
            // Some BIOSes signal the end of the list through the carry flag.
            break;
        }
        if !reply.is_well_formed() {
            return Err(E820Error::InvalidEntry(index));
        }
    }

    debug!("E820: {count} descriptors");
    Ok(count)
}

/// Feeds descriptors into `sink`, skipping disabled ones.
///
/// Returns the number of descriptors forwarded.
pub fn insert_descriptors<S, I>(sink: &mut S, descriptors: I) -> usize
where
    S: RegionSink + ?Sized,
    I: IntoIterator<Item = AddressRangeDescriptor>,
{
    let mut inserted = 0;
    for descriptor in descriptors {
        match descriptor.to_region() {
            Some(region) => {
                sink.insert(region);
                inserted += 1;
            }
            None => debug!(
                "E820: skipping disabled range {:#x}+{:#x}",
                descriptor.base, descriptor.length
            ),
        }
    }
    inserted
}

/// Where [`probe`] found the memory map.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemorySource {
    /// E820 with this many descriptors.
    E820(usize),
    /// `INT 12h` plus E801.
    E801,
    /// `INT 12h` only.
    BaseMemoryOnly,
}

/// Sizes memory with the best query the BIOS supports and records it in
/// `sink`.
pub fn probe<B, S>(bios: &mut B, sink: &mut S) -> MemorySource
where
    B: BiosMemoryServices,
    S: RegionSink + ?Sized,
{
    let mut staging = [AddressRangeDescriptor::zeroed(); E820_MAX_ENTRIES];
    match read_e820(bios, &mut staging) {
        Ok(count) => {
            let inserted = insert_descriptors(sink, staging[..count].iter().copied());
            info!("memory: {inserted} ranges from E820");
            return MemorySource::E820(count);
        }
        Err(e) => warn!("memory: {e}, falling back to legacy queries"),
    }

    let base_kib = bios.base_memory_kib();
    sink.insert(MemoryRegion::new(
        0,
        u64::from(base_kib) * 1024,
        MemoryType::Conventional,
    ));

    let Some(e801) = bios.e801() else {
        warn!("memory: only {base_kib} KiB of base memory known");
        return MemorySource::BaseMemoryOnly;
    };
    sink.insert(MemoryRegion::new(
        LOW_MEMORY_END,
        u64::from(e801.low_kib) * 1024,
        MemoryType::Conventional,
    ));
    sink.insert(MemoryRegion::new(
        EXTENDED_MEMORY_HIGH_BASE,
        u64::from(e801.high_blocks) * 64 * 1024,
        MemoryType::Conventional,
    ));
    info!(
        "memory: E801 reports {} KiB + {} x 64 KiB",
        e801.low_kib, e801.high_blocks
    );
    MemorySource::E801
}

//! # Physical Memory Layout

/// Size of the page granule used throughout the memory map.
pub const PAGE_SIZE: u64 = 4096;

/// First byte past the real-mode addressable low memory.
pub const LOW_MEMORY_END: u64 = 0x0010_0000; // 1 MiB

/// Start of the extended memory reported in 64 KiB blocks by `e801`.
pub const EXTENDED_MEMORY_HIGH_BASE: u64 = 0x0100_0000; // 16 MiB

/// Exclusive ceiling for a loader running in 32-bit protected mode.
///
/// Pages above this address cannot be dereferenced before long mode is
/// enabled, so neither catalog entries nor allocations may be placed there.
pub const MAX_ADDRESSABLE_32: u64 = 0x1_0000_0000; // 4 GiB

/// Exclusive ceiling for a loader that already runs with 64-bit addressing.
pub const MAX_ADDRESSABLE_64: u64 = 0xFFFF_FFFF_FFFF_F000;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(LOW_MEMORY_END.is_multiple_of(PAGE_SIZE));
    assert!(EXTENDED_MEMORY_HIGH_BASE > LOW_MEMORY_END);
    assert!(MAX_ADDRESSABLE_32.is_multiple_of(PAGE_SIZE));
    assert!(MAX_ADDRESSABLE_64.is_multiple_of(PAGE_SIZE));
};

//! # Firmware Memory Collectors
//!
//! Turns whatever the firmware reports about physical memory into
//! [`MemoryRegion`](boot_mmap::MemoryRegion) inserts on a
//! [`RegionSink`](boot_mmap::RegionSink), usually a
//! [`MemoryMap`](boot_mmap::MemoryMap):
//!
//! * [`e820`]: the legacy BIOS queries (E820, with E801 and `INT 12h` as
//!   fallbacks),
//! * [`fdt`]: the memory nodes and reservation block of a devicetree,
//! * [`uefi`]: the UEFI memory descriptors.
//!
//! Collectors insert raw, possibly overlapping and unaligned descriptors;
//! resolving them is the map's job.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod e820;
pub mod fdt;
pub mod uefi;

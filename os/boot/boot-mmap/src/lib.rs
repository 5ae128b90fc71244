//! # Boot-Time Physical Memory Map
//!
//! This crate maintains the canonical map of physical memory while the system
//! boots. Firmware collectors feed it overlapping, unsorted descriptors; it
//! keeps a sorted, non-overlapping and fully coalesced view of the address
//! space, allocates pages from it, and serializes it for the next stage.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Page Allocator / Handoff Writer            │
//! │    • alloc_pages / free_pages                       │
//! │    • MMAP table for the next stage                  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Region Catalog & Resolver                 │
//! │    • Page clamping of incoming descriptors          │
//! │    • Precedence-driven overlap resolution           │
//! │    • Multi-hop coalescing of equal neighbours       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Entry Storage                          │
//! │    • Static node slots embedded in the map          │
//! │    • Pages carved from the map's own memory         │
//! │    • Tagged-slot free list                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Region Catalog ([`MemoryMap`])
//! * **Single Entry Point**: [`MemoryMap::insert`] is the only way in; page
//!   allocation and freeing are expressed through the same resolver
//! * **Snapshots**: [`MemoryMap::enumerate`] copies entries out together with
//!   a generation [`MapKey`]
//!
//! ### Precedence ([`Precedence`])
//! Contested bytes go to the type listed first. The table is an explicit
//! argument: [`Precedence::PROBING`] while collecting and allocating,
//! [`Precedence::RECLAIM`] when pages are freed.
//!
//! ### Entry Storage
//! No heap exists this early. A map embeds
//! [`DEFAULT_STATIC_SLOTS`] node slots (a const generic); when they run out it
//! carves a conventional page below its ceiling, preferably next to existing
//! loader data, records that page as [`MemoryType::LoaderData`] and formats it
//! into further slots. Pages are reached through a [`PhysMapper`].
//!
//! ## Failure Model
//!
//! * Zero-sized descriptors are dropped silently.
//! * Unsatisfiable page requests return [`AllocError`].
//! * Running out of memory for map entries is fatal: the map logs an error and
//!   panics, and the boot binary's panic handler halts the machine.
//!
//! ## Usage
//!
//! ```rust
//! use boot_addresses::PhysicalAddress;
//! use boot_mmap::{IdentityPhysMapper, MemoryMap, MemoryRegion, MemoryType};
//!
//! let mut map: MemoryMap<_> =
//!     MemoryMap::new(IdentityPhysMapper, PhysicalAddress::new(0x1_0000_0000));
//! map.insert(MemoryRegion::new(0x0, 0x9_F000, MemoryType::Conventional));
//! map.insert(MemoryRegion::new(0x9_F000, 0x6_1000, MemoryType::Reserved));
//! assert_eq!(map.len(), 2);
//! ```

#![cfg_attr(not(any(test, doctest, feature = "host")), no_std)]

mod handoff;
mod map;
mod pages;
mod phys_mapper;
mod pool;
mod precedence;
mod region;
mod tree;

#[cfg(any(test, feature = "host"))]
pub mod host;

pub use handoff::HandoffError;
pub use map::{MapKey, MemoryMap, Regions, Snapshot};
pub use pages::AllocError;
pub use phys_mapper::{IdentityPhysMapper, PhysMapper};
pub use pool::DEFAULT_STATIC_SLOTS;
pub use precedence::{Precedence, Side};
pub use region::{MemoryAttributes, MemoryRegion, MemoryType, RegionSink};

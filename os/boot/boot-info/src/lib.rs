//! # Boot Configuration and Handoff Interface
//!
//! This crate defines the memory layout constants and the binary handoff
//! format shared between the boot environment and the stage it loads. It is
//! the single source for values that both sides must agree on.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! Address ceilings and well-known physical boundaries:
//! * **Addressable Ceiling**: Highest physical address the loader may touch
//! * **Legacy Boundaries**: Low memory and the extended memory holes reported
//!   by pre-E820 BIOS queries
//!
//! ### Handoff Tables ([`table`])
//! Self-describing binary tables passed to the next stage:
//! * **Header**: 4-byte ASCII identifier plus 4-byte total length
//! * **Payload**: Packed entries immediately following the header
//! * **Chaining**: The next table starts at the following 8-byte boundary
//!
//! ```text
//! +--------+--------+---------------------------+ pad +--------+---
//! |  "MMAP" | length | MemoryMapEntry × n        | ... |  id    | ...
//! +--------+--------+---------------------------+-----+--------+---
//! ^ 8-byte aligned                                    ^ (length + 7) & !7
//! ```
//!
//! ## ABI Stability
//!
//! All table structures are `#[repr(C, packed)]` and `bytemuck::Pod`, so both
//! sides can view a table as plain bytes without copying or unsafe casts.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
pub mod table;

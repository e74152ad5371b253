//! # Granule Allocator
//!
//! A fixed-granularity bitmap allocator for memory regions that already
//! exist: a statically reserved DMA window, a page pool, a shared-memory
//! segment. The region is cut into equally sized, optionally aligned
//! *granules*, and every allocation is a contiguous run of them.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 GranuleAllocator                    │
//! │    • first-fit allocate / deallocate / reserve      │
//! │    • usage statistics                               │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Granule Table                       │
//! │    • one bit per granule, 1 = allocated             │
//! │    • 32-bit words, owned Vec or carved slice        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Heap Geometry                       │
//! │    • aligned heap start, granule count              │
//! │    • two-pass layout when the table is carved       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Contract
//!
//! * A single allocation covers at most [`MAX_RUN_GRANULES`] (32) granules.
//! * The allocator does not remember allocation sizes. The caller passes the
//!   original size back to [`GranuleAllocator::deallocate`].
//! * Caller bugs (double free, freeing with the wrong size, oversized
//!   requests) surface as [`ContractViolation`]s and never modify the table.
//!   Running out of memory is an ordinary [`AllocError::OutOfMemory`].
//! * The allocator never reads or writes the memory it manages, except for
//!   the table itself when it is carved from the span.
//!
//! ## Concurrency
//!
//! A [`GranuleAllocator`] is not synchronized. Share it through a
//! [`SharedGranuleAllocator`], which runs every operation inside a
//! host-supplied [`CriticalSection`]. Implementing that trait is `unsafe`:
//! an entry must exclude every other holder, itself included. Separate
//! instances share nothing.
//!
//! ## Usage
//!
//! ```rust
//! use mm_gran::{GranConfig, GranuleAllocator};
//!
//! // 1 MiB of page-aligned memory, handed out in 4 KiB pages.
//! let mut heap = GranuleAllocator::new(0x8000_0000, 1024 * 1024, GranConfig::pages())?;
//!
//! let a = heap.allocate(1024)?;
//! let b = heap.allocate(1024)?;
//! assert_eq!(b - a, 4096);
//!
//! heap.deallocate(a, 1024)?;
//! let info = heap.info();
//! assert_eq!(info.free_granules, 255);
//! # Ok::<(), Box<dyn core::error::Error>>(())
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade: construction at `debug`,
//! every allocation, free and reservation at `trace`, and every contract
//! violation at `error`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod allocate;
pub mod config;
mod deallocate;
pub mod error;
pub mod geometry;
mod info;
mod lifecycle;
mod reserve;
pub mod sync;
pub mod table;

pub use config::{GranConfig, MAX_GRANULES, MAX_RUN_GRANULES};
pub use error::{AllocError, ContractViolation, InitError};
pub use geometry::{CarvedGeometry, HeapGeometry};
pub use info::GranInfo;
pub use lifecycle::GranuleAllocator;
pub use sync::{CriticalSection, SharedGranuleAllocator, SpinCriticalSection};
pub use table::GranuleTable;

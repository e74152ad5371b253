//! # Granule Allocator Instances
//!
//! Construction and release of a [`GranuleAllocator`]. The table storage is
//! either a separately allocated `Vec<u32>` ([`GranuleAllocator::new`]) or a
//! slice carved from the front of the managed span
//! ([`GranuleAllocator::carve`]).

use crate::config::GranConfig;
use crate::error::{ContractViolation, InitError};
use crate::geometry::{CarvedGeometry, HeapGeometry};
use crate::table::GranuleTable;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use core::slice;
use log::debug;

/// A fixed-granularity bitmap allocator over one heap region.
///
/// The allocator never touches the memory it manages; it hands out and takes
/// back addresses. It is not synchronized: wrap it in a
/// [`SharedGranuleAllocator`](crate::SharedGranuleAllocator) to share it.
///
/// # Invariants
/// - The table has exactly `geometry.table_words()` words.
/// - Bit `i` of the table is set iff granule `i` is allocated.
#[derive(Debug)]
pub struct GranuleAllocator<S = Vec<u32>> {
    pub(crate) geometry: HeapGeometry,
    pub(crate) table: GranuleTable<S>,
}

impl GranuleAllocator<Vec<u32>> {
    /// Manage `[heap_start, heap_start + heap_size)` with a separately
    /// allocated, zeroed Granule Table.
    ///
    /// # Errors
    /// Any [`InitError`] reported by [`HeapGeometry::compute`].
    pub fn new(heap_start: usize, heap_size: usize, config: GranConfig) -> Result<Self, InitError> {
        let geometry = HeapGeometry::compute(heap_start, heap_size, config)?;
        let words = vec![0; geometry.table_words()];
        Ok(Self::with_table(geometry, words))
    }
}

impl<'a> GranuleAllocator<&'a mut [u32]> {
    /// Manage `[heap, heap + heap_size)`, storing the Granule Table at the
    /// front of the span itself.
    ///
    /// # Errors
    /// Any [`InitError`] reported by [`CarvedGeometry::compute`].
    ///
    /// # Safety
    /// - The span must be valid for writes and must not be accessed through
    ///   any other path for `'a`, except through addresses this allocator
    ///   hands out.
    pub unsafe fn carve(
        heap: NonNull<u8>,
        heap_size: usize,
        config: GranConfig,
    ) -> Result<Self, InitError> {
        let carved = CarvedGeometry::compute(heap.addr().get(), heap_size, config)?;
        let offset = carved.table_start() - heap.addr().get();

        // table_start is u32-aligned and the table ends before the heap.
        #[allow(clippy::cast_ptr_alignment)]
        let words = unsafe {
            let table = heap.as_ptr().add(offset).cast::<u32>();
            ptr::write_bytes(table, 0, carved.table_words());
            slice::from_raw_parts_mut(table, carved.table_words())
        };

        debug!(
            "granule table carved at {:#x}, {} words",
            carved.table_start(),
            carved.table_words()
        );
        Ok(Self::with_table(carved.heap(), words))
    }
}

impl<S> GranuleAllocator<S>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
{
    /// Build an allocator over caller-provided table storage.
    ///
    /// # Errors
    /// - [`InitError::TableSizeMismatch`] unless `storage` holds exactly
    ///   [`HeapGeometry::table_words`] words.
    /// - [`InitError::TableNotZeroed`] if any word is non-zero.
    pub fn from_parts(geometry: HeapGeometry, storage: S) -> Result<Self, InitError> {
        let actual = storage.as_ref().len();
        if actual != geometry.table_words() {
            return Err(InitError::TableSizeMismatch {
                expected: geometry.table_words(),
                actual,
            });
        }
        if storage.as_ref().iter().any(|&w| w != 0) {
            return Err(InitError::TableNotZeroed);
        }
        Ok(Self::with_table(geometry, storage))
    }

    fn with_table(geometry: HeapGeometry, storage: S) -> Self {
        debug!(
            "granule heap at {:#x}..{:#x}: {} granules of {} bytes",
            geometry.heap_start(),
            geometry.heap_end(),
            geometry.granule_count(),
            geometry.granule_size()
        );
        Self {
            geometry,
            table: GranuleTable::new(storage, geometry.granule_count()),
        }
    }

    /// Tear the instance down and hand back the table storage.
    ///
    /// Outstanding allocations are forgotten. Releasing twice is impossible,
    /// as this consumes the allocator.
    #[must_use]
    pub fn release(self) -> S {
        debug!(
            "releasing granule heap at {:#x}",
            self.geometry.heap_start()
        );
        self.table.into_storage()
    }

    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> &HeapGeometry {
        &self.geometry
    }

    #[inline]
    #[must_use]
    pub const fn table(&self) -> &GranuleTable<S> {
        &self.table
    }

    #[inline]
    #[must_use]
    pub const fn heap_start(&self) -> usize {
        self.geometry.heap_start()
    }

    #[inline]
    #[must_use]
    pub const fn granule_count(&self) -> usize {
        self.geometry.granule_count()
    }

    #[inline]
    #[must_use]
    pub const fn granule_size(&self) -> usize {
        self.geometry.granule_size()
    }

    /// `true` if `address` lies inside one of the managed granules.
    #[inline]
    #[must_use]
    pub const fn contains(&self, address: usize) -> bool {
        self.geometry.contains(address)
    }

    /// Granule index of a run of `granules` granules starting at `address`.
    ///
    /// # Errors
    /// - [`ContractViolation::OutOfHeap`] if `address` is not in the heap.
    /// - [`ContractViolation::Misaligned`] unless `address` starts a granule.
    /// - [`ContractViolation::RunOutOfBounds`] if the run ends past the last granule.
    pub(crate) const fn locate_run(
        &self,
        address: usize,
        granules: usize,
    ) -> Result<usize, ContractViolation> {
        let Some(granule) = self.geometry.granule_of(address) else {
            return Err(ContractViolation::OutOfHeap { address });
        };
        if (address - self.geometry.heap_start()) & (self.geometry.granule_size() - 1) != 0 {
            return Err(ContractViolation::Misaligned { address });
        }
        if granule + granules > self.geometry.granule_count() {
            return Err(ContractViolation::RunOutOfBounds { granule, granules });
        }
        Ok(granule)
    }
}

//! # Fixed-Position Reservation
//!
//! Marks an address range as allocated without searching, e.g. to fence off
//! memory that a device or firmware already uses.

use crate::config::MAX_RUN_GRANULES;
use crate::error::ContractViolation;
use crate::lifecycle::GranuleAllocator;
use crate::table::RunSpan;
use log::{error, trace};

impl<S> GranuleAllocator<S>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
{
    /// Mark every granule overlapping `[address, address + size)` allocated.
    ///
    /// The range is clipped to the heap and may cover any number of
    /// granules. Reserved granules can later be returned with
    /// [`deallocate`](Self::deallocate), at most 32 granules per call.
    ///
    /// # Errors
    /// - [`ContractViolation::ZeroSize`] for an empty range.
    /// - [`ContractViolation::OutOfHeap`] if the range misses the heap entirely.
    /// - [`ContractViolation::AlreadyAllocated`] if any overlapped granule is
    ///   in use; nothing is reserved then.
    pub fn reserve(&mut self, address: usize, size: usize) -> Result<(), ContractViolation> {
        let (first, count) = self
            .overlapped_granules(address, size)
            .inspect_err(|e| error!("reserve({address:#x}, {size}): {e}"))?;

        for (granule, granules) in chunks(first, count) {
            self.ensure_free(RunSpan::locate(granule, granules))
                .inspect_err(|e| error!("reserve({address:#x}, {size}): {e}"))?;
        }
        for (granule, granules) in chunks(first, count) {
            self.mark_allocated(self.geometry.address_of(granule), granules)?;
        }

        trace!("reserve({address:#x}, {size}): granules {first}..{}", first + count);
        Ok(())
    }

    /// First granule and granule count overlapped by the range, clipped to the heap.
    const fn overlapped_granules(
        &self,
        address: usize,
        size: usize,
    ) -> Result<(usize, usize), ContractViolation> {
        if size == 0 {
            return Err(ContractViolation::ZeroSize);
        }

        let heap_start = self.geometry.heap_start();
        let heap_end = self.geometry.heap_end();
        let start = if address > heap_start { address } else { heap_start };
        let end = address.saturating_add(size);
        let end = if end < heap_end { end } else { heap_end };
        if start >= end {
            return Err(ContractViolation::OutOfHeap { address });
        }

        let log2 = self.geometry.granule_log2();
        let first = (start - heap_start) >> log2;
        let last = (end - 1 - heap_start) >> log2;
        Ok((first, last - first + 1))
    }
}

/// Split `count` granules from `first` on into runs of at most 32.
fn chunks(first: usize, count: usize) -> impl Iterator<Item = (usize, usize)> {
    (first..first + count)
        .step_by(MAX_RUN_GRANULES)
        .map(move |granule| (granule, MAX_RUN_GRANULES.min(first + count - granule)))
}

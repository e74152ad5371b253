//! # Deallocation
//!
//! The allocator keeps no per-allocation records. Freeing recomputes the run
//! from the caller's address and size and clears it, provided every bit of
//! the run is currently set.

use crate::config::WORD_BITS;
use crate::error::ContractViolation;
use crate::lifecycle::GranuleAllocator;
use crate::table::RunSpan;
use log::{error, trace};

impl<S> GranuleAllocator<S>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
{
    /// Return the run at `address` that was allocated for `size` bytes.
    ///
    /// A size that rounds to more granules than were allocated is reported
    /// once the run reaches a free granule. A size that rounds to fewer
    /// granules cannot be told apart from a valid free and leaks the tail.
    ///
    /// # Errors
    /// A [`ContractViolation`] if the size is zero or too long, the address
    /// does not start a granule inside the heap, the run extends past the
    /// heap, or any granule of the run is free. The table is unchanged then.
    pub fn deallocate(&mut self, address: usize, size: usize) -> Result<(), ContractViolation> {
        let granules = self
            .clear_allocated(address, size)
            .inspect_err(|e| error!("deallocate({address:#x}, {size}): {e}"))?;
        trace!("deallocate({address:#x}, {size}): {granules} granules");
        Ok(())
    }

    fn clear_allocated(&mut self, address: usize, size: usize) -> Result<usize, ContractViolation> {
        let granules = self.run_length(size)?;
        let granule = self.locate_run(address, granules)?;
        let span = RunSpan::locate(granule, granules);
        self.ensure_allocated(span)?;

        let words = self.table.words_mut();
        words[span.word] &= !span.low;
        if let Some(high) = span.high {
            words[span.word + 1] &= !high;
        }
        Ok(granules)
    }

    fn ensure_allocated(&self, span: RunSpan) -> Result<(), ContractViolation> {
        let vacant = |index: usize, mask: u32| -> Result<(), ContractViolation> {
            let missing = !self.table.word(index) & mask;
            if missing == 0 {
                Ok(())
            } else {
                Err(ContractViolation::NotAllocated {
                    granule: index * WORD_BITS + missing.trailing_zeros() as usize,
                })
            }
        };

        vacant(span.word, span.low)?;
        if let Some(high) = span.high {
            vacant(span.word + 1, high)?;
        }
        Ok(())
    }
}

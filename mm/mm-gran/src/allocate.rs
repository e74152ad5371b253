//! # First-Fit Allocation
//!
//! The search walks the table one word at a time. Words with no free bit are
//! skipped outright. Otherwise the word and its successor form a 64-bit
//! window that is shifted right past allocated granules until the low bits
//! show a run of free granules long enough for the request:
//!
//! ```text
//!            next                               curr
//! window: [ 63 ........................ 32 | 31 ......... 3 2 1 0 ]
//!                                                         └─┬──┘
//!                                         run_mask tested here
//! ```
//!
//! Leading allocated granules are skipped in one step by counting trailing
//! ones. When a candidate fails, the window jumps past the lowest allocated
//! granule inside the candidate run, since no run starting at or before it
//! can be free. Every position skipped either way is one where no fit can
//! start, so the first hit is the lowest-addressed fit.

use crate::config::{MAX_RUN_GRANULES, WORD_BITS};
use crate::error::{AllocError, ContractViolation};
use crate::lifecycle::GranuleAllocator;
use crate::table::{RunSpan, run_mask};
use log::{debug, error, trace};

impl<S> GranuleAllocator<S>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
{
    /// Allocate the lowest-addressed run of granules that holds `size` bytes.
    ///
    /// The returned address is granule aligned and therefore satisfies the
    /// configured alignment. The caller must hand the same `size` back to
    /// [`deallocate`](Self::deallocate).
    ///
    /// # Errors
    /// - [`AllocError::OutOfMemory`] if no run of free granules is long enough.
    /// - [`AllocError::Contract`] for a zero size or a request of more than
    ///   [`MAX_RUN_GRANULES`] granules.
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        let granules = self
            .run_length(size)
            .inspect_err(|e| error!("allocate({size}): {e}"))?;

        let Some(granule) = self.find_free_run(granules) else {
            debug!("allocate({size}): no run of {granules} free granules");
            return Err(AllocError::OutOfMemory);
        };

        let address = self.geometry.address_of(granule);
        self.mark_allocated(address, granules)?;
        trace!("allocate({size}): {granules} granules at {address:#x}");
        Ok(address)
    }

    /// Number of granules backing a request of `size` bytes.
    pub(crate) const fn run_length(&self, size: usize) -> Result<usize, ContractViolation> {
        if size == 0 {
            return Err(ContractViolation::ZeroSize);
        }
        let granules = self.geometry.granules_for(size);
        if granules > MAX_RUN_GRANULES {
            return Err(ContractViolation::RunTooLong { size, granules });
        }
        Ok(granules)
    }

    /// Index of the first granule of the lowest run of `granules` free granules.
    fn find_free_run(&self, granules: usize) -> Option<usize> {
        let count = self.geometry.granule_count();
        let mask = run_mask(granules);

        for index in 0..self.table.word_count() {
            let curr = self.table.word(index);
            if curr == u32::MAX {
                continue;
            }

            let base = index * WORD_BITS;
            let next = self.table.word_or_full(index + 1);
            let mut window = u64::from(curr) | (u64::from(next) << WORD_BITS);
            let mut bit = 0;

            while bit < WORD_BITS && base + bit + granules <= count {
                #[allow(clippy::cast_possible_truncation)]
                let low = window as u32;
                if low == u32::MAX {
                    break;
                }

                let shift = match low.trailing_ones() {
                    0 => {
                        let blocked = low & mask;
                        if blocked == 0 {
                            return Some(base + bit);
                        }
                        blocked.trailing_zeros() + 1
                    }
                    ones => ones,
                };

                window >>= shift;
                bit += shift as usize;
            }
        }
        None
    }

    /// Set the bits of the `granules`-long run starting at `address`.
    ///
    /// Every bit is checked before any is set, so a failure leaves the table
    /// as it was.
    ///
    /// # Errors
    /// Any error of [`locate_run`](Self::locate_run), or
    /// [`ContractViolation::AlreadyAllocated`] naming the lowest granule of
    /// the run that is not free.
    pub(crate) fn mark_allocated(
        &mut self,
        address: usize,
        granules: usize,
    ) -> Result<(), ContractViolation> {
        let granule = self.locate_run(address, granules)?;
        let span = RunSpan::locate(granule, granules);
        self.ensure_free(span)?;

        let words = self.table.words_mut();
        words[span.word] |= span.low;
        if let Some(high) = span.high {
            words[span.word + 1] |= high;
        }
        Ok(())
    }

    pub(crate) fn ensure_free(&self, span: RunSpan) -> Result<(), ContractViolation> {
        let taken = |index: usize, mask: u32| -> Result<(), ContractViolation> {
            let overlap = self.table.word(index) & mask;
            if overlap == 0 {
                Ok(())
            } else {
                Err(ContractViolation::AlreadyAllocated {
                    granule: index * WORD_BITS + overlap.trailing_zeros() as usize,
                })
            }
        };

        taken(span.word, span.low)?;
        if let Some(high) = span.high {
            taken(span.word + 1, high)?;
        }
        Ok(())
    }
}

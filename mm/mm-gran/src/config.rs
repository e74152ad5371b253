//! # Allocator Configuration
//!
//! A granule heap is described by two powers of two: the size of one granule
//! and the alignment every allocation must satisfy. Because allocations are
//! always whole runs of granules starting at an aligned heap base, the
//! alignment can never exceed the granule size.

use crate::error::InitError;

/// Width of one Granule Table word in bits.
pub const WORD_BITS: usize = u32::BITS as usize;

/// Longest run of granules a single [`allocate`](crate::GranuleAllocator::allocate)
/// call may request. A run never spans more than two adjacent table words.
pub const MAX_RUN_GRANULES: usize = WORD_BITS;

/// Largest granule count a heap may cover; keeps every bit index in a `u32`.
pub const MAX_GRANULES: usize = u32::MAX as usize;

/// Largest supported `granule_log2` (2 GiB granules).
pub const MAX_GRANULE_LOG2: u8 = 31;

/// Granule and alignment sizes of one allocator instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GranConfig {
    granule_log2: u8,
    align_log2: u8,
}

impl Default for GranConfig {
    /// 64-byte granules without extra alignment.
    fn default() -> Self {
        Self::new(6, 0)
    }
}

impl GranConfig {
    #[must_use]
    pub const fn new(granule_log2: u8, align_log2: u8) -> Self {
        Self {
            granule_log2,
            align_log2,
        }
    }

    /// 4 KiB granules on 4 KiB boundaries, as used for page pools.
    #[must_use]
    pub const fn pages() -> Self {
        Self::new(12, 12)
    }

    #[must_use]
    pub const fn with_granule_log2(mut self, granule_log2: u8) -> Self {
        self.granule_log2 = granule_log2;
        self
    }

    #[must_use]
    pub const fn with_align_log2(mut self, align_log2: u8) -> Self {
        self.align_log2 = align_log2;
        self
    }

    #[inline]
    #[must_use]
    pub const fn granule_log2(&self) -> u8 {
        self.granule_log2
    }

    #[inline]
    #[must_use]
    pub const fn align_log2(&self) -> u8 {
        self.align_log2
    }

    /// Size of one granule in bytes.
    ///
    /// Only meaningful for a configuration that passed [`validate`](Self::validate).
    #[inline]
    #[must_use]
    pub const fn granule_size(&self) -> usize {
        1 << self.granule_log2
    }

    /// Required alignment of the heap base in bytes.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        1 << self.align_log2
    }

    /// Check the parameter ranges.
    ///
    /// # Errors
    /// - [`InitError::GranuleLog2OutOfRange`] unless `1 <= granule_log2 <= 31`.
    /// - [`InitError::AlignmentExceedsGranule`] if `align_log2 > granule_log2`.
    pub const fn validate(&self) -> Result<(), InitError> {
        if self.granule_log2 == 0 || self.granule_log2 > MAX_GRANULE_LOG2 {
            return Err(InitError::GranuleLog2OutOfRange(self.granule_log2));
        }
        if self.align_log2 > self.granule_log2 {
            return Err(InitError::AlignmentExceedsGranule {
                align_log2: self.align_log2,
                granule_log2: self.granule_log2,
            });
        }
        Ok(())
    }
}

const _: () = {
    assert!(MAX_RUN_GRANULES == 32);
    assert!(GranConfig::pages().validate().is_ok());
};

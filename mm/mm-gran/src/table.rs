//! # Granule Table
//!
//! One bit per granule, `1` = allocated, packed into 32-bit words. Word `w`
//! covers granules `32 * w ..= 32 * w + 31`, least significant bit first.
//!
//! ```text
//!  word 0                              word 1
//! ┌────────────────────────────────┐  ┌────────────────────────────────┐
//! │31 ...                   3 2 1 0│  │63 ...               35 34 33 32│
//! └────────────────────────────────┘  └────────────────────────────────┘
//! ```
//!
//! The table knows nothing about addresses; it only answers bit questions.
//! Bits past `granule_count` in the last word are never set.

use crate::config::{MAX_RUN_GRANULES, WORD_BITS};

/// Right-aligned mask of `n` set bits, `1 <= n <= 32`.
///
/// ```rust
/// # use mm_gran::table::run_mask;
/// assert_eq!(run_mask(1), 0b1);
/// assert_eq!(run_mask(5), 0b1_1111);
/// assert_eq!(run_mask(32), u32::MAX);
/// ```
#[inline]
#[must_use]
pub const fn run_mask(n: usize) -> u32 {
    debug_assert!(n >= 1 && n <= MAX_RUN_GRANULES);
    if n >= WORD_BITS {
        u32::MAX
    } else {
        (1 << n) - 1
    }
}

/// The table bits covered by a run of at most 32 granules.
///
/// A run either sits inside one word, or starts in `word` and spills into
/// `word + 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RunSpan {
    /// Index of the first word touched.
    pub word: usize,
    /// Bits of the run in `word`.
    pub low: u32,
    /// Bits of the run in `word + 1`, if it spills over.
    pub high: Option<u32>,
}

impl RunSpan {
    /// Locate the run of `granules` granules starting at granule `granule`.
    #[must_use]
    pub const fn locate(granule: usize, granules: usize) -> Self {
        debug_assert!(granules >= 1 && granules <= MAX_RUN_GRANULES);
        let word = granule / WORD_BITS;
        let bit = granule % WORD_BITS;
        let avail = WORD_BITS - bit;

        if granules > avail {
            Self {
                word,
                low: u32::MAX << bit,
                high: Some(run_mask(granules - avail)),
            }
        } else {
            Self {
                word,
                low: run_mask(granules) << bit,
                high: None,
            }
        }
    }
}

/// Allocation bitmap over word storage `S`.
///
/// `S` is a `Vec<u32>` when the table is allocated on its own, or a
/// `&mut [u32]` when it lives inside the managed span.
#[derive(Debug)]
pub struct GranuleTable<S> {
    words: S,
    granule_count: usize,
}

impl<S> GranuleTable<S>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
{
    /// Wrap zeroed storage of exactly `ceil(granule_count / 32)` words.
    pub(crate) fn new(words: S, granule_count: usize) -> Self {
        debug_assert_eq!(words.as_ref().len(), granule_count.div_ceil(WORD_BITS));
        debug_assert!(words.as_ref().iter().all(|&w| w == 0));
        Self {
            words,
            granule_count,
        }
    }

    pub(crate) fn into_storage(self) -> S {
        self.words
    }

    #[inline]
    pub(crate) fn words_mut(&mut self) -> &mut [u32] {
        self.words.as_mut()
    }

    /// The raw words, word 0 first.
    #[inline]
    #[must_use]
    pub fn words(&self) -> &[u32] {
        self.words.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn granule_count(&self) -> usize {
        self.granule_count
    }

    #[inline]
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words().len()
    }

    /// Word `index`; panics when out of range.
    #[inline]
    #[must_use]
    pub fn word(&self, index: usize) -> u32 {
        self.words()[index]
    }

    /// Word `index`, or all ones past the end of the table.
    #[inline]
    #[must_use]
    pub fn word_or_full(&self, index: usize) -> u32 {
        self.words().get(index).copied().unwrap_or(u32::MAX)
    }

    #[inline]
    #[must_use]
    pub fn is_allocated(&self, granule: usize) -> bool {
        debug_assert!(granule < self.granule_count);
        self.word(granule / WORD_BITS) & (1 << (granule % WORD_BITS)) != 0
    }

    /// Number of free granules.
    #[must_use]
    pub fn free_count(&self) -> usize {
        let padding = self.word_count() * WORD_BITS - self.granule_count;
        let zeros: usize = self.words().iter().map(|w| w.count_zeros() as usize).sum();
        zeros - padding
    }

    /// Length of the longest run of free granules.
    #[must_use]
    pub fn largest_free_run(&self) -> usize {
        let mut best = 0;
        let mut run = 0;
        for (index, &word) in self.words().iter().enumerate() {
            let base = index * WORD_BITS;
            let bits = WORD_BITS.min(self.granule_count - base);
            if word == 0 {
                run += bits;
                continue;
            }
            for bit in 0..bits {
                if word & (1 << bit) == 0 {
                    run += 1;
                } else {
                    best = best.max(run);
                    run = 0;
                }
            }
        }
        best.max(run)
    }
}

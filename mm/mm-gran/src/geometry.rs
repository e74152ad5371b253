//! # Heap Geometry
//!
//! Turns a raw memory span into the layout the allocator works on: the
//! aligned start of the first granule and the number of whole granules that
//! fit behind it.
//!
//! ```text
//! raw_start                                                     raw_end
//! │ pad │ granule 0 │ granule 1 │   ...   │ granule n-1 │ tail │
//!       ▲                                               ▲
//!       heap_start (aligned)                            heap_end
//! ```
//!
//! When the Granule Table lives inside the span it manages, the layout is
//! computed twice (see [`CarvedGeometry`]): once to learn how large the table
//! must be, and once more over whatever remains after the table.
//!
//! ```text
//! raw_start                                                     raw_end
//! │ table │ pad │ granule 0 │ granule 1 │   ...   │ granule m-1 │ tail │
//! ```

use crate::config::{GranConfig, MAX_GRANULES, WORD_BITS};
use crate::error::InitError;

/// Align `x` upwards to `align` (must be a power of two), `None` on overflow.
///
/// ### Examples
/// ```rust
/// # use mm_gran::geometry::align_up;
/// assert_eq!(align_up(0,      4096), Some(0));
/// assert_eq!(align_up(1,      4096), Some(4096));
/// assert_eq!(align_up(4096,   4096), Some(4096));
/// assert_eq!(align_up(0x1231,   16), Some(0x1240));
/// assert_eq!(align_up(usize::MAX, 2), None);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match x.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Number of 32-bit table words needed to track `granules` granules.
#[inline]
#[must_use]
pub const fn table_words(granules: usize) -> usize {
    granules.div_ceil(WORD_BITS)
}

/// Number of bytes a Granule Table for `granules` granules occupies.
#[inline]
#[must_use]
pub const fn table_bytes(granules: usize) -> usize {
    table_words(granules) * size_of::<u32>()
}

/// Layout of one granule heap.
///
/// # Invariants
/// - `heap_start` is a multiple of the configured alignment.
/// - `0 < granule_count <= MAX_GRANULES`.
/// - `heap_start + granule_count * granule_size` does not exceed the end of
///   the span the geometry was computed from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HeapGeometry {
    heap_start: usize,
    granule_count: usize,
    granule_log2: u8,
}

impl HeapGeometry {
    /// Compute the layout of `[raw_start, raw_start + raw_size)`.
    ///
    /// # Errors
    /// - Any error of [`GranConfig::validate`].
    /// - [`InitError::NullHeap`] / [`InitError::EmptyHeap`] for a null or empty span.
    /// - [`InitError::AddressOverflow`] if the span wraps the address space.
    /// - [`InitError::NoGranules`] if not one aligned granule fits.
    /// - [`InitError::TooManyGranules`] if the span holds more than [`MAX_GRANULES`].
    pub const fn compute(
        raw_start: usize,
        raw_size: usize,
        config: GranConfig,
    ) -> Result<Self, InitError> {
        if let Err(e) = config.validate() {
            return Err(e);
        }
        if raw_start == 0 {
            return Err(InitError::NullHeap);
        }
        if raw_size == 0 {
            return Err(InitError::EmptyHeap);
        }
        let Some(raw_end) = raw_start.checked_add(raw_size) else {
            return Err(InitError::AddressOverflow);
        };
        let Some(heap_start) = align_up(raw_start, config.alignment()) else {
            return Err(InitError::AddressOverflow);
        };
        if heap_start >= raw_end {
            return Err(InitError::NoGranules);
        }

        let span = (raw_end - heap_start) & !(config.granule_size() - 1);
        let granule_count = span >> config.granule_log2();
        if granule_count == 0 {
            return Err(InitError::NoGranules);
        }
        if granule_count > MAX_GRANULES {
            return Err(InitError::TooManyGranules(granule_count));
        }

        Ok(Self {
            heap_start,
            granule_count,
            granule_log2: config.granule_log2(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn heap_start(&self) -> usize {
        self.heap_start
    }

    #[inline]
    #[must_use]
    pub const fn granule_count(&self) -> usize {
        self.granule_count
    }

    #[inline]
    #[must_use]
    pub const fn granule_log2(&self) -> u8 {
        self.granule_log2
    }

    #[inline]
    #[must_use]
    pub const fn granule_size(&self) -> usize {
        1 << self.granule_log2
    }

    /// Bytes covered by all granules.
    #[inline]
    #[must_use]
    pub const fn heap_size(&self) -> usize {
        self.granule_count << self.granule_log2
    }

    /// One past the last byte of the last granule.
    #[inline]
    #[must_use]
    pub const fn heap_end(&self) -> usize {
        self.heap_start + self.heap_size()
    }

    /// Words in the Granule Table for this heap.
    #[inline]
    #[must_use]
    pub const fn table_words(&self) -> usize {
        table_words(self.granule_count)
    }

    /// `true` if `address` lies inside one of the granules.
    #[inline]
    #[must_use]
    pub const fn contains(&self, address: usize) -> bool {
        address >= self.heap_start && address < self.heap_end()
    }

    /// Index of the granule containing `address`, if it lies in the heap.
    #[inline]
    #[must_use]
    pub const fn granule_of(&self, address: usize) -> Option<usize> {
        if self.contains(address) {
            Some((address - self.heap_start) >> self.granule_log2)
        } else {
            None
        }
    }

    /// Start address of granule `granule`.
    #[inline]
    #[must_use]
    pub const fn address_of(&self, granule: usize) -> usize {
        debug_assert!(granule < self.granule_count);
        self.heap_start + (granule << self.granule_log2)
    }

    /// Number of granules a request of `size` bytes occupies, rounded up.
    #[inline]
    #[must_use]
    pub const fn granules_for(&self, size: usize) -> usize {
        let whole = size >> self.granule_log2;
        if size & (self.granule_size() - 1) == 0 {
            whole
        } else {
            whole + 1
        }
    }
}

/// Layout of a granule heap whose Granule Table is stored at the front of
/// the span it manages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CarvedGeometry {
    table_start: usize,
    table_words: usize,
    heap: HeapGeometry,
}

impl CarvedGeometry {
    /// Reserve table storage at the start of `[raw_start, raw_start + raw_size)`
    /// and lay out the heap behind it.
    ///
    /// The first pass sizes the table for the whole span. Moving the heap
    /// behind the table can only shrink it, so a table sized by the first
    /// pass always covers the granules found by the second. Both passes go
    /// through [`HeapGeometry::compute`], so they round identically.
    ///
    /// # Errors
    /// Anything [`HeapGeometry::compute`] reports for the raw span, and
    /// [`InitError::SpanTooSmallForTable`] if no granule fits after the table.
    pub const fn compute(
        raw_start: usize,
        raw_size: usize,
        config: GranConfig,
    ) -> Result<Self, InitError> {
        let first = match HeapGeometry::compute(raw_start, raw_size, config) {
            Ok(g) => g,
            Err(e) => return Err(e),
        };

        // raw_start + raw_size was checked by the first pass.
        let raw_end = raw_start + raw_size;
        let Some(table_start) = align_up(raw_start, align_of::<u32>()) else {
            return Err(InitError::AddressOverflow);
        };
        let Some(table_end) = table_start.checked_add(table_bytes(first.granule_count)) else {
            return Err(InitError::AddressOverflow);
        };
        let too_small = InitError::SpanTooSmallForTable {
            required: table_end.saturating_sub(raw_start),
            available: raw_size,
        };
        if table_end >= raw_end {
            return Err(too_small);
        }

        let heap = match HeapGeometry::compute(table_end, raw_end - table_end, config) {
            Ok(g) => g,
            Err(InitError::NoGranules) => return Err(too_small),
            Err(e) => return Err(e),
        };

        Ok(Self {
            table_start,
            table_words: heap.table_words(),
            heap,
        })
    }

    /// Address of the first table word.
    #[inline]
    #[must_use]
    pub const fn table_start(&self) -> usize {
        self.table_start
    }

    /// Table words actually used by [`heap`](Self::heap).
    #[inline]
    #[must_use]
    pub const fn table_words(&self) -> usize {
        self.table_words
    }

    #[inline]
    #[must_use]
    pub const fn heap(&self) -> HeapGeometry {
        self.heap
    }
}

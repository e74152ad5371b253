//! # Errors
//!
//! Two classes of failure exist:
//!
//! * **Contract violations** ([`ContractViolation`]) are caller bugs: an
//!   oversized request, freeing memory that is not allocated, freeing with a
//!   size that does not match the allocation, and so on. The table is never
//!   modified when one is reported.
//! * **Exhaustion** ([`AllocError::OutOfMemory`]) is an ordinary outcome of
//!   [`allocate`](crate::GranuleAllocator::allocate) when no run of free
//!   granules is long enough.
//!
//! Construction failures are reported as [`InitError`].

/// Failure to set up a granule heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("heap start address is null")]
    NullHeap,
    #[error("heap size is zero")]
    EmptyHeap,
    #[error("granule size 2^{0} is out of range (1..=31)")]
    GranuleLog2OutOfRange(u8),
    #[error("alignment 2^{align_log2} exceeds granule size 2^{granule_log2}")]
    AlignmentExceedsGranule { align_log2: u8, granule_log2: u8 },
    #[error("heap holds no complete granule after alignment")]
    NoGranules,
    #[error("heap holds {0} granules, more than a granule table can index")]
    TooManyGranules(usize),
    #[error("granule table needs {required} bytes but the heap only has {available}")]
    SpanTooSmallForTable { required: usize, available: usize },
    #[error("heap span wraps the address space")]
    AddressOverflow,
    #[error("table storage holds {actual} words, expected {expected}")]
    TableSizeMismatch { expected: usize, actual: usize },
    #[error("table storage is not zeroed")]
    TableNotZeroed,
}

/// A caller-induced breach of the allocator's contract.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("zero-sized request")]
    ZeroSize,
    #[error("request of {size} bytes needs {granules} granules, more than 32")]
    RunTooLong { size: usize, granules: usize },
    #[error("address {address:#x} is outside the heap")]
    OutOfHeap { address: usize },
    #[error("address {address:#x} is not on a granule boundary")]
    Misaligned { address: usize },
    #[error("run of {granules} granules at granule {granule} extends past the heap")]
    RunOutOfBounds { granule: usize, granules: usize },
    #[error("granule {granule} is already allocated")]
    AlreadyAllocated { granule: usize },
    #[error("granule {granule} is not allocated")]
    NotAllocated { granule: usize },
}

/// Failure of [`allocate`](crate::GranuleAllocator::allocate).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of memory")]
    OutOfMemory,
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl AllocError {
    /// `true` if the request itself was invalid, as opposed to the heap being full.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

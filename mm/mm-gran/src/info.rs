//! Heap statistics.

use crate::lifecycle::GranuleAllocator;

/// Snapshot of a granule heap's usage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GranInfo {
    /// Log2 of the granule size.
    pub granule_log2: u8,
    /// Granules managed by the heap.
    pub granule_count: usize,
    /// Granules currently free.
    pub free_granules: usize,
    /// Longest run of contiguous free granules.
    pub largest_free_run: usize,
}

impl GranInfo {
    #[inline]
    #[must_use]
    pub const fn granule_size(&self) -> usize {
        1 << self.granule_log2
    }

    #[inline]
    #[must_use]
    pub const fn used_granules(&self) -> usize {
        self.granule_count - self.free_granules
    }

    /// Free bytes, regardless of fragmentation.
    #[inline]
    #[must_use]
    pub const fn free_bytes(&self) -> usize {
        self.free_granules << self.granule_log2
    }
}

impl<S> GranuleAllocator<S>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
{
    /// Scan the table and report its current usage.
    #[must_use]
    pub fn info(&self) -> GranInfo {
        GranInfo {
            granule_log2: self.geometry.granule_log2(),
            granule_count: self.geometry.granule_count(),
            free_granules: self.table.free_count(),
            largest_free_run: self.table.largest_free_run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GranConfig;
    use crate::lifecycle::GranuleAllocator;

    #[test]
    fn info_tracks_live_state() {
        let mut a = GranuleAllocator::new(0x2000, 50 * 64, GranConfig::default()).unwrap();
        let fresh = a.info();
        assert_eq!(fresh.granule_count, 50);
        assert_eq!(fresh.free_granules, 50);
        assert_eq!(fresh.largest_free_run, 50);
        assert_eq!(fresh.used_granules(), 0);
        assert_eq!(fresh.granule_size(), 64);

        let x = a.allocate(64).unwrap();
        a.allocate(30 * 64).unwrap();
        a.deallocate(x, 64).unwrap();

        let info = a.info();
        assert_eq!(info.free_granules, 20);
        assert_eq!(info.used_granules(), 30);
        assert_eq!(info.largest_free_run, 19);
        assert_eq!(info.free_bytes(), 20 * 64);
    }
}

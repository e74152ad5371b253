use mm_gran::{AllocError, ContractViolation, GranConfig, GranuleAllocator, HeapGeometry};

const PAGE: usize = 4096;
const HEAP_BASE: usize = 0x8000_0000;

/// Deterministic xorshift so failures reproduce.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

#[test]
fn page_heap_scenario() {
    let mut heap = GranuleAllocator::new(HEAP_BASE, 1024 * 1024, GranConfig::pages()).unwrap();
    assert_eq!(heap.granule_count(), 256);

    let addrs: Vec<usize> = (0..4).map(|_| heap.allocate(1024).unwrap()).collect();
    for pair in addrs.windows(2) {
        assert_eq!(pair[1] - pair[0], PAGE);
    }
    assert_eq!(addrs[0], HEAP_BASE);

    heap.deallocate(addrs[0], 1024).unwrap();
    heap.deallocate(addrs[1], 1024).unwrap();

    let info = heap.info();
    assert_eq!(info.granule_count, 256);
    assert_eq!(info.free_granules, 254);
    assert!(info.largest_free_run >= 2);
    assert_eq!(info.largest_free_run, 252);
}

#[test]
fn oversized_request_is_not_truncated() {
    let mut heap = GranuleAllocator::new(HEAP_BASE, 1024 * 1024, GranConfig::pages()).unwrap();
    assert_eq!(
        heap.allocate(32 * PAGE + 1),
        Err(AllocError::Contract(ContractViolation::RunTooLong {
            size: 32 * PAGE + 1,
            granules: 33
        }))
    );
    assert_eq!(heap.info().free_granules, 256);
    assert_eq!(heap.allocate(32 * PAGE).unwrap(), HEAP_BASE);
}

#[test]
fn mismatched_free_size_is_flagged() {
    let mut heap = GranuleAllocator::new(HEAP_BASE, 1024 * 1024, GranConfig::pages()).unwrap();
    let addr = heap.allocate(PAGE).unwrap();

    // PAGE rounds to one granule, PAGE + 1 to two
    assert_eq!(
        heap.deallocate(addr, PAGE + 1),
        Err(ContractViolation::NotAllocated { granule: 1 })
    );
    heap.deallocate(addr, PAGE).unwrap();
    assert_eq!(
        heap.deallocate(addr, PAGE),
        Err(ContractViolation::NotAllocated { granule: 0 })
    );
}

#[test]
fn exhaustion_then_recovery() {
    let mut heap = GranuleAllocator::new(HEAP_BASE, 100 * 64, GranConfig::default()).unwrap();
    let mut live = Vec::new();
    while let Ok(addr) = heap.allocate(64) {
        live.push(addr);
    }
    assert_eq!(live.len(), 100);
    for size in [1, 64, 65, 32 * 64] {
        assert_eq!(heap.allocate(size), Err(AllocError::OutOfMemory));
    }

    heap.deallocate(live[50], 64).unwrap();
    assert_eq!(heap.allocate(1).unwrap(), live[50]);
}

#[test]
fn geometry_property_over_many_spans() {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    for _ in 0..2000 {
        let granule_log2 = 1 + rng.below(16) as u8;
        let align_log2 = rng.below(usize::from(granule_log2) + 1) as u8;
        let raw_start = 1 + rng.below(1 << 30);
        let raw_size = 1 + rng.below(1 << 22);
        let config = GranConfig::new(granule_log2, align_log2);

        let Ok(g) = HeapGeometry::compute(raw_start, raw_size, config) else {
            continue;
        };
        assert_eq!(g.heap_start() % config.alignment(), 0);
        assert!(g.heap_start() >= raw_start);
        assert!(g.heap_start() + (g.granule_count() << granule_log2) <= raw_start + raw_size);
    }
}

#[test]
#[cfg(target_pointer_width = "64")]
fn geometry_property_for_large_granules() {
    let mut rng = XorShift(0xD1B5_4A32_D192_ED03);
    for granule_log2 in 17..=31u8 {
        let granule = 1usize << granule_log2;
        for _ in 0..200 {
            let align_log2 = rng.below(usize::from(granule_log2) + 1) as u8;
            let raw_start = 1 + rng.below(1 << 40);
            let raw_size = granule + rng.below(40 * granule);
            let config = GranConfig::new(granule_log2, align_log2);

            let Ok(g) = HeapGeometry::compute(raw_start, raw_size, config) else {
                continue;
            };
            assert_eq!(g.heap_start() % config.alignment(), 0);
            assert!(g.heap_start() >= raw_start);
            assert!(g.heap_start() + (g.granule_count() << granule_log2) <= raw_start + raw_size);
        }
    }
}

#[test]
#[cfg(target_pointer_width = "64")]
fn two_gib_granules() {
    const GRANULE: usize = 1 << 31;
    let base = 4 * GRANULE;
    let mut heap = GranuleAllocator::new(base, 40 * GRANULE, GranConfig::new(31, 31)).unwrap();
    assert_eq!(heap.granule_count(), 40);
    assert_eq!(heap.granule_size(), GRANULE);

    let a = heap.allocate(1).unwrap();
    let b = heap.allocate(GRANULE + 1).unwrap();
    let c = heap.allocate(32 * GRANULE).unwrap();
    assert_eq!(a, base);
    assert_eq!(b, base + GRANULE);
    assert_eq!(c, base + 3 * GRANULE);
    assert_eq!(heap.allocate(6 * GRANULE), Err(AllocError::OutOfMemory));
    assert_eq!(
        heap.allocate(33 * GRANULE),
        Err(AllocError::Contract(ContractViolation::RunTooLong {
            size: 33 * GRANULE,
            granules: 33
        }))
    );

    heap.deallocate(b, GRANULE + 1).unwrap();
    assert_eq!(heap.info().free_granules, 40 - 33);
    assert_eq!(heap.allocate(2 * GRANULE).unwrap(), b);
    heap.deallocate(a, GRANULE).unwrap();
    heap.deallocate(b, 2 * GRANULE).unwrap();
    heap.deallocate(c, 32 * GRANULE).unwrap();
    assert_eq!(heap.info().largest_free_run, 40);
}

/// Random allocate/free traffic checked against a shadow model.
#[test]
fn random_traffic_keeps_allocations_disjoint() {
    const GRANULES: usize = 300;
    let config = GranConfig::new(5, 3);
    let mut heap = GranuleAllocator::new(HEAP_BASE + 3, GRANULES * 32 + 40, config).unwrap();
    let start = heap.heap_start();
    let end = heap.geometry().heap_end();
    let granules = heap.granule_count();

    let mut rng = XorShift(42);
    let mut shadow = vec![false; granules];
    let mut live: Vec<(usize, usize)> = Vec::new();
    let initial = heap.table().words().to_vec();

    for _ in 0..20_000 {
        if live.is_empty() || rng.below(3) != 0 {
            let size = 1 + rng.below(32 * 32);
            let needed = size.div_ceil(32);
            match heap.allocate(size) {
                Ok(addr) => {
                    assert!(addr >= start && addr + needed * 32 <= end);
                    assert_eq!(addr % 8, 0);
                    let first = (addr - start) / 32;
                    for g in first..first + needed {
                        assert!(!shadow[g], "granule {g} handed out twice");
                        shadow[g] = true;
                    }
                    live.push((addr, size));
                }
                Err(AllocError::OutOfMemory) => {
                    // first fit found nothing, so no free run of that length exists
                    let longest = shadow
                        .split(|&used| used)
                        .map(<[bool]>::len)
                        .max()
                        .unwrap_or(0);
                    assert!(longest < needed);
                }
                Err(e) => panic!("unexpected {e}"),
            }
        } else {
            let (addr, size) = live.swap_remove(rng.below(live.len()));
            heap.deallocate(addr, size).unwrap();
            let first = (addr - start) / 32;
            for slot in &mut shadow[first..first + size.div_ceil(32)] {
                *slot = false;
            }
        }

        let info = heap.info();
        assert_eq!(info.free_granules, shadow.iter().filter(|&&u| !u).count());
    }

    for (addr, size) in live.drain(..) {
        heap.deallocate(addr, size).unwrap();
    }
    assert_eq!(heap.table().words(), initial.as_slice());
}

#[test]
fn instances_are_independent() {
    let mut a = GranuleAllocator::new(HEAP_BASE, 8 * PAGE, GranConfig::pages()).unwrap();
    let mut b = GranuleAllocator::new(HEAP_BASE, 8 * PAGE, GranConfig::pages()).unwrap();
    let x = a.allocate(PAGE).unwrap();
    assert_eq!(b.allocate(PAGE).unwrap(), x);
    a.deallocate(x, PAGE).unwrap();
    assert_eq!(b.info().free_granules, 7);
    assert_eq!(a.info().free_granules, 8);
}

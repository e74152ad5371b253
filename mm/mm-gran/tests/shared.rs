use mm_gran::{GranConfig, GranuleAllocator, SharedGranuleAllocator, SpinCriticalSection};
use std::sync::{Arc, Barrier};
use std::thread;

const BASE: usize = 0x4000_0000;

fn shared(granules: usize) -> SharedGranuleAllocator<Vec<u32>, SpinCriticalSection> {
    let heap = GranuleAllocator::new(BASE, granules * 64, GranConfig::default()).unwrap();
    SharedGranuleAllocator::new(heap, SpinCriticalSection::new())
}

#[test]
fn shared_allocator_is_sync() {
    fn takes_sync<T: Sync>(_t: &T) {}
    takes_sync(&shared(32));
}

#[test]
fn contended_traffic_never_overlaps() {
    let threads = 8;
    let rounds = 2_000;

    let heap = Arc::new(shared(1024));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let heap = Arc::clone(&heap);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            let size = 64 * (1 + t % 4);
            for _ in 0..rounds {
                let addr = heap.allocate(size).unwrap();
                // every granule of our run must read back as allocated
                heap.with_critical(|a| {
                    let first = (addr - a.heap_start()) / 64;
                    for g in first..first + size / 64 {
                        assert!(a.table().is_allocated(g));
                    }
                });
                heap.deallocate(addr, size).unwrap();
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let info = heap.info();
    assert_eq!(info.free_granules, 1024);
    assert_eq!(info.largest_free_run, 1024);
}

#[test]
fn concurrent_allocations_are_disjoint() {
    let threads = 4;
    let per_thread = 64;

    let heap = Arc::new(shared(threads * per_thread));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let heap = Arc::clone(&heap);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                (0..per_thread)
                    .map(|_| heap.allocate(64).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<usize> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), threads * per_thread);
    assert!(heap.allocate(1).is_err());
}

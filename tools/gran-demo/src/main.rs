//! Exercise a granule heap over a real, page-aligned buffer.
//!
//! ```text
//! gran-demo [-v|-q] [heap_kib] [granule_log2] [align_log2]
//! ```
//!
//! Defaults to a 1 MiB heap of 4 KiB pages on 4 KiB boundaries.

mod logger;

use crate::logger::StderrLogger;
use log::{LevelFilter, error, info, warn};
use mm_gran::{
    AllocError, ContractViolation, GranConfig, GranuleAllocator, InitError,
    SharedGranuleAllocator, SpinCriticalSection,
};
use std::alloc::{self, Layout, LayoutError};
use std::env;
use std::process::ExitCode;
use std::ptr::NonNull;

const USAGE: &str = "usage: gran-demo [-v|-q] [heap_kib] [granule_log2] [align_log2]";

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("invalid argument {0:?}")]
    BadArgument(String),
    #[error("invalid heap layout")]
    Layout(#[from] LayoutError),
    #[error("{len} bytes at {address:#x} fall outside the backing buffer")]
    OutsideBacking { address: usize, len: usize },
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

struct Args {
    heap_size: usize,
    config: GranConfig,
    level: LevelFilter,
}

impl Args {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self, DemoError> {
        let mut level = LevelFilter::Info;
        let mut positional = Vec::new();
        for arg in args {
            match arg.as_str() {
                "-v" => level = LevelFilter::Trace,
                "-q" => level = LevelFilter::Warn,
                _ => positional.push(arg),
            }
        }

        let number = |index: usize, default: usize| -> Result<usize, DemoError> {
            positional.get(index).map_or(Ok(default), |s| {
                s.parse().map_err(|_| DemoError::BadArgument(s.clone()))
            })
        };
        let log2 = |index: usize, default: u8| -> Result<u8, DemoError> {
            let value = number(index, usize::from(default))?;
            u8::try_from(value).map_err(|_| DemoError::BadArgument(value.to_string()))
        };

        let heap_kib = number(0, 1024)?;
        let heap_size = heap_kib
            .checked_mul(1024)
            .ok_or_else(|| DemoError::BadArgument(heap_kib.to_string()))?;

        Ok(Self {
            heap_size,
            config: GranConfig::new(log2(1, 12)?, log2(2, 12)?),
            level,
        })
    }
}

/// Heap memory from the global allocator, aligned for the granule heap.
struct Backing {
    base: NonNull<u8>,
    layout: Layout,
}

impl Backing {
    fn new(size: usize, align: usize) -> Result<Self, DemoError> {
        if size == 0 {
            return Err(InitError::EmptyHeap.into());
        }
        let layout = Layout::from_size_align(size, align)?;
        // Safety: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(base) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout)
        };
        Ok(Self { base, layout })
    }

    fn start(&self) -> usize {
        self.base.addr().get()
    }

    /// Fill `len` bytes at heap address `address`.
    fn fill(&mut self, address: usize, len: usize, byte: u8) -> Result<(), DemoError> {
        let offset = address
            .checked_sub(self.start())
            .filter(|&o| o.checked_add(len).is_some_and(|end| end <= self.layout.size()))
            .ok_or(DemoError::OutsideBacking { address, len })?;
        // Safety: in bounds of our allocation, checked above.
        unsafe { self.base.as_ptr().add(offset).write_bytes(byte, len) };
        Ok(())
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        // Safety: allocated in Backing::new with this layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

fn run(args: &Args) -> Result<(), DemoError> {
    let mut backing = Backing::new(args.heap_size, args.config.alignment().max(16))?;
    info!("heap base = {:#x}", backing.start());

    let heap = GranuleAllocator::new(backing.start(), args.heap_size, args.config)?;
    let heap = SharedGranuleAllocator::new(heap, SpinCriticalSection::new());

    let mut addrs = [0usize; 4];
    for (n, (slot, pattern)) in addrs.iter_mut().zip(1u8..).enumerate() {
        *slot = heap.allocate(1024)?;
        info!("addr{} = {:#x}", n + 1, *slot);
        backing.fill(*slot, 1024, pattern)?;
    }

    heap.deallocate(addrs[0], 1024)?;
    heap.deallocate(addrs[1], 1024)?;

    // A second free of the same run is a caller bug and must be refused.
    if let Err(e) = heap.deallocate(addrs[0], 1024) {
        warn!("repeated free of addr1 refused: {e}");
    }

    let stats = heap.info();
    println!(
        "total granules = {}, free granules = {}, largest free run = {}",
        stats.granule_count, stats.free_granules, stats.largest_free_run
    );

    let table = heap.into_inner().release();
    info!("released heap, {} table words", table.len());
    Ok(())
}

fn main() -> ExitCode {
    let mut raw = env::args().skip(1).peekable();
    if raw.peek().is_some_and(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let args = match Args::parse(raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = StderrLogger::new(args.level).init() {
        eprintln!("failed to install logger: {e}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

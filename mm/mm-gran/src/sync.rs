//! # Critical Sections
//!
//! [`GranuleAllocator`] performs plain read-modify-write sequences on its
//! table and must not be entered concurrently. The whole scan-and-mark of an
//! allocation and the whole check-and-clear of a free have to run inside one
//! critical section per instance.
//!
//! How that section is obtained is up to the host: a spin flag, an
//! interrupt mask, a scheduler lock. [`CriticalSection`] is the seam, and
//! [`SharedGranuleAllocator`] routes every operation through it.

use crate::error::{AllocError, ContractViolation};
use crate::info::GranInfo;
use crate::lifecycle::GranuleAllocator;
use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// A host-provided mutual exclusion mechanism.
///
/// # Safety
/// Between a return from [`enter`](Self::enter) (or a `true` from
/// [`try_enter`](Self::try_enter)) and the matching [`leave`](Self::leave),
/// no other caller on any thread or interrupt level may also hold the
/// section. A second `enter` while held must block, never succeed, so a
/// section is not re-entrant.
pub unsafe trait CriticalSection {
    /// Block until the section is held by the caller.
    fn enter(&self);

    /// Take the section if it is free, without waiting.
    fn try_enter(&self) -> bool;

    /// Leave the section.
    ///
    /// # Safety
    /// Must only be called by the holder, once per successful entry.
    unsafe fn leave(&self);
}

/// Test-and-test-and-set spin flag for hosts without a better primitive.
#[derive(Debug, Default)]
pub struct SpinCriticalSection {
    held: AtomicBool,
}

impl SpinCriticalSection {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }
}

// Safety: the flag is only cleared by its holder, and a held flag keeps
// every other enter() spinning.
unsafe impl CriticalSection for SpinCriticalSection {
    #[inline]
    fn enter(&self) {
        while !self.try_enter() {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    #[inline]
    fn try_enter(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    #[inline]
    unsafe fn leave(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// A [`GranuleAllocator`] whose every operation runs inside critical section `C`.
pub struct SharedGranuleAllocator<S, C> {
    section: C,
    inner: UnsafeCell<GranuleAllocator<S>>,
}

// Safety: the allocator is only reached between enter() and leave().
unsafe impl<S: Send, C: Sync> Sync for SharedGranuleAllocator<S, C> {}

impl<S, C> SharedGranuleAllocator<S, C>
where
    S: AsRef<[u32]> + AsMut<[u32]>,
    C: CriticalSection,
{
    #[must_use]
    pub const fn new(allocator: GranuleAllocator<S>, section: C) -> Self {
        Self {
            section,
            inner: UnsafeCell::new(allocator),
        }
    }

    /// Run `f` on the allocator inside the critical section.
    ///
    /// The section is left again when `f` returns or unwinds. `f` must not
    /// call back into this same allocator: the nested entry blocks on the
    /// section it is already inside, which deadlocks a spin section. Use
    /// [`try_with_critical`](Self::try_with_critical) where re-entry is
    /// possible.
    #[inline]
    pub fn with_critical<R>(&self, f: impl FnOnce(&mut GranuleAllocator<S>) -> R) -> R {
        let _held = Held::enter(&self.section);
        // Safety: the section excludes every other holder until _held drops.
        f(unsafe { &mut *self.inner.get() })
    }

    /// Like [`with_critical`](Self::with_critical), but `None` instead of
    /// waiting when the section is already held, including by the caller.
    #[inline]
    pub fn try_with_critical<R>(
        &self,
        f: impl FnOnce(&mut GranuleAllocator<S>) -> R,
    ) -> Option<R> {
        let _held = Held::try_enter(&self.section)?;
        // Safety: as in with_critical.
        Some(f(unsafe { &mut *self.inner.get() }))
    }

    /// See [`GranuleAllocator::allocate`].
    ///
    /// # Errors
    /// As [`GranuleAllocator::allocate`].
    pub fn allocate(&self, size: usize) -> Result<usize, AllocError> {
        self.with_critical(|a| a.allocate(size))
    }

    /// See [`GranuleAllocator::deallocate`].
    ///
    /// # Errors
    /// As [`GranuleAllocator::deallocate`].
    pub fn deallocate(&self, address: usize, size: usize) -> Result<(), ContractViolation> {
        self.with_critical(|a| a.deallocate(address, size))
    }

    /// See [`GranuleAllocator::reserve`].
    ///
    /// # Errors
    /// As [`GranuleAllocator::reserve`].
    pub fn reserve(&self, address: usize, size: usize) -> Result<(), ContractViolation> {
        self.with_critical(|a| a.reserve(address, size))
    }

    #[must_use]
    pub fn info(&self) -> GranInfo {
        self.with_critical(|a| a.info())
    }

    /// Direct access; `&mut self` rules out contention.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut GranuleAllocator<S> {
        self.inner.get_mut()
    }

    #[must_use]
    pub fn into_inner(self) -> GranuleAllocator<S> {
        self.inner.into_inner()
    }
}

/// Holds a critical section until dropped.
struct Held<'a, C: CriticalSection> {
    section: &'a C,
}

impl<'a, C: CriticalSection> Held<'a, C> {
    fn enter(section: &'a C) -> Self {
        section.enter();
        Self { section }
    }

    fn try_enter(section: &'a C) -> Option<Self> {
        section.try_enter().then(|| Self { section })
    }
}

impl<C: CriticalSection> Drop for Held<'_, C> {
    fn drop(&mut self) {
        // Safety: entered in Held::enter.
        unsafe { self.section.leave() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GranConfig;
    use core::cell::Cell;

    /// Counts entries and checks they never nest.
    #[derive(Default)]
    struct Recording {
        depth: Cell<u32>,
        entered: Cell<u32>,
    }

    // Safety: single-threaded (Cell is !Sync) and nesting panics.
    unsafe impl CriticalSection for Recording {
        fn enter(&self) {
            assert!(self.try_enter(), "critical section re-entered");
        }

        fn try_enter(&self) -> bool {
            if self.depth.get() != 0 {
                return false;
            }
            self.depth.set(1);
            self.entered.set(self.entered.get() + 1);
            true
        }

        unsafe fn leave(&self) {
            assert_eq!(self.depth.get(), 1);
            self.depth.set(0);
        }
    }

    fn shared() -> SharedGranuleAllocator<alloc::vec::Vec<u32>, Recording> {
        let a = GranuleAllocator::new(0x1_0000, 64 * 64, GranConfig::default()).unwrap();
        SharedGranuleAllocator::new(a, Recording::default())
    }

    #[test]
    fn every_operation_enters_once() {
        let s = shared();
        let x = s.allocate(64).unwrap();
        s.reserve(0x1_0000 + 10 * 64, 64).unwrap();
        s.deallocate(x, 64).unwrap();
        assert_eq!(s.info().free_granules, 63);
        assert_eq!(s.section.entered.get(), 4);
        assert_eq!(s.section.depth.get(), 0);
    }

    #[test]
    fn failures_leave_the_section() {
        let s = shared();
        assert!(s.allocate(0).is_err());
        assert!(s.deallocate(0x1_0000, 64).is_err());
        assert_eq!(s.section.depth.get(), 0);
    }

    #[test]
    fn spin_section_is_reusable() {
        let cs = SpinCriticalSection::new();
        cs.enter();
        unsafe { cs.leave() };
        cs.enter();
        unsafe { cs.leave() };
        assert!(!cs.held.load(Ordering::Relaxed));
    }

    #[test]
    fn spin_section_refuses_a_second_holder() {
        let cs = SpinCriticalSection::new();
        assert!(cs.try_enter());
        assert!(!cs.try_enter());
        unsafe { cs.leave() };
        assert!(cs.try_enter());
        unsafe { cs.leave() };
    }

    #[test]
    fn nested_access_is_refused() {
        let a = GranuleAllocator::new(0x1_0000, 64 * 64, GranConfig::default()).unwrap();
        let s = SharedGranuleAllocator::new(a, SpinCriticalSection::new());

        let nested = s.with_critical(|outer| {
            outer.allocate(64).unwrap();
            s.try_with_critical(|inner| inner.allocate(64))
        });
        assert!(nested.is_none());

        // the outer call left the section, so a fresh one gets through
        let again = s.try_with_critical(|a| a.allocate(64)).unwrap();
        assert_eq!(again, Ok(0x1_0000 + 64));
    }

    #[test]
    fn recording_section_rejects_nesting() {
        let s = shared();
        let nested = s.with_critical(|_| s.try_with_critical(|_| ()));
        assert_eq!(nested, None);
        assert_eq!(s.section.entered.get(), 1);
        assert_eq!(s.section.depth.get(), 0);
    }

    #[test]
    fn into_inner_returns_state() {
        let mut s = shared();
        s.get_mut().allocate(3 * 64).unwrap();
        let a = s.into_inner();
        assert_eq!(a.table().word(0), 0b111);
    }
}

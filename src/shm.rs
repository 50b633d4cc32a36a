use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::SharedClock;
use crate::config::ClockGuard;
use crate::error::Error;

/// Anonymous `MAP_SHARED` mapping created before forking, so every worker
/// process sees the same memory.
///
/// ```text
/// +-------------+----------------------------------+
/// | SharedClock | AtomicU64 bogo counter x workers |
/// +-------------+----------------------------------+
/// ```
pub struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
    workers: usize,
}

// SAFETY: the mapping holds only a `Sync` clock and atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

fn counters_offset() -> usize {
    let align = align_of::<AtomicU64>();
    size_of::<SharedClock>().div_ceil(align) * align
}

impl SharedRegion {
    pub fn new(workers: usize, guard: ClockGuard) -> Result<Self, Error> {
        let len = counters_offset() + workers.max(1) * size_of::<AtomicU64>();
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        let base = NonNull::new(addr as *mut u8)
            .ok_or_else(|| Error::Worker("mmap returned a null mapping".into()))?;

        // SAFETY: fresh page-aligned mapping of at least `len` bytes. Anonymous
        // mappings are zero-filled, which is already a valid `AtomicU64`.
        unsafe {
            ptr::write(base.as_ptr() as *mut SharedClock, SharedClock::new(guard));
        }

        Ok(Self { base, len, workers })
    }

    pub fn clock(&self) -> &SharedClock {
        // SAFETY: initialised in `new`, lives as long as the mapping.
        unsafe { &*(self.base.as_ptr() as *const SharedClock) }
    }

    pub fn counters(&self) -> &[AtomicU64] {
        // SAFETY: `workers` counters follow the clock, inside the mapping.
        unsafe {
            std::slice::from_raw_parts(
                self.base.as_ptr().add(counters_offset()) as *const AtomicU64,
                self.workers,
            )
        }
    }

    pub fn counter(&self, worker: usize) -> &AtomicU64 {
        &self.counters()[worker]
    }

    pub fn total_ops(&self) -> u64 {
        self.counters()
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_region_is_unset_and_zeroed() {
        let region = SharedRegion::new(4, ClockGuard::Atomic).unwrap();
        assert!(!region.clock().is_set());
        assert_eq!(region.clock().guard(), ClockGuard::Atomic);
        assert_eq!(region.counters().len(), 4);
        assert_eq!(region.total_ops(), 0);
    }

    #[test]
    fn test_counters_sum() {
        let region = SharedRegion::new(3, ClockGuard::Spinlock).unwrap();
        region.counter(0).fetch_add(2, Ordering::Relaxed);
        region.counter(2).fetch_add(5, Ordering::Relaxed);
        assert_eq!(region.total_ops(), 7);
    }

    #[test]
    fn test_clock_visible_across_fork() {
        let region = SharedRegion::new(1, ClockGuard::Atomic).unwrap();
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0);
        if pid == 0 {
            region.clock().publish(99.5);
            region.counter(0).store(11, Ordering::Relaxed);
            unsafe { libc::_exit(0) };
        }
        let mut status = 0;
        unsafe { libc::waitpid(pid, &mut status, 0) };
        assert_eq!(region.clock().load(), 99.5);
        assert_eq!(region.total_ops(), 11);
    }
}

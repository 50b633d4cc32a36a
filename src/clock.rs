use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};

use crate::config::ClockGuard;

/// Monotonic time in seconds, comparable across every process on the host.
pub fn now() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 / 1_000_000_000.0
}

/// Reference start time shared by every worker of a run.
///
/// Lives in a `MAP_SHARED` mapping so all forked workers see the same
/// instance. Written once by the leader via [`SharedClock::publish`]; a value
/// `<= 0.0` means the leader has not published yet. The `guard` picked at
/// construction decides which fields carry the timestamp:
///
/// ```text
/// Atomic   -> bits   (f64::to_bits, release store / acquire load)
/// Spinlock -> value  (volatile access under `lock`)
/// Barrier  -> value  (volatile access between SeqCst fences)
/// ```
#[repr(C)]
pub struct SharedClock {
    guard: ClockGuard,
    lock: AtomicBool,
    bits: AtomicU64,
    value: UnsafeCell<f64>,
}

// SAFETY: `value` is only touched under `lock` or between full fences.
unsafe impl Sync for SharedClock {}

struct SpinGuard<'a> {
    lock: &'a AtomicBool,
}

impl<'a> SpinGuard<'a> {
    fn acquire(lock: &'a AtomicBool) -> Self {
        while lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinGuard { lock }
    }
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl SharedClock {
    pub const fn new(guard: ClockGuard) -> Self {
        Self {
            guard,
            lock: AtomicBool::new(false),
            bits: AtomicU64::new(0),
            value: UnsafeCell::new(0.0),
        }
    }

    pub fn guard(&self) -> ClockGuard {
        self.guard
    }

    /// Publish the reference time. Only the leader calls this, once per run.
    pub fn publish(&self, t: f64) {
        match self.guard {
            ClockGuard::Atomic => self.bits.store(t.to_bits(), Ordering::Release),
            ClockGuard::Spinlock => {
                let _held = SpinGuard::acquire(&self.lock);
                // SAFETY: exclusive access while the spinlock is held.
                unsafe { std::ptr::write_volatile(self.value.get(), t) };
            }
            ClockGuard::Barrier => {
                fence(Ordering::SeqCst);
                // SAFETY: racy by construction; aligned f64 stores do not tear
                // on the 64-bit targets this runs on.
                unsafe { std::ptr::write_volatile(self.value.get(), t) };
                fence(Ordering::SeqCst);
            }
        }
    }

    /// One read of the timestamp with the configured guard.
    pub fn load(&self) -> f64 {
        match self.guard {
            ClockGuard::Atomic => f64::from_bits(self.bits.load(Ordering::Acquire)),
            ClockGuard::Spinlock => {
                let _held = SpinGuard::acquire(&self.lock);
                // SAFETY: exclusive access while the spinlock is held.
                unsafe { std::ptr::read_volatile(self.value.get()) }
            }
            ClockGuard::Barrier => {
                fence(Ordering::SeqCst);
                // SAFETY: see `publish`.
                let t = unsafe { std::ptr::read_volatile(self.value.get()) };
                fence(Ordering::SeqCst);
                t
            }
        }
    }

    pub fn is_set(&self) -> bool {
        self.load() > 0.0
    }

    /// Spin until the leader has published, or until `keep_waiting` returns
    /// false. Returns the last value read, which is `<= 0.0` only when the
    /// wait was abandoned.
    pub fn wait(&self, mut keep_waiting: impl FnMut() -> bool) -> f64 {
        loop {
            let t = self.load();
            if t > 0.0 || !keep_waiting() {
                return t;
            }
            std::hint::spin_loop();
        }
    }
}

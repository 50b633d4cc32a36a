pub mod cpu;

use std::hint::black_box;
use std::sync::atomic::{fence, Ordering};

/// Iterations of the empty countdown loop.
const LOOP_COUNT: u32 = 1000;

/// One way of burning a little CPU time during a busy phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyOp {
    None,
    Nop,
    Pause,
    YieldHint,
    SchedYield,
    HwRandom,
    MemFence,
    Loop,
}

impl BusyOp {
    pub fn name(&self) -> &'static str {
        match self {
            BusyOp::None => "none",
            BusyOp::Nop => "nop",
            BusyOp::Pause => "pause",
            BusyOp::YieldHint => "yield",
            BusyOp::SchedYield => "sched_yield",
            BusyOp::HwRandom => "rdrand",
            BusyOp::MemFence => "mfence",
            BusyOp::Loop => "loop",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BusyOp::None => "return immediately",
            BusyOp::Nop => "short run of nop instructions",
            BusyOp::Pause => "x86 pause spin-wait hint",
            BusyOp::YieldHint => "Arm yield hint",
            BusyOp::SchedYield => "sched_yield() system call",
            BusyOp::HwRandom => "hardware random instruction, retried until ready",
            BusyOp::MemFence => "full memory fence",
            BusyOp::Loop => "empty countdown loop",
        }
    }

    /// Run the primitive once.
    #[inline]
    pub fn execute(&self) {
        match self {
            BusyOp::None => {}
            BusyOp::Nop => cpu::nops(),
            BusyOp::Pause => {
                #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
                cpu::pause();
                #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
                cpu::nops();
            }
            BusyOp::YieldHint => {
                #[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
                cpu::yield_hint();
                #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
                cpu::nops();
            }
            BusyOp::SchedYield => unsafe {
                libc::sched_yield();
            },
            BusyOp::HwRandom => cpu::hw_random_delay(),
            BusyOp::MemFence => fence(Ordering::SeqCst),
            BusyOp::Loop => {
                let mut i = LOOP_COUNT;
                while black_box(i) > 0 {
                    i -= 1;
                }
            }
        }
    }
}

/// Capabilities that decide which primitives make it into a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub pause: bool,
    pub yield_hint: bool,
    /// Architecture has a hardware random instruction at all. Whether this
    /// CPU implements it is checked inside the primitive.
    pub hw_random_arch: bool,
    pub hw_random: bool,
}

impl Capabilities {
    /// Probe the running CPU. Call once per process.
    pub fn detect() -> Self {
        Self {
            pause: cpu::has_pause(),
            yield_hint: cpu::has_yield_hint(),
            hw_random_arch: cfg!(target_arch = "x86_64"),
            hw_random: cpu::has_hw_random(),
        }
    }
}

/// Ordered set of busy primitives, resolved once from [`Capabilities`].
#[derive(Debug, Clone)]
pub struct Registry {
    ops: Vec<BusyOp>,
}

impl Registry {
    pub fn new(caps: Capabilities) -> Self {
        let mut ops = vec![BusyOp::None, BusyOp::Nop];
        if caps.pause {
            ops.push(BusyOp::Pause);
        }
        if caps.yield_hint {
            ops.push(BusyOp::YieldHint);
        }
        ops.push(BusyOp::SchedYield);
        if caps.hw_random_arch {
            ops.push(BusyOp::HwRandom);
        }
        ops.push(BusyOp::MemFence);
        ops.push(BusyOp::Loop);
        Self { ops }
    }

    pub fn detect() -> Self {
        Self::new(Capabilities::detect())
    }

    /// Registry with an explicit list of primitives. Panics on an empty list.
    #[cfg(test)]
    pub fn from_ops(ops: Vec<BusyOp>) -> Self {
        assert!(!ops.is_empty(), "busy-op registry cannot be empty");
        Self { ops }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BusyOp] {
        &self.ops
    }

    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            ops: &self.ops,
            index: 0,
        }
    }
}

/// Round-robin position in a [`Registry`].
#[derive(Debug)]
pub struct Cursor<'a> {
    ops: &'a [BusyOp],
    index: usize,
}

impl Cursor<'_> {
    /// Return the current primitive and step to the next, wrapping at the end.
    pub fn advance(&mut self) -> BusyOp {
        let op = self.ops[self.index];
        self.index += 1;
        if self.index >= self.ops.len() {
            self.index = 0;
        }
        op
    }
}

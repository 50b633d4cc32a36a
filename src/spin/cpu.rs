//! Architecture-specific spin instructions and the RDRAND capability probe.

// ---------------------------------------------------------------------------
// x86 / x86_64
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::asm;
    use core::sync::atomic::{AtomicU8, Ordering};

    // 0 = unchecked, 1 = absent, 2 = present
    static RDRAND_SUPPORT: AtomicU8 = AtomicU8::new(0);

    /// Checks CPUID leaf 1, ECX bit 30 for RDRAND support.
    pub fn has_rdrand() -> bool {
        let cached = RDRAND_SUPPORT.load(Ordering::Relaxed);
        if cached != 0 {
            return cached == 2;
        }

        // SAFETY: CPUID is always available on x86_64.
        #[allow(unused_unsafe)]
        let ecx = unsafe { core::arch::x86_64::__cpuid(1) }.ecx;

        let present = (ecx >> 30) & 1 == 1;
        RDRAND_SUPPORT.store(if present { 2 } else { 1 }, Ordering::Relaxed);
        present
    }

    /// Executes RDRAND until the carry flag reports success. The value is
    /// discarded; only the time spent matters.
    ///
    /// # Safety
    /// The caller must have checked [`has_rdrand`].
    pub unsafe fn rdrand_until_ready() {
        loop {
            let success: u8;
            asm!(
                "rdrand {val}",
                "setc {ok}",
                val = out(reg) _,
                ok = out(reg_byte) success,
                options(nomem, nostack),
            );
            if success != 0 {
                return;
            }
        }
    }
}

/// True when the CPU exposes a hardware random instruction. Cached after the
/// first call.
pub fn has_hw_random() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        x86::has_rdrand()
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Run the hardware random instruction once, retrying until it succeeds.
/// Falls back to [`nops`] when the instruction is missing.
pub fn hw_random_delay() {
    #[cfg(target_arch = "x86_64")]
    {
        if x86::has_rdrand() {
            // SAFETY: capability checked just above.
            unsafe { x86::rdrand_until_ready() };
            return;
        }
    }
    nops();
}

/// Nine back-to-back `nop` instructions.
#[inline(never)]
pub fn nops() {
    #[cfg(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "arm",
        target_arch = "aarch64",
        target_arch = "riscv64",
        target_arch = "loongarch64"
    ))]
    unsafe {
        core::arch::asm!(
            "nop", "nop", "nop", "nop", "nop", "nop", "nop", "nop", "nop",
            options(nomem, nostack, preserves_flags),
        );
    }

    #[cfg(not(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "arm",
        target_arch = "aarch64",
        target_arch = "riscv64",
        target_arch = "loongarch64"
    )))]
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

/// x86 `pause`: tells the core this is a spin-wait loop.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(never)]
pub fn pause() {
    unsafe {
        core::arch::asm!("pause", options(nomem, nostack, preserves_flags));
    }
}

/// Arm `yield`: hints that the hardware thread slot can be given away.
#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
#[inline(never)]
pub fn yield_hint() {
    unsafe {
        core::arch::asm!("yield", options(nomem, nostack, preserves_flags));
    }
}

pub const fn has_pause() -> bool {
    cfg!(any(target_arch = "x86", target_arch = "x86_64"))
}

pub const fn has_yield_hint() -> bool {
    cfg!(any(target_arch = "arm", target_arch = "aarch64"))
}

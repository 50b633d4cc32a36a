use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock;
use crate::config::SyncloadConfig;
use crate::engine::{LoadCycle, Phases, ProcState, WorkerHost};
use crate::error::Error;
use crate::shm::SharedRegion;
use crate::spin::Registry;

static STOP: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

extern "C" fn signal_handler(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

/// Forked workers inherit these handlers.
fn install_signal_handlers() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = signal_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

fn report_state(instance: usize, state: ProcState) {
    log::debug!(target: "syncload::worker", "worker {}: state {}", instance, state.name());

    #[cfg(target_os = "linux")]
    {
        let name = match state {
            ProcState::Run => c"syncload-run",
            ProcState::Deinit => c"syncload-deinit",
        };
        unsafe {
            libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0);
        }
    }
}

/// Worker-side collaborators for a forked worker process.
pub struct ProcessHost<'a> {
    instance: usize,
    counter: &'a AtomicU64,
    max_ops: u64,
}

impl<'a> ProcessHost<'a> {
    pub fn new(instance: usize, counter: &'a AtomicU64, max_ops: u64) -> Self {
        Self {
            instance,
            counter,
            max_ops,
        }
    }
}

impl WorkerHost for ProcessHost<'_> {
    fn instance(&self) -> usize {
        self.instance
    }

    fn now(&self) -> f64 {
        clock::now()
    }

    fn sleep_ns(&mut self, ns: u64) {
        thread::sleep(Duration::from_nanos(ns));
    }

    fn keep_running(&self) -> bool {
        !self.stop_requested()
            && (self.max_ops == 0 || self.counter.load(Ordering::Relaxed) < self.max_ops)
    }

    fn stop_requested(&self) -> bool {
        STOP.load(Ordering::Relaxed)
    }

    fn inc_counter(&mut self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    fn set_state(&mut self, state: ProcState) {
        report_state(self.instance, state);
    }
}

fn run_worker(
    instance: usize,
    region: &SharedRegion,
    registry: &Registry,
    cfg: &SyncloadConfig,
) -> i32 {
    let mut host = ProcessHost::new(instance, region.counter(instance), cfg.ops);
    let report = LoadCycle::new(Phases::from(cfg), registry).run(&mut host, region.clock());
    log::info!(
        target: "syncload::worker",
        "worker {}: {} cycles completed, deadline {:.3}s past reference",
        instance,
        report.cycles,
        report.timeout - report.reference,
    );
    libc::EXIT_SUCCESS
}

struct Child {
    instance: usize,
    pid: libc::pid_t,
}

fn signal_all(children: &[Child], sig: libc::c_int) {
    for child in children {
        unsafe {
            libc::kill(child.pid, sig);
        }
    }
}

/// Describe an abnormal exit, or `None` when the worker ended cleanly.
fn exit_problem(status: libc::c_int, sent_kill: bool) -> Option<String> {
    if libc::WIFEXITED(status) {
        let code = libc::WEXITSTATUS(status);
        return (code != 0).then(|| format!("exited with status {}", code));
    }
    if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        let expected = sig == libc::SIGTERM
            || sig == libc::SIGINT
            || (sig == libc::SIGKILL && sent_kill);
        return (!expected).then(|| format!("killed by signal {}", sig));
    }
    Some(format!("ended with wait status {:#x}", status))
}

/// Reap every child. Sends SIGTERM once the run deadline passes or a stop
/// was requested, then SIGKILL to anything still alive after `grace`.
fn supervise(
    mut live: Vec<Child>,
    deadline: Option<Instant>,
    grace: Duration,
) -> Result<Vec<String>, Error> {
    let mut failures = Vec::new();
    let mut terminated_at: Option<Instant> = None;
    let mut sent_kill = false;

    while !live.is_empty() {
        let now = Instant::now();
        if terminated_at.is_none()
            && (STOP.load(Ordering::Relaxed) || deadline.is_some_and(|d| now >= d))
        {
            log::info!("stopping {} workers", live.len());
            STOP.store(true, Ordering::Relaxed);
            signal_all(&live, libc::SIGTERM);
            terminated_at = Some(now);
        }
        if let Some(t) = terminated_at {
            if !sent_kill && now.duration_since(t) >= grace {
                log::warn!("{} workers ignored SIGTERM, killing", live.len());
                signal_all(&live, libc::SIGKILL);
                sent_kill = true;
            }
        }

        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid > 0 {
            if let Some(pos) = live.iter().position(|c| c.pid == pid) {
                let child = live.swap_remove(pos);
                if let Some(problem) = exit_problem(status, sent_kill) {
                    log::error!("worker {} (pid {}) {}", child.instance, pid, problem);
                    failures.push(format!("worker {} {}", child.instance, problem));
                }
            }
        } else if pid == 0 {
            thread::sleep(POLL_INTERVAL);
        } else {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => break,
                _ => return Err(err.into()),
            }
        }
    }

    Ok(failures)
}

/// Reap the workers already started when a later fork fails. Problems are
/// logged, not returned, so the fork error stays the one reported.
fn reap_after_failed_fork(children: Vec<Child>, grace: Duration) -> usize {
    match supervise(children, None, grace) {
        Ok(failures) => failures.len(),
        Err(e) => {
            log::warn!("cleanup after failed fork: {}", e);
            1
        }
    }
}

/// Grace period between SIGTERM and SIGKILL: a worker only notices a stop
/// between phases, so allow two full cycles at maximum jitter.
fn stop_grace(cfg: &SyncloadConfig) -> Duration {
    let cycle_ms = (cfg.msbusy + cfg.mssleep) as f64 * 1.1;
    Duration::from_millis((2.0 * cycle_ms) as u64) + Duration::from_secs(1)
}

pub fn run(cfg: &SyncloadConfig) -> Result<(), Error> {
    let timeout = cfg.timeout_duration()?;
    let region = SharedRegion::new(cfg.workers, cfg.clock_guard)?;
    let registry = Registry::detect();

    install_signal_handlers();

    log::info!(
        "started: workers={} busy={}ms sleep={}ms ops={} guard={} busy-ops={}",
        cfg.workers,
        cfg.msbusy,
        cfg.mssleep,
        cfg.ops,
        region.clock().guard().name(),
        registry.len(),
    );

    let started = Instant::now();
    let mut children = Vec::with_capacity(cfg.workers);
    for instance in 0..cfg.workers {
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = std::io::Error::last_os_error();
            STOP.store(true, Ordering::Relaxed);
            signal_all(&children, libc::SIGTERM);
            reap_after_failed_fork(children, stop_grace(cfg));
            return Err(Error::Worker(format!(
                "fork of worker {} failed: {}",
                instance, err
            )));
        }
        if pid == 0 {
            let code = run_worker(instance, &region, &registry, cfg);
            log::logger().flush();
            unsafe { libc::_exit(code) };
        }
        children.push(Child { instance, pid });
    }

    let failures = supervise(children, timeout.map(|d| started + d), stop_grace(cfg))?;

    if !region.clock().is_set() {
        log::warn!("leader never published a reference time");
    }

    let elapsed = started.elapsed().as_secs_f64();
    let total = region.total_ops();
    for (instance, counter) in region.counters().iter().enumerate() {
        log::debug!(
            "worker {}: {} bogo ops",
            instance,
            counter.load(Ordering::Relaxed)
        );
    }
    log::info!(
        "completed: {} bogo ops in {:.2}s ({:.2} ops/s)",
        total,
        elapsed,
        if elapsed > 0.0 { total as f64 / elapsed } else { 0.0 },
    );

    if !failures.is_empty() {
        return Err(Error::Worker(failures.join("; ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_host_ops_limit() {
        let counter = AtomicU64::new(0);
        let mut host = ProcessHost::new(2, &counter, 2);
        assert_eq!(host.instance(), 2);
        assert!(host.keep_running());
        host.inc_counter();
        assert!(host.keep_running());
        host.inc_counter();
        assert!(!host.keep_running());
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_process_host_unlimited_ops() {
        let counter = AtomicU64::new(1_000_000);
        let host = ProcessHost::new(0, &counter, 0);
        assert!(host.keep_running());
    }

    #[test]
    fn test_process_host_time_advances() {
        let counter = AtomicU64::new(0);
        let mut host = ProcessHost::new(0, &counter, 0);
        let before = host.now();
        host.sleep_ns(2_000_000);
        assert!(host.now() - before >= 0.002);
    }

    #[test]
    fn test_exit_problem_classification() {
        // Wait statuses as encoded by Linux: exit code in bits 8-15, signal in 0-6.
        assert_eq!(exit_problem(0, false), None);
        assert!(exit_problem(1 << 8, false).is_some());
        assert_eq!(exit_problem(libc::SIGTERM, false), None);
        assert!(exit_problem(libc::SIGKILL, false).is_some());
        assert_eq!(exit_problem(libc::SIGKILL, true), None);
        assert!(exit_problem(libc::SIGSEGV, false).is_some());
    }

    #[test]
    fn test_reap_after_failed_fork_collects_children() {
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0);
        if pid == 0 {
            unsafe { libc::_exit(0) };
        }
        let children = vec![Child { instance: 0, pid }];
        assert_eq!(reap_after_failed_fork(children, Duration::from_secs(5)), 0);

        let mut status = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        assert_eq!(ret, -1, "child should already be reaped");
    }

    #[test]
    fn test_stop_grace_covers_two_cycles() {
        let cfg = SyncloadConfig {
            msbusy: 1000,
            mssleep: 500,
            ..Default::default()
        };
        assert!(stop_grace(&cfg) >= Duration::from_millis(3300));
    }
}

use crate::clock::SharedClock;
use crate::config::SyncloadConfig;
use crate::jitter::{jitter, Mwc};
use crate::spin::{BusyOp, Registry};

/// Process states reported to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Run,
    Deinit,
}

impl ProcState {
    pub fn name(&self) -> &'static str {
        match self {
            ProcState::Run => "run",
            ProcState::Deinit => "deinit",
        }
    }
}

/// Everything a worker needs from its surroundings.
pub trait WorkerHost {
    /// Stable worker index; index 0 is the leader.
    fn instance(&self) -> usize;

    /// Current time in seconds. Must share an epoch with every other worker.
    fn now(&self) -> f64;

    fn sleep_ns(&mut self, ns: u64);

    /// False once a stop was requested or the bogo-op limit was reached.
    fn keep_running(&self) -> bool;

    /// True once a stop was requested, ignoring the bogo-op limit.
    fn stop_requested(&self) -> bool;

    fn inc_counter(&mut self);

    fn set_state(&mut self, state: ProcState);

    /// Invoke one busy primitive.
    fn spin(&mut self, op: BusyOp) {
        op.execute();
    }
}

/// Nominal phase lengths, converted once from the millisecond settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phases {
    pub busy_secs: f64,
    pub sleep_secs: f64,
    pub sleep_ns: u64,
}

impl Phases {
    pub fn from_millis(msbusy: u64, mssleep: u64) -> Self {
        Self {
            busy_secs: msbusy as f64 / 1000.0,
            sleep_secs: mssleep as f64 / 1000.0,
            sleep_ns: mssleep.saturating_mul(1_000_000),
        }
    }
}

impl From<&SyncloadConfig> for Phases {
    fn from(cfg: &SyncloadConfig) -> Self {
        Self::from_millis(cfg.msbusy, cfg.mssleep)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    /// Reference time the worker anchored to; `<= 0.0` if it gave up waiting.
    pub reference: f64,
    /// Deadline reached when the loop stopped.
    pub timeout: f64,
    pub cycles: u64,
}

/// Per-worker busy/sleep loop anchored to the shared reference time.
pub struct LoadCycle<'a> {
    phases: Phases,
    registry: &'a Registry,
    rng: Mwc,
}

impl<'a> LoadCycle<'a> {
    pub fn new(phases: Phases, registry: &'a Registry) -> Self {
        Self {
            phases,
            registry,
            rng: Mwc::default(),
        }
    }

    /// Run until the host asks to stop.
    ///
    /// `timeout` is seeded from the reference time and only ever advanced by
    /// phase lengths, so phase boundaries stay anchored to the reference
    /// instead of drifting with loop overhead.
    pub fn run<H: WorkerHost>(&mut self, host: &mut H, clock: &SharedClock) -> CycleReport {
        if host.instance() == 0 {
            clock.publish(host.now());
        }
        let reference = clock.wait(|| host.keep_running());

        log::debug!(
            target: "syncload::worker",
            "worker {}: reference {:.6}s, busy {:.3}s, sleep {:.3}s, {} busy ops",
            host.instance(),
            reference,
            self.phases.busy_secs,
            self.phases.sleep_secs,
            self.registry.len(),
        );

        host.set_state(ProcState::Run);

        let mut timeout = reference;
        let mut cycles = 0u64;
        let mut cursor = self.registry.cursor();
        let Phases {
            busy_secs,
            sleep_secs,
            sleep_ns,
        } = self.phases;

        while host.keep_running() {
            let op = cursor.advance();

            timeout += busy_secs + jitter(&mut self.rng, busy_secs);
            while host.now() < timeout {
                host.spin(op);
            }

            if host.stop_requested() {
                break;
            }

            timeout += sleep_secs + jitter(&mut self.rng, sleep_secs);
            if host.now() < timeout {
                host.sleep_ns(sleep_ns);
            }

            host.inc_counter();
            cycles += 1;
        }

        host.set_state(ProcState::Deinit);

        CycleReport {
            reference,
            timeout,
            cycles,
        }
    }
}

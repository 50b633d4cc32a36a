use std::io::{self, Write};

use crate::config::SyncloadConfig;
use crate::error::Error;
use crate::spin::{Capabilities, Registry};

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

fn write_report<W: Write>(
    out: &mut W,
    caps: Capabilities,
    registry: &Registry,
    cfg: &SyncloadConfig,
) -> io::Result<()> {
    writeln!(out, "syncload probe")?;
    writeln!(out)?;
    writeln!(out, "Capabilities:")?;
    writeln!(out, "  spin-wait hint (pause):     {}", yes_no(caps.pause))?;
    writeln!(out, "  cooperative yield hint:     {}", yes_no(caps.yield_hint))?;
    writeln!(out, "  hardware random (rdrand):   {}", yes_no(caps.hw_random))?;
    if caps.hw_random_arch && !caps.hw_random {
        writeln!(out, "    rdrand busy op falls back to nop")?;
    }
    writeln!(out)?;
    writeln!(out, "Busy operations (round-robin order):")?;
    for (i, op) in registry.ops().iter().enumerate() {
        writeln!(out, "  {:>2}. {:<12} {}", i, op.name(), op.description())?;
    }
    writeln!(out)?;
    writeln!(out, "Settings:")?;
    writeln!(out, "  workers:     {}", cfg.workers)?;
    writeln!(out, "  busy:        {} ms", cfg.msbusy)?;
    writeln!(out, "  sleep:       {} ms", cfg.mssleep)?;
    if cfg.ops == 0 {
        writeln!(out, "  ops:         unlimited")?;
    } else {
        writeln!(out, "  ops:         {} per worker", cfg.ops)?;
    }
    match cfg.timeout.as_deref() {
        Some(t) => writeln!(out, "  timeout:     {}", t)?,
        None => writeln!(out, "  timeout:     none")?,
    }
    writeln!(out, "  clock guard: {}", cfg.clock_guard.name())?;
    Ok(())
}

pub fn run(cfg: &SyncloadConfig) -> Result<(), Error> {
    let caps = Capabilities::detect();
    let registry = Registry::new(caps);
    log::debug!("probed {} busy ops", registry.len());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_report(&mut out, caps, &registry, cfg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lists_every_op() {
        let caps = Capabilities {
            pause: true,
            yield_hint: false,
            hw_random_arch: true,
            hw_random: false,
        };
        let registry = Registry::new(caps);
        let cfg = SyncloadConfig {
            workers: 2,
            ops: 10,
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_report(&mut buf, caps, &registry, &cfg).unwrap();
        let text = String::from_utf8(buf).unwrap();

        for op in registry.ops() {
            assert!(text.contains(op.name()), "missing {}", op.name());
        }
        assert!(text.contains("falls back to nop"));
        assert!(text.contains("10 per worker"));
        assert!(text.contains("clock guard: atomic"));
    }
}

mod cli;
mod clock;
mod config;
mod engine;
mod error;
mod jitter;
mod logging;
mod probe;
mod shm;
mod spin;
mod supervisor;

use std::path::Path;
use std::process;

use clap::Parser;

use cli::{Cli, Command, LoadArgs};
use config::SyncloadConfig;
use error::Error;

/// Build a SyncloadConfig by layering: defaults → TOML file → CLI overrides.
fn build_config(config_file: Option<&Path>, load: &LoadArgs) -> Result<SyncloadConfig, Error> {
    let mut cfg = config::load_config(config_file)?.syncload;

    // Apply CLI overrides (only if explicitly set)
    if let Some(v) = load.workers {
        cfg.workers = v;
    }
    if let Some(v) = load.msbusy {
        cfg.msbusy = v;
    }
    if let Some(v) = load.mssleep {
        cfg.mssleep = v;
    }
    if let Some(v) = load.ops {
        cfg.ops = v;
    }
    if let Some(ref v) = load.timeout {
        cfg.timeout = Some(v.clone());
    }
    if let Some(v) = load.clock_guard {
        cfg.clock_guard = v;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log);

    let cfg = match build_config(cli.config_file.as_deref(), &cli.load) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Command::Probe) => probe::run(&cfg),
        None => supervisor::run(&cfg),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        process::exit(1);
    }
}

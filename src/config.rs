use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

pub const MS_DEFAULT: u64 = 125;
pub const MS_MIN: u64 = 1;
pub const MS_MAX: u64 = 10_000;
pub const MAX_WORKERS: usize = 4096;

/// Synchronization strength used to publish and read the shared reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ClockGuard {
    /// Native 64-bit atomic store/load with release/acquire ordering.
    Atomic,
    /// Cross-process spinlock around a plain read or write.
    Spinlock,
    /// Plain volatile access bracketed by full memory barriers.
    Barrier,
}

impl ClockGuard {
    pub fn name(&self) -> &'static str {
        match self {
            ClockGuard::Atomic => "atomic",
            ClockGuard::Spinlock => "spinlock",
            ClockGuard::Barrier => "barrier",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncloadConfig {
    pub workers: usize,
    pub msbusy: u64,
    pub mssleep: u64,
    pub ops: u64,
    pub timeout: Option<String>,
    pub clock_guard: ClockGuard,
}

impl Default for SyncloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            msbusy: MS_DEFAULT,
            mssleep: MS_DEFAULT / 2,
            ops: 0,
            timeout: None,
            clock_guard: ClockGuard::Atomic,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKERS)
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), Error> {
    if value < min || value > max {
        return Err(Error::InvalidArgs(format!(
            "{} must be in the range {} to {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

impl SyncloadConfig {
    /// Reject out-of-range settings. Runs once, before any worker is forked.
    pub fn validate(&self) -> Result<(), Error> {
        check_range("msbusy", self.msbusy, MS_MIN, MS_MAX)?;
        check_range("mssleep", self.mssleep, MS_MIN, MS_MAX)?;
        check_range("workers", self.workers as u64, 1, MAX_WORKERS as u64)?;
        self.timeout_duration()?;
        Ok(())
    }

    pub fn timeout_duration(&self) -> Result<Option<Duration>, Error> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}

/// Parse `30s`, `5m`, `1h`, `2d`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgs("empty duration".into()));
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400)
    } else {
        (s, 1)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgs(format!("invalid duration: {}", s)))?;

    if num == 0 {
        return Err(Error::InvalidArgs("duration must be > 0".into()));
    }

    num.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::InvalidArgs(format!("duration too large: {}", s)))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub syncload: SyncloadConfig,
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/syncload.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new("/etc/syncload.toml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let cfg = SyncloadConfig::default();
        assert_eq!(cfg.msbusy, 125);
        assert_eq!(cfg.mssleep, 62);
        assert_eq!(cfg.ops, 0);
        assert!(cfg.timeout.is_none());
        assert!(cfg.workers >= 1);
        assert_eq!(cfg.clock_guard, ClockGuard::Atomic);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_busy_bounds_accepted() {
        for ms in [MS_MIN, MS_MAX] {
            let cfg = SyncloadConfig {
                msbusy: ms,
                mssleep: ms,
                ..Default::default()
            };
            assert!(cfg.validate().is_ok(), "{} ms should be accepted", ms);
        }
    }

    #[test]
    fn test_busy_out_of_range_rejected() {
        for ms in [0, MS_MAX + 1] {
            let cfg = SyncloadConfig {
                msbusy: ms,
                ..Default::default()
            };
            let err = cfg.validate().unwrap_err();
            assert!(format!("{}", err).contains("msbusy"));
        }
    }

    #[test]
    fn test_sleep_out_of_range_rejected() {
        let cfg = SyncloadConfig {
            mssleep: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let cfg = SyncloadConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration(" 7 ").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let cfg = SyncloadConfig {
            timeout: Some("soon".into()),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let dir = std::env::temp_dir();
        let path = dir.join("syncload_test_config.toml");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            write!(
                f,
                r#"
[syncload]
workers = 3
msbusy = 200
timeout = "10s"
clock_guard = "spinlock"
"#
            )
            .unwrap();
        }
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.syncload.workers, 3);
        assert_eq!(config.syncload.msbusy, 200);
        assert_eq!(config.syncload.clock_guard, ClockGuard::Spinlock);
        assert_eq!(
            config.syncload.timeout_duration().unwrap(),
            Some(Duration::from_secs(10))
        );
        // Unset fields should get defaults
        assert_eq!(config.syncload.mssleep, 62);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let path = std::env::temp_dir().join("syncload_test_unknown_key.toml");
        std::fs::write(&path, "[syncload]\nms_busy = 0\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{}", err).contains("ms_busy"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_section_rejected() {
        let path = std::env::temp_dir().join("syncload_test_unknown_section.toml");
        std::fs::write(&path, "[sync_load]\nmsbusy = 10\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        let path = std::path::Path::new("/tmp/syncload_nonexistent_config.toml");
        let result = load_config(Some(path));
        assert!(result.is_err());
    }
}

//! Configuration management
//!
//! Config file is `emop.toml`, found via `--config`, then `EMOP_CONFIG`,
//! then next to the executable, then in the working directory. Every
//! section is optional. `EMLITE_HOST`, `EMLITE_PORT` and
//! `EMLITE_TIMEOUT_SECONDS` override the file.

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_IO_TIMEOUT_SECS, DEFAULT_LOG_LEVEL,
    DEFAULT_METER_PORT, DEFAULT_READ_BUFFER_SIZE, ENV_CONFIG, ENV_HOST, ENV_PORT,
    ENV_TIMEOUT_SECONDS, MAX_EXCHANGE_ATTEMPTS, METER_LOCK_TIMEOUT_SECS, MIN_REQUEST_INTERVAL_MS,
};
use crate::error::{EmopError, Result};
use crate::transaction::{RunnerSettings, SequenceMode};
use crate::transport::TcpSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub meter: MeterConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// Which meter to talk to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Hostname or IP of the meter modem (no default)
    pub host: Option<String>,
    pub port: u16,
}

/// Socket, retry and pacing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    /// Applies to both send and receive
    pub io_timeout_secs: u64,
    /// Exchanges per transaction, first attempt included
    pub max_attempts: u32,
    /// Bytes accepted by the single read of a reply
    pub read_buffer_size: usize,
    /// Minimum gap between two requests to the same meter
    pub min_request_interval_ms: u64,
    pub verify_checksum: bool,
    /// "static" (control byte 5) or "alternating" (sequence bit toggles)
    pub sequence: SequenceMode,
    /// How long to wait for a meter held by another caller
    pub lock_timeout_secs: u64,
    /// Whole-transaction time limit (unset = none)
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "emop=debug"
    pub level: String,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_METER_PORT,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            max_attempts: MAX_EXCHANGE_ATTEMPTS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            min_request_interval_ms: MIN_REQUEST_INTERVAL_MS,
            verify_checksum: true,
            sequence: SequenceMode::Static,
            lock_timeout_secs: METER_LOCK_TIMEOUT_SECS,
            deadline_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Apply `EMLITE_*` overrides read through `lookup`
    ///
    /// Takes the lookup as a function so tests need not touch the process
    /// environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.meter.host = Some(host.trim().to_string());
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.meter.port = port.trim().parse().map_err(|_| EmopError::ConfigValidation {
                field: "EMLITE_PORT",
                reason: format!("'{}' is not a port number", port),
            })?;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECONDS) {
            let secs: u64 = secs.trim().parse().map_err(|_| EmopError::ConfigValidation {
                field: "EMLITE_TIMEOUT_SECONDS",
                reason: format!("'{}' is not a number of seconds", secs),
            })?;
            self.transport.connect_timeout_secs = secs;
            self.transport.io_timeout_secs = secs;
        }
        Ok(())
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        let checks: [(&'static str, bool); 4] = [
            ("transport.max_attempts", t.max_attempts == 0),
            ("transport.read_buffer_size", t.read_buffer_size == 0),
            ("transport.connect_timeout_secs", t.connect_timeout_secs == 0),
            ("transport.io_timeout_secs", t.io_timeout_secs == 0),
        ];
        for (field, is_zero) in checks {
            if is_zero {
                return Err(EmopError::ConfigValidation {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.meter.port == 0 {
            return Err(EmopError::ConfigValidation {
                field: "meter.port",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Meter host, required for anything that talks to a meter
    pub fn require_host(&self) -> Result<&str> {
        self.meter
            .host
            .as_deref()
            .ok_or(EmopError::MissingConfig { field: "meter.host" })
    }

    pub fn tcp_settings(&self) -> TcpSettings {
        TcpSettings {
            connect_timeout: Duration::from_secs(self.transport.connect_timeout_secs),
            io_timeout: Duration::from_secs(self.transport.io_timeout_secs),
            read_buffer_size: self.transport.read_buffer_size,
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            max_attempts: self.transport.max_attempts,
            min_request_interval: Duration::from_millis(self.transport.min_request_interval_ms),
            verify_checksum: self.transport.verify_checksum,
            sequence: self.transport.sequence,
            deadline: self.transport.deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.lock_timeout_secs)
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Config file to load, if any
///
/// An explicit path (flag or `EMOP_CONFIG`) is returned as-is, whether or
/// not it exists. The discovered locations are only returned if present.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)));
    let in_cwd = std::env::current_dir()
        .ok()
        .map(|dir| dir.join(CONFIG_FILE_NAME));

    beside_exe.into_iter().chain(in_cwd).find(|p| p.exists())
}

/// Parse one config file
pub fn load_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| EmopError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| EmopError::ConfigValidation {
        field: "toml",
        reason: format!("{}: {}", path.display(), e),
    })
}

/// A loaded config plus what happened while finding it
///
/// Loading runs before tracing is initialised, so the caller logs `path`
/// and `warnings` once the subscriber is up.
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    /// File the config came from (None = defaults only)
    pub path: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Load config, apply environment overrides and validate
///
/// A file the user pointed at must load. A discovered file that fails to
/// parse is skipped with a warning and defaults are used.
pub fn load(explicit: Option<&Path>) -> Result<Loaded> {
    let pointed_at = explicit.is_some() || std::env::var_os(ENV_CONFIG).is_some();
    let mut loaded = resolve(config_path(explicit), pointed_at)?;
    loaded.config.apply_env(|key| std::env::var(key).ok())?;
    loaded.config.validate()?;
    Ok(loaded)
}

/// Read `path` into a config without touching the environment
pub(crate) fn resolve(path: Option<PathBuf>, pointed_at: bool) -> Result<Loaded> {
    let Some(path) = path else {
        return Ok(Loaded {
            config: Config::default(),
            path: None,
            warnings: Vec::new(),
        });
    };
    match load_from(&path) {
        Ok(config) => Ok(Loaded {
            config,
            path: Some(path),
            warnings: Vec::new(),
        }),
        Err(e) if pointed_at => Err(e),
        Err(e) => Ok(Loaded {
            config: Config::default(),
            path: None,
            warnings: vec![format!("{}, using defaults", e)],
        }),
    }
}

/// Serialize config as TOML
pub fn to_toml(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| EmopError::ConfigValidation {
        field: "toml",
        reason: e.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================

//! Runtime configuration with environment and config-file support.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables** — values from `ASUPERTASK_*` env vars
//! 3. **Config file** — values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults** — built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `ASUPERTASK_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `ASUPERTASK_MIN_THREADS` | `usize` | `min_threads` |
//! | `ASUPERTASK_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |
//! | `ASUPERTASK_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `ASUPERTASK_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |

use std::time::Duration;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "ASUPERTASK_WORKER_THREADS";
/// Environment variable name for the number of always-alive workers.
pub const ENV_MIN_THREADS: &str = "ASUPERTASK_MIN_THREADS";
/// Environment variable name for the idle timeout, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "ASUPERTASK_IDLE_TIMEOUT_MS";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "ASUPERTASK_THREAD_NAME_PREFIX";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "ASUPERTASK_THREAD_STACK_SIZE";

/// Default idle timeout before retiring excess workers.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors produced while resolving a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set to an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Human-readable expected type.
        expected: &'static str,
        /// The raw value found.
        value: String,
    },
    /// The resolved configuration is inconsistent.
    #[error("invalid runtime config: {0}")]
    Invalid(&'static str),
    /// A config file could not be read or a runtime thread could not start.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid TOML for this schema.
    #[cfg(feature = "config-file")]
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for the worker pool and timer of a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of worker threads.
    pub worker_threads: usize,
    /// Workers kept alive even when idle.
    pub min_threads: usize,
    /// How long a worker above `min_threads` may idle before retiring.
    pub idle_timeout: Duration,
    /// Name prefix for worker and timer threads.
    pub thread_name_prefix: String,
    /// Stack size per worker thread in bytes (`None` = platform default).
    pub thread_stack_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(4, usize::from),
            min_threads: 1,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "asupertask".to_string(),
            thread_stack_size: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Checks that the configuration can be used to build a runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1"));
        }
        if self.min_threads > self.worker_threads {
            return Err(ConfigError::Invalid(
                "min_threads must not exceed worker_threads",
            ));
        }
        if self.thread_stack_size == Some(0) {
            return Err(ConfigError::Invalid("thread_stack_size must be non-zero"));
        }
        Ok(())
    }
}

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

/// Apply overrides from an arbitrary variable lookup.
///
/// [`apply_env_overrides`] is this function over the process environment.
pub fn apply_overrides_from(
    config: &mut RuntimeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = lookup(ENV_MIN_THREADS) {
        config.min_threads = parse_usize(ENV_MIN_THREADS, &val)?;
    }
    if let Some(val) = lookup(ENV_IDLE_TIMEOUT_MS) {
        let millis = val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
            var: ENV_IDLE_TIMEOUT_MS,
            expected: "milliseconds as u64",
            value: val.clone(),
        })?;
        config.idle_timeout = Duration::from_millis(millis);
    }
    if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = lookup(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = Some(parse_usize(ENV_THREAD_STACK_SIZE, &val)?);
    }
    Ok(())
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [pool]
/// worker_threads = 4
/// min_threads = 1
/// idle_timeout_ms = 10000
/// thread_name_prefix = "myapp"
/// thread_stack_size = 2097152
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub pool: PoolToml,
}

/// Pool section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolToml {
    /// Maximum number of worker threads.
    pub worker_threads: Option<usize>,
    /// Workers kept alive even when idle.
    pub min_threads: Option<usize>,
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: Option<u64>,
    /// Name prefix for runtime threads.
    pub thread_name_prefix: Option<String>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields present in the TOML are applied.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    let pool = &toml.pool;
    if let Some(v) = pool.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = pool.min_threads {
        config.min_threads = v;
    }
    if let Some(v) = pool.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(v);
    }
    if let Some(ref v) = pool.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = pool.thread_stack_size {
        config.thread_stack_size = Some(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(s: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    Ok(toml::from_str(s)?)
}

/// Read and parse a TOML config file.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_toml_str(&contents)
}

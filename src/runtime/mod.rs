//! Runtime: the worker pool and timer that evaluations run on.
//!
//! A [`Runtime`] is a cheap, cloneable handle. Every evaluation carries a
//! [`Context`] naming the runtime its entry point chose, so forks, sleeps
//! and timeouts inside a computation stay on that runtime.
//!
//! The process-wide default returned by [`Runtime::global`] is built on
//! first use from the `ASUPERTASK_*` environment variables.
//!
//! # Example
//!
//! ```
//! use asupertask::{Runtime, Task};
//!
//! let runtime = Runtime::builder().worker_threads(2).build().unwrap();
//! let answer = runtime.block_on(&Task::now(21).map(|x| x * 2));
//! assert_eq!(answer.ok(), Some(42));
//! ```

pub mod completion;
pub mod eval;
pub mod pool;
pub mod timer;

pub use completion::Completion;
pub use eval::{Eval, Resume};
pub use pool::{PoolOptions, WorkerPool};
pub use timer::TimerHandle;

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use crate::config::{ConfigError, RuntimeConfig, apply_env_overrides};
use crate::error::Result;
use crate::task::Task;
use crate::tracing_compat::{debug, warn};
use crate::types::Interrupt;
use timer::Timer;

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// Handle to a worker pool and timer.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    // Declared before `pool`: the timer stops handing out work first.
    timer: Timer,
    pool: WorkerPool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("timer", &self.inner.timer)
            .finish()
    }
}

impl Runtime {
    /// Returns a builder with nothing set.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Starts a runtime from a fully resolved configuration.
    pub fn new(config: RuntimeConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let timer = Timer::start(format!("{}-timer", config.thread_name_prefix))?;
        let pool = WorkerPool::new(PoolOptions::from(&config));
        debug!(
            worker_threads = config.worker_threads,
            min_threads = config.min_threads,
            prefix = %config.thread_name_prefix,
            "runtime started"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                timer,
                pool,
            }),
        })
    }

    /// The process-wide default runtime, created on first use.
    ///
    /// Invalid `ASUPERTASK_*` environment values are reported and replaced
    /// by defaults.
    ///
    /// # Panics
    ///
    /// Panics if the runtime's threads cannot be spawned.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            let config = RuntimeConfig::from_env()
                .and_then(|config| config.validate().map(|()| config))
                .unwrap_or_else(|_err| {
                    warn!(error = %_err, "invalid runtime environment, using defaults");
                    RuntimeConfig::default()
                });
            Self::new(config)
                .unwrap_or_else(|err| panic!("failed to start the global runtime: {err}"))
        })
    }

    /// The configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Number of live worker threads.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.pool.active_threads()
    }

    /// Runs `job` on a worker thread.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        self.inner.pool.execute(job);
    }

    /// Runs `job` on a worker thread once `delay` has elapsed.
    ///
    /// The pending job does not keep the runtime alive; if the runtime is
    /// gone by the deadline the job is dropped.
    pub fn schedule(&self, delay: Duration, job: impl FnOnce() + Send + 'static) -> TimerHandle {
        let runtime: Weak<RuntimeInner> = Arc::downgrade(&self.inner);
        self.inner.timer.schedule(delay, move || {
            if let Some(inner) = runtime.upgrade() {
                inner.pool.execute(job);
            }
        })
    }

    /// Runs `job` on the timer thread itself once `delay` has elapsed.
    ///
    /// Unlike [`schedule`](Self::schedule) this does not wait for a free
    /// worker, so the job fires on time even when every worker is blocked.
    /// The job must be short and must not block.
    pub(crate) fn schedule_inline(
        &self,
        delay: Duration,
        job: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        self.inner.timer.schedule(delay, job)
    }

    /// Runs `task` on this runtime, blocking until it completes.
    pub fn block_on<A: Send + 'static>(&self, task: &Task<A>) -> Result<A> {
        task.eval().run(self)
    }

    /// Evaluation context on this runtime under `interrupt`.
    #[must_use]
    pub fn context(&self, interrupt: Interrupt) -> Context {
        Context::new(self.clone(), interrupt)
    }
}

/// Builder resolving a [`RuntimeConfig`] from its layered sources.
///
/// Precedence, highest first: setters on this builder, `ASUPERTASK_*`
/// environment variables, a TOML config file, [`RuntimeConfig::default`].
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct RuntimeBuilder {
    worker_threads: Option<usize>,
    min_threads: Option<usize>,
    idle_timeout: Option<Duration>,
    thread_name_prefix: Option<String>,
    thread_stack_size: Option<usize>,
    #[cfg(feature = "config-file")]
    config_file: Option<std::path::PathBuf>,
}

impl RuntimeBuilder {
    /// Creates a builder with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Single worker thread.
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1).min_threads(1)
    }

    /// Sets the maximum number of worker threads.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = Some(n);
        self
    }

    /// Sets how many workers stay alive while idle.
    pub fn min_threads(mut self, n: usize) -> Self {
        self.min_threads = Some(n);
        self
    }

    /// Sets how long an excess worker idles before retiring.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the name prefix of runtime threads.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Sets the stack size of worker threads.
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = Some(size);
        self
    }

    /// Loads settings from a TOML file below environment and setters.
    #[cfg(feature = "config-file")]
    pub fn config_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Resolves the configuration without starting anything.
    pub fn resolve(&self) -> std::result::Result<RuntimeConfig, ConfigError> {
        let mut config = self.file_config()?;
        apply_env_overrides(&mut config)?;
        self.apply_setters(&mut config);
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "config-file")]
    fn file_config(&self) -> std::result::Result<RuntimeConfig, ConfigError> {
        let mut config = RuntimeConfig::default();
        if let Some(path) = &self.config_file {
            let file = crate::config::parse_toml_file(path)?;
            crate::config::apply_toml_config(&mut config, &file);
        }
        Ok(config)
    }

    #[cfg(not(feature = "config-file"))]
    fn file_config(&self) -> std::result::Result<RuntimeConfig, ConfigError> {
        Ok(RuntimeConfig::default())
    }

    fn apply_setters(&self, config: &mut RuntimeConfig) {
        if let Some(n) = self.worker_threads {
            config.worker_threads = n;
        }
        if let Some(n) = self.min_threads {
            config.min_threads = n;
        }
        if let Some(timeout) = self.idle_timeout {
            config.idle_timeout = timeout;
        }
        if let Some(prefix) = &self.thread_name_prefix {
            config.thread_name_prefix.clone_from(prefix);
        }
        if let Some(size) = self.thread_stack_size {
            config.thread_stack_size = Some(size);
        }
    }

    /// Resolves the configuration and starts the runtime.
    pub fn build(self) -> std::result::Result<Runtime, ConfigError> {
        Runtime::new(self.resolve()?)
    }
}

/// What a running evaluation can see of its surroundings.
#[derive(Clone, Debug)]
pub struct Context {
    runtime: Runtime,
    interrupt: Interrupt,
}

impl Context {
    /// Creates a context.
    #[must_use]
    pub fn new(runtime: Runtime, interrupt: Interrupt) -> Self {
        Self { runtime, interrupt }
    }

    /// The runtime the evaluation runs on.
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The interrupt the evaluation observes.
    #[must_use]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Same runtime, different interrupt.
    #[must_use]
    pub fn with_interrupt(&self, interrupt: Interrupt) -> Self {
        Self::new(self.runtime.clone(), interrupt)
    }
}

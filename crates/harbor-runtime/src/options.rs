//! Runtime tunables resolved from [`HostConfig`].

use std::path::PathBuf;
use std::time::Duration;

use harbor_config::HostConfig;

/// Limits and deadlines shared by interpreters, pools and plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Interpreters per provider pool.
    pub pool_capacity: usize,
    /// Deadline for acquiring a pooled interpreter.
    pub acquire_timeout: Duration,
    /// Deadline for one provider call.
    pub call_timeout: Duration,
    /// Promise polling cadence.
    pub promise_poll: Duration,
    /// Deadline for blocking scheduler submissions.
    pub submit_timeout: Duration,
    /// Heap limit per interpreter.
    pub memory_limit: usize,
    /// Stack limit per interpreter.
    pub max_stack: usize,
    /// Default `fetch` timeout.
    pub fetch_timeout: Duration,
    /// Minimum spacing of renders per plugin.
    pub render_interval: Duration,
    /// Field refs allowed per plugin.
    pub max_field_refs: usize,
    /// Uncaught exceptions before a plugin is unloaded.
    pub max_exceptions: usize,
    /// Deadline for DOM-RPC reads.
    pub dom_response_timeout: Duration,
    /// Directory reported by `$osExtra.downloadDir()`.
    pub download_dir: PathBuf,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from_config(&HostConfig::default())
    }
}

impl RuntimeOptions {
    /// Resolve from a loaded host configuration.
    #[must_use]
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            pool_capacity: config.runtime.pool_capacity,
            acquire_timeout: config.runtime.acquire_timeout(),
            call_timeout: config.runtime.call_timeout(),
            promise_poll: config.runtime.promise_poll(),
            submit_timeout: config.runtime.scheduler_submit_timeout(),
            memory_limit: config.runtime.memory_limit_bytes,
            max_stack: config.runtime.max_stack_bytes,
            fetch_timeout: config.runtime.fetch_timeout(),
            render_interval: config.plugins.render_interval(),
            max_field_refs: config.plugins.max_field_refs,
            max_exceptions: config.plugins.max_exceptions,
            dom_response_timeout: config.plugins.dom_response_timeout(),
            download_dir: config.paths.download_dir(),
        }
    }
}

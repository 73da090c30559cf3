//! Configuration types for the Harbor extension host.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header produces a working setup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration of the extension host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Interpreter pools and provider calls.
    pub runtime: RuntimeSection,
    /// Plugin runtime knobs.
    pub plugins: PluginsSection,
    /// Extension bank signalling and directory watching.
    pub bank: BankSection,
    /// Filesystem locations.
    pub paths: PathsSection,
    /// Logging level and format.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// RuntimeSection
// ---------------------------------------------------------------------------

/// Interpreter pool and provider bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Interpreters per extension pool.
    pub pool_capacity: usize,
    /// Deadline for acquiring an interpreter from a pool.
    pub acquire_timeout_ms: u64,
    /// Deadline for a whole provider call, promise settlement included.
    pub call_timeout_ms: u64,
    /// Promise polling cadence.
    pub promise_poll_ms: u64,
    /// Deadline for a synchronous scheduler submission.
    pub scheduler_submit_timeout_ms: u64,
    /// Heap limit per interpreter.
    pub memory_limit_bytes: usize,
    /// Native stack limit per interpreter.
    pub max_stack_bytes: usize,
    /// Default timeout of `fetch` requests.
    pub fetch_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            pool_capacity: 10,
            acquire_timeout_ms: 5_000,
            call_timeout_ms: 60_000,
            promise_poll_ms: 10,
            scheduler_submit_timeout_ms: 30_000,
            memory_limit_bytes: 67_108_864,
            max_stack_bytes: 1_048_576,
            fetch_timeout_ms: 35_000,
        }
    }
}

impl RuntimeSection {
    /// Pool acquisition deadline.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Provider call deadline.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Promise polling cadence.
    #[must_use]
    pub fn promise_poll(&self) -> Duration {
        Duration::from_millis(self.promise_poll_ms)
    }

    /// Scheduler submission deadline.
    #[must_use]
    pub fn scheduler_submit_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler_submit_timeout_ms)
    }

    /// Default fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// PluginsSection
// ---------------------------------------------------------------------------

/// Plugin runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    /// Minimum interval between two renders of the same plugin.
    pub render_interval_ms: u64,
    /// Maximum externally addressable field refs per plugin.
    pub max_field_refs: usize,
    /// Buffer of channel-mode listeners.
    pub listener_buffer: usize,
    /// Uncaught exceptions tolerated before a plugin is unloaded.
    pub max_exceptions: usize,
    /// Maximum events coalesced into one batch envelope.
    pub event_batch_size: usize,
    /// Window during which outbound events are coalesced.
    pub event_batch_flush_ms: u64,
    /// Deadline for DOM-RPC read responses.
    pub dom_response_timeout_ms: u64,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            render_interval_ms: 40,
            max_field_refs: 20,
            listener_buffer: 16,
            max_exceptions: 20,
            event_batch_size: 20,
            event_batch_flush_ms: 10,
            dom_response_timeout_ms: 10_000,
        }
    }
}

impl PluginsSection {
    /// Render throttle interval.
    #[must_use]
    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    /// Event batching window.
    #[must_use]
    pub fn event_batch_flush(&self) -> Duration {
        Duration::from_millis(self.event_batch_flush_ms)
    }

    /// DOM-RPC response deadline.
    #[must_use]
    pub fn dom_response_timeout(&self) -> Duration {
        Duration::from_millis(self.dom_response_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// BankSection
// ---------------------------------------------------------------------------

/// Extension bank settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankSection {
    /// Capacity of the `added`/`removed` signal channels.
    pub signal_capacity: usize,
    /// Reload manifests when they change on disk.
    pub watch: bool,
    /// Debounce window for the directory watcher.
    pub watch_debounce_ms: u64,
}

impl Default for BankSection {
    fn default() -> Self {
        Self {
            signal_capacity: 100,
            watch: false,
            watch_debounce_ms: 500,
        }
    }
}

impl BankSection {
    /// Watcher debounce window.
    #[must_use]
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

// ---------------------------------------------------------------------------
// PathsSection
// ---------------------------------------------------------------------------

/// Filesystem locations. Unset entries resolve to per-user project dirs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Directory scanned for `<id>.json` manifests.
    pub extensions_dir: Option<PathBuf>,
    /// Directory holding persistent stores.
    pub data_dir: Option<PathBuf>,
    /// Default destination of downloads.
    pub download_dir: Option<PathBuf>,
}

impl PathsSection {
    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", "harbor")
    }

    /// Resolved extension directory.
    #[must_use]
    pub fn extensions_dir(&self) -> PathBuf {
        self.extensions_dir.clone().unwrap_or_else(|| {
            Self::project_dirs().map_or_else(
                || PathBuf::from("extensions"),
                |d| d.data_dir().join("extensions"),
            )
        })
    }

    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            Self::project_dirs().map_or_else(
                || PathBuf::from("data"),
                |d| d.data_dir().join("data"),
            )
        })
    }

    /// Resolved download directory.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            directories::UserDirs::new()
                .and_then(|u| u.download_dir().map(PathBuf::from))
                .unwrap_or_else(std::env::temp_dir)
        })
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging settings consumed by the telemetry setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default level (`trace`..`error`).
    pub level: String,
    /// Output format (`pretty`, `compact`, `json`, `full`).
    pub format: String,
    /// Extra `EnvFilter` directives such as `harbor_runtime=debug`.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            directives: Vec::new(),
        }
    }
}

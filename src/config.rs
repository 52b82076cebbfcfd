//! Runtime tuning knobs.
//!
//! These are core-level numbers (worker count, size limits, session timing), not
//! application configuration — the teacher's `Credentials`/`envie` file-search pattern is
//! for secrets an application loads itself, so it stays out of the library (see `demos/`).

use std::time::Duration;

/// Values the manager returns for `GET_VALUES` queries, per spec §6.
pub const FCGI_MAX_CONNS: u32 = 10;
/// Values the manager returns for `GET_VALUES` queries, per spec §6.
pub const FCGI_MAX_REQS: u32 = 50;
/// Values the manager returns for `GET_VALUES` queries, per spec §6.
pub const FCGI_MPXS_CONNS: u32 = 1;

/// Runtime configuration for a [`crate::manager::Manager`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker threads draining the task queue. Defaults to the number of
    /// available CPUs.
    pub workers: usize,
    /// Largest POST body the request engine will accept before invoking
    /// `big_post_error_handler` and terminating the request.
    pub max_post_size: usize,
    /// How long a session may sit unused before [`crate::http::session::Sessions::cleanup`]
    /// considers it stale.
    pub session_keep_alive: Duration,
    /// Minimum spacing between two effective `cleanup()` passes.
    pub session_cleanup_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_post_size: 1024 * 1024 * 16,
            session_keep_alive: Duration::from_secs(60 * 60),
            session_cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Starts a config with the defaults above.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker pool size.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the max accepted POST body size.
    pub fn max_post_size(mut self, bytes: usize) -> Self {
        self.max_post_size = bytes;
        self
    }

    /// Sets session keep-alive and cleanup cadence.
    pub fn session_timing(mut self, keep_alive: Duration, cleanup_interval: Duration) -> Self {
        self.session_keep_alive = keep_alive;
        self.session_cleanup_interval = cleanup_interval;
        self
    }
}

//! Debug logging setup.
//!
//! Follows the pattern the teacher used in `uploadterrain.rs`/`testlogger.rs`: `simplelog`
//! as the backend, `log` as the facade callers actually use.

use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::Path;

/// Initializes logging to a file at `path`, creating it if necessary.
///
/// Intended for the long-running process; panics are logged before they escape.
pub fn init_file(path: impl AsRef<Path>, level: LevelFilter) -> anyhow::Result<()> {
    let file = File::create(path)?;
    CombinedLogger::init(vec![WriteLogger::new(level, Config::default(), file)])
        .map_err(|e| anyhow::anyhow!("logger already initialized: {e}"))?;
    log::warn!("logging initialized at level {:?}", level);
    Ok(())
}

/// Initializes logging to stderr. Safe to call more than once; later calls are ignored.
pub fn init_stderr(level: LevelFilter) {
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )]);
}

/// Initializes logging for `cargo test`. All output goes to stdout so the test harness
/// can capture it per-test.
pub fn init_test() {
    let _ = CombinedLogger::init(vec![TermLogger::new(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Stdout,
        ColorChoice::Auto,
    )]);
}

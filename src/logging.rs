//! Thin wrapper over `log`/`env_logger`, matching the engine's foundation layer.

pub use log::{debug, error, info, trace, warn};

/// Installs the process-wide logger. Safe to call more than once; subsequent
/// calls are no-ops.
pub fn init() {
    let _ = env_logger::builder().is_test(false).try_init();
}

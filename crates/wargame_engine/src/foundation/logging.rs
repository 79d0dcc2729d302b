//! Logging utilities
//!
//! The renderer logs through the `log` facade; applications pick the sink.
//! These helpers install `env_logger` for binaries and tests.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize logging with a default filter used when `RUST_LOG` is unset
///
/// `level` accepts the usual `env_logger` filter syntax (`"info"`, `"wargame_engine=debug"`).
/// Calling this twice is harmless; the second logger is discarded.
pub fn init_with_level(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

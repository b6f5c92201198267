//! Logging setup.
//!
//! The crate logs through the `log` facade. Hosts that do not install their
//! own logger can call [`init_logging`] to get an `env_logger` backend that
//! honours `RUST_LOG` and otherwise falls back to the given filter.

/// Installs an `env_logger` logger.
///
/// `default_filter` is used when `RUST_LOG` is unset, e.g. `"myth_rhi=debug"`.
/// Calling this more than once is harmless; later calls leave the first
/// logger in place and return `false`.
pub fn init_logging(default_filter: &str) -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Logger for unit and integration tests: captured by the test harness and
/// safe to call from every test.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Debug).try_init();
}

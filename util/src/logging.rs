//! Logging bootstrap: a 0-5 verbosity knob mapped to an `env_logger` level.

/// Initialize `env_logger` from a 0-5 verbosity knob, falling back to
/// `RUST_LOG` if set so operators can still override per-module levels.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_millis();
    if std::env::var_os("RUST_LOG").is_some() {
        builder.parse_default_env();
    }
    let _ = builder.try_init();
}

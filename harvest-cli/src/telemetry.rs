//! Logging bootstrap, in the spirit of `forge`'s own `init_tracing`: an
//! `EnvFilter` from `RUST_LOG`, falling back to `"info"`. Unlike the TUI
//! binary this wraps, there is no alternate screen to protect, so output
//! goes straight to stderr instead of a log file.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

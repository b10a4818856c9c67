//! Tracing setup
//!
//! Logs go to stderr so stdout stays clean for command output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI
///
/// Call early in main() before any logging occurs. `RUST_LOG`, when set,
/// takes precedence over `level`. An invalid directive falls back to
/// `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}

/// Level for `-v` repetitions on top of the configured level
pub fn level_for_verbosity(configured: &str, verbose: u8) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

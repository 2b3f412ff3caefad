use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "GCP2AWS_LOG";

/// Installs the stderr diagnostic subscriber.
///
/// Standard output carries only the credential JSON, so every diagnostic
/// goes to standard error.
pub fn init(verbose: bool) {
    let default_directive = if verbose { "warn,gcp2aws=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

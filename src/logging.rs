//! Logging setup for the `cleat` binary

use tracing_subscriber::EnvFilter;

/// Install a stderr `tracing` subscriber
///
/// `RUST_LOG` is honoured; cleat's own events default to `info`, or `debug`
/// when `verbose` is set. Stdout is left for command output such as the
/// Run Tag printed by `up`.
pub fn init(verbose: bool) {
    let directive = if verbose { "cleat=debug" } else { "cleat=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(directive.parse().expect("valid log directive")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

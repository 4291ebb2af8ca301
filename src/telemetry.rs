//! Logging initialization.
//!
//! binsync runs as a decompiler plugin, not a server — there's no
//! distributed trace to export, so this is a plain `tracing-subscriber`
//! env-filter setup rather than the full OTLP pipeline a networked service
//! would carry. Controlled by `RUST_LOG` (e.g. `RUST_LOG=binsync=debug`);
//! defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Call once, at process startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

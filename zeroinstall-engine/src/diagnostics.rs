//! Structured logging setup. Every binary embedding this engine calls
//! [`init`] once at startup; the engine's own code only ever emits
//! through `tracing`'s macros, never `println!`/`eprintln!`.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber that writes to stderr, honoring
/// `RUST_LOG` (default `info` if unset).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

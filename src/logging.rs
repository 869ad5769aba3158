//! Tracing subscriber initialization (ambient stack). The teacher calls
//! `tracing::info!`/`error!` directly throughout `transport/server.rs` but
//! never centralizes subscriber setup since its binaries are thin CLIs; a
//! standalone agent process needs one entry point that does it once.

use tracing_subscriber::EnvFilter;

/// Verbosity to `RUST_LOG`-style filter, stacking with `-v`/`-vv`.
pub fn init(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "relaylink=info",
        1 => "relaylink=debug",
        _ => "relaylink=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

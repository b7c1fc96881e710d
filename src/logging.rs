//! Logging initialization for host applications
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host's job. `init()` is a convenience for binaries and examples that want
//! the standard stderr setup, filtered by `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a stderr subscriber filtered by `RUST_LOG`.
///
/// Safe to call once per process; a second call returns an error from the
/// global subscriber machinery, which is ignored so tests can call this
/// freely.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

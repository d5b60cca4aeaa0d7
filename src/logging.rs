//! Tracing setup.
//!
//! The crate logs its major lifecycle events (create, connect, disconnect,
//! cluster growth) via `tracing`; it never installs a subscriber itself —
//! that's a decision for the binary embedding it. This module only offers a
//! convenience initializer for examples and tests, under the `tracing-init`
//! feature.

#[cfg(feature = "tracing-init")]
use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber::fmt` subscriber for examples/tests.
///
/// `verbose` forces the `debug` level; otherwise `RUST_LOG` is honored and
/// defaults to `qcow2_engine=info`. Safe to call more than once — later
/// calls are ignored.
#[cfg(feature = "tracing-init")]
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("qcow2_engine=info")
        })
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

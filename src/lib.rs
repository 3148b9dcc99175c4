// Change data capture pipeline: adapter contract, offset/checkpoint
// discipline, publisher contract with exactly-once delivery semantics,
// transactional grouping, and a throttling/backpressure controller.
//
// No concrete database wire protocol is implemented here; reference
// adapters and publishers exist to exercise the pipeline end to end, not
// to be production connectors.

pub mod adapters;
pub mod common;
pub mod config;
pub mod dispatch;
pub mod delivery;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod publishers;
pub mod throttle;
pub mod transactional;

pub use error::{CdcError, Result};

/// Install a `tracing` subscriber reading `RUST_LOG` (or `info` if unset).
/// Hosts embedding this crate are free to install their own subscriber
/// instead; this is a convenience for binaries and tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

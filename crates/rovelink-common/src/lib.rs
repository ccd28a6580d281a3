//! Shared pieces for Rovelink: signaling protocol, logging, error types.
//!
//! This crate is used by both the signaling relay and the viewer client.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::*;

/// Initialize tracing.
///
/// Log level is controlled by the `RUST_LOG` environment variable, falling back to
/// `default_filter` when it is unset or invalid.
pub fn init_tracing_with_default(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

//! Logging setup for binaries and services embedding the engine.
//!
//! Log lines go to stderr. `RUST_LOG` takes precedence; otherwise the level
//! is `debug` for this crate when `Settings::debug` is set and `info` if not.

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Settings;

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(settings: &Settings) -> String {
    if settings.debug {
        "repo_embeddings=debug".to_string()
    } else {
        "repo_embeddings=info".to_string()
    }
}

/// Installs the global subscriber. Later calls are no-ops, so tests and
/// embedders can call this freely.
pub fn init(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(settings)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

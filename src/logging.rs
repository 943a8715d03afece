//! Tracing subscriber for binaries.

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise `default_directive` (e.g. `scaffold_sdk=info`).
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

//! Utility modules

pub mod memory_storage;
#[cfg(test)]
pub(crate) mod test_support;
pub mod validation;

pub use memory_storage::*;
pub use validation::*;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initializes the global tracing subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gl_engine=info"));

        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    });
}

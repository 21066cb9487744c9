//! Logging setup.
//!
//! The library only emits `tracing` events; embedding applications that
//! already install a subscriber need not call anything here. Standalone
//! hosts (tests, the Python module) call [`init_logging`] once.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{CoreError, CoreResult};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter() -> &'static str {
    "faststack_core=info"
}

/// Install a stderr fmt subscriber filtered by `RUST_LOG`, falling back to
/// `filter`.
///
/// # Errors
///
/// Returns [`CoreError::Logging`] if the filter does not parse or a global
/// subscriber is already installed.
pub fn init_logging(filter: &str) -> CoreResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(filter).map_err(|e| CoreError::Logging(e.to_string()))?,
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(), "faststack_core=info");
    }

    #[test]
    fn test_second_init_is_an_error() {
        // The first call may already have happened in another test.
        let _ = init_logging(default_filter());
        let second = init_logging(default_filter());
        assert!(matches!(second, Err(CoreError::Logging(_))));
    }
}

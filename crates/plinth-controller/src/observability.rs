//! Logging setup
//!
//! One fmt subscriber behind a reloadable filter. `RUST_LOG`, when set, wins
//! over both the command line and the settings file.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

pub const DEFAULT_LOG_LEVEL: &str = "info";

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn pinned_by_env() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

fn filter_for(level: &str) -> EnvFilter {
    if pinned_by_env()
        && let Ok(filter) = EnvFilter::try_from_default_env()
    {
        return filter;
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Install the global subscriber at `level`. Later calls do nothing.
pub fn init_tracing(level: Option<&str>) {
    let (filter, handle) = reload::Layer::new(filter_for(level.unwrap_or(DEFAULT_LOG_LEVEL)));
    if FILTER.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Switch the level of the running subscriber.
///
/// Returns false when tracing is not initialised or `RUST_LOG` pins the filter.
pub fn apply_logging_level(level: &str) -> bool {
    if pinned_by_env() {
        return false;
    }
    let Some(handle) = FILTER.get() else {
        return false;
    };
    handle.modify(|filter| *filter = filter_for(level)).is_ok()
}

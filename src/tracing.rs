//! Logging setup.
//!
//! The binary calls [`init`] once at startup to install a subscriber. Library
//! code only emits events, through `use crate::tracing::prelude::*`.

use tracing_subscriber::{
    filter::{Directive, EnvFilter, LevelFilter},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

/// Install a stdout subscriber filtered by `RUST_LOG`.
///
/// `default_level` applies when `RUST_LOG` is unset or unparseable, e.g.
/// `"info"` or `"avalon_rs=debug"`.
pub fn init(default_level: &str) {
    let default_directive: Directive = default_level
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    // try_init: tests and embedding hosts may already have a subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

//! Tracing subscriber setup.
//!
//! `production` emits JSON lines for log aggregation; `development` emits
//! pretty, colored output. Both go to stderr so command output on stdout
//! stays clean. `RUST_LOG` overrides the configured level.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, Profile};

/// Default filter directive for a configured level.
pub fn default_directive(level: &str) -> String {
    format!("doc_portal={level},portal={level},tower_http={level},warn")
}

pub fn init_logging(app: &AppConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(&app.log_level)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    // try_init: a second call (tests, embedded use) keeps the first subscriber.
    let result = match app.profile {
        Profile::Production => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        Profile::Development => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }

    Ok(())
}

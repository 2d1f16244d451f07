//! Configuration overview for `portal sources`.
//!
//! Reports which upstream sources the refresh pipeline can use with the
//! current configuration. Checks are local only; nothing here talks to the
//! network.

use anyhow::Result;
use reqwest::Url;

use crate::config::{Config, RefreshMode};
use crate::dataset::Dataset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub name: &'static str,
    pub configured: bool,
    pub healthy: bool,
    pub notes: String,
}

pub fn get_sources(config: &Config) -> Vec<SourceStatus> {
    let dataset = match Dataset::load(&config.dataset.path) {
        Ok(ds) => SourceStatus {
            name: "dataset",
            configured: true,
            healthy: true,
            notes: format!("{} documents in {}", ds.len(), config.dataset.path.display()),
        },
        Err(e) => SourceStatus {
            name: "dataset",
            configured: config.dataset.path.exists(),
            healthy: false,
            notes: format!("{:#}", e),
        },
    };

    let ltd_url_ok = Url::parse(&config.ltd.api_url).is_ok();
    let ltd_configured = config.ltd.password.is_some();
    let ltd = SourceStatus {
        name: "ltd",
        configured: ltd_configured,
        healthy: ltd_configured && ltd_url_ok,
        notes: if ltd_url_ok {
            format!("{} (org {})", config.ltd.api_url, config.ltd.organization)
        } else {
            format!("invalid api_url: {}", config.ltd.api_url)
        },
    };

    let s3_configured =
        config.s3.access_key_id.is_some() && config.s3.secret_access_key.is_some();
    let s3 = SourceStatus {
        name: "s3",
        configured: s3_configured,
        healthy: s3_configured,
        notes: format!(
            "bucket {} in {}",
            config.s3.bucket.as_deref().unwrap_or("(from LTD organization)"),
            config.s3.region
        ),
    };

    let github = SourceStatus {
        name: "github",
        configured: config.github.token.is_some(),
        healthy: true,
        notes: if config.github.token.is_some() {
            config.github.api_url.clone()
        } else {
            "no token; GitHub columns use defaults".to_string()
        },
    };

    let cache = SourceStatus {
        name: "cache",
        configured: true,
        healthy: config.cache.path.exists(),
        notes: if config.cache.path.exists() {
            config.cache.path.display().to_string()
        } else {
            format!("{} (run `portal init`)", config.cache.path.display())
        },
    };

    vec![dataset, ltd, s3, github, cache]
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("Refresh mode: {}", config.refresh.mode.as_str());
    println!();
    println!("{:<10} {:<12} {:<8} NOTES", "SOURCE", "STATUS", "HEALTHY");
    for s in get_sources(config) {
        let status = if s.configured { "OK" } else { "NOT CONFIGURED" };
        println!("{:<10} {:<12} {:<8} {}", s.name, status, s.healthy, s.notes);
    }

    if config.refresh.mode == RefreshMode::Live {
        if let Err(e) = crate::refresh::check_live_credentials(config) {
            println!();
            println!("warning: {}", e);
        }
    }

    Ok(())
}

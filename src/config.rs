//! TOML configuration with environment overrides.
//!
//! Every section is optional. Secrets (LTD password, AWS keys, GitHub token)
//! are usually supplied through `PORTAL_*` environment variables rather than
//! the file; [`load_config`] applies those after parsing.
//!
//! ```toml
//! [app]
//! profile = "development"
//! log_level = "debug"
//!
//! [cache]
//! path = "./data/portal.sqlite"
//!
//! [refresh]
//! mode = "live"
//! concurrency = 4
//!
//! [worker]
//! minutes = [0, 15, 30, 45]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub ltd: LtdConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub github: GitHubConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Production,
    Development,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            profile: Profile::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "spherexportal".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/portal.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
    #[serde(default = "default_docs_base_url")]
    pub docs_base_url: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
            docs_base_url: default_docs_base_url(),
        }
    }
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("dataset.example.yaml")
}
fn default_docs_base_url() -> String {
    "https://spherex-docs.ipac.caltech.edu".to_string()
}

/// Where a refresh run takes its metadata from.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// The static YAML manifest only.
    #[default]
    Dataset,
    /// LTD + S3 + GitHub, with the manifest as a per-project fallback.
    Live,
}

impl RefreshMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::Dataset => "dataset",
            RefreshMode::Live => "live",
        }
    }
}

impl std::str::FromStr for RefreshMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dataset" => Ok(RefreshMode::Dataset),
            "live" => Ok(RefreshMode::Live),
            other => bail!("Unknown refresh mode: '{}'. Must be dataset or live.", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    #[serde(default)]
    pub mode: RefreshMode,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub prune: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            mode: RefreshMode::default(),
            concurrency: default_concurrency(),
            prune: true,
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_minutes")]
    pub minutes: Vec<u32>,
    #[serde(default = "default_true")]
    pub refresh_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            minutes: default_minutes(),
            refresh_on_start: true,
        }
    }
}

fn default_minutes() -> Vec<u32> {
    vec![0, 15, 30, 45]
}

#[derive(Deserialize, Clone)]
pub struct LtdConfig {
    #[serde(default = "default_ltd_api_url")]
    pub api_url: String,
    #[serde(default = "default_ltd_org")]
    pub organization: String,
    #[serde(default = "default_ltd_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for LtdConfig {
    fn default() -> Self {
        Self {
            api_url: default_ltd_api_url(),
            organization: default_ltd_org(),
            username: default_ltd_username(),
            password: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl fmt::Debug for LtdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LtdConfig")
            .field("api_url", &self.api_url)
            .field("organization", &self.organization)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

fn default_ltd_api_url() -> String {
    "https://docs-api.ipac.caltech.edu/".to_string()
}
fn default_ltd_org() -> String {
    "spherex".to_string()
}
fn default_ltd_username() -> String {
    "spherex-portal".to_string()
}
fn default_token_ttl() -> u64 {
    600
}

#[derive(Deserialize, Clone)]
pub struct S3Config {
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_s3_region(),
            bucket: None,
            endpoint_url: None,
            metadata_key: default_metadata_key(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint_url", &self.endpoint_url)
            .field("metadata_key", &self.metadata_key)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redacted(&self.secret_access_key))
            .finish()
    }
}

// us-west-1 is where the SPHEREx LTD deployment keeps its bucket.
fn default_s3_region() -> String {
    "us-west-1".to_string()
}
fn default_metadata_key() -> String {
    "{slug}/v/__main/metadata.json".to_string()
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token: None,
            user_agent: default_user_agent(),
        }
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_url", &self.api_url)
            .field("token", &redacted(&self.token))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_user_agent() -> String {
    "SPHEREx/spherex-doc-portal".to_string()
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "***")
}

impl Config {
    /// Apply `PORTAL_*` overrides using the given variable lookup.
    ///
    /// Takes a lookup function so tests don't have to mutate the process
    /// environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORTAL_PROFILE") {
            self.app.profile = match v.to_ascii_lowercase().as_str() {
                "production" => Profile::Production,
                "development" => Profile::Development,
                other => bail!("PORTAL_PROFILE must be production or development, got '{}'", other),
            };
        }
        if let Some(v) = lookup("PORTAL_LOG_LEVEL") {
            self.app.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = lookup("PORTAL_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("PORTAL_CACHE_PATH") {
            self.cache.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PORTAL_DATASET_PATH") {
            self.dataset.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PORTAL_USE_MOCK_DATA") {
            self.refresh.mode = if parse_bool(&v)
                .with_context(|| format!("PORTAL_USE_MOCK_DATA has invalid value '{}'", v))?
            {
                RefreshMode::Dataset
            } else {
                RefreshMode::Live
            };
        }
        if let Some(v) = lookup("PORTAL_LTD_API_URL") {
            self.ltd.api_url = v;
        }
        if let Some(v) = lookup("PORTAL_LTD_API_ORG") {
            self.ltd.organization = v;
        }
        if let Some(v) = lookup("PORTAL_LTD_API_USERNAME") {
            self.ltd.username = v;
        }
        if let Some(v) = lookup("PORTAL_LTD_API_PASSWORD") {
            self.ltd.password = Some(v);
        }
        if let Some(v) = lookup("PORTAL_S3_REGION") {
            self.s3.region = v;
        }
        if let Some(v) = lookup("PORTAL_AWS_ACCESS_KEY_ID") {
            self.s3.access_key_id = Some(v);
        }
        if let Some(v) = lookup("PORTAL_AWS_ACCESS_KEY_SECRET") {
            self.s3.secret_access_key = Some(v);
        }
        if let Some(v) = lookup("PORTAL_GITHUB_TOKEN") {
            self.github.token = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh.concurrency == 0 {
            bail!("refresh.concurrency must be > 0");
        }

        if self.worker.minutes.is_empty() {
            bail!("worker.minutes must list at least one minute");
        }
        if let Some(m) = self.worker.minutes.iter().find(|m| **m >= 60) {
            bail!("worker.minutes entries must be in 0..60, got {}", m);
        }

        match self.app.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => bail!(
                "Unknown log level: '{}'. Must be trace, debug, info, warn, or error.",
                other
            ),
        }

        if !self.s3.metadata_key.contains("{slug}") {
            bail!("s3.metadata_key must contain the {{slug}} placeholder");
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected a boolean"),
    }
}

/// Parse a configuration document, apply overrides from the process
/// environment, and validate.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus environment overrides, for deployments configured
/// entirely through `PORTAL_*` variables.
pub fn from_env() -> Result<Config> {
    let mut config = Config::default();
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse_only(content: &str) -> Config {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_only("");
        assert_eq!(cfg.app.profile, Profile::Production);
        assert_eq!(cfg.refresh.mode, RefreshMode::Dataset);
        assert_eq!(cfg.worker.minutes, vec![0, 15, 30, 45]);
        assert_eq!(cfg.ltd.organization, "spherex");
        assert_eq!(cfg.s3.region, "us-west-1");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_sections_parse() {
        let cfg = parse_only(
            r#"
[app]
profile = "development"
log_level = "debug"

[refresh]
mode = "live"
concurrency = 8

[worker]
minutes = [5, 35]
refresh_on_start = false
"#,
        );
        assert_eq!(cfg.app.profile, Profile::Development);
        assert_eq!(cfg.refresh.mode, RefreshMode::Live);
        assert_eq!(cfg.refresh.concurrency, 8);
        assert_eq!(cfg.worker.minutes, vec![5, 35]);
        assert!(!cfg.worker.refresh_on_start);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORTAL_USE_MOCK_DATA", "false"),
            ("PORTAL_LTD_API_PASSWORD", "hunter2"),
            ("PORTAL_AWS_ACCESS_KEY_ID", "AKID"),
            ("PORTAL_AWS_ACCESS_KEY_SECRET", "secret"),
            ("PORTAL_PROFILE", "Development"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.refresh.mode, RefreshMode::Live);
        assert_eq!(cfg.ltd.password.as_deref(), Some("hunter2"));
        assert_eq!(cfg.s3.access_key_id.as_deref(), Some("AKID"));
        assert_eq!(cfg.s3.secret_access_key.as_deref(), Some("secret"));
        assert_eq!(cfg.app.profile, Profile::Development);
    }

    #[test]
    fn test_bad_mock_flag_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides(|k| (k == "PORTAL_USE_MOCK_DATA").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PORTAL_USE_MOCK_DATA"));
    }

    #[test]
    fn test_validation_rejects_bad_minutes() {
        let mut cfg = Config::default();
        cfg.worker.minutes = vec![0, 60];
        assert!(cfg.validate().is_err());

        cfg.worker.minutes = vec![];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut cfg = Config::default();
        cfg.refresh.concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut cfg = Config::default();
        cfg.ltd.password = Some("hunter2".into());
        cfg.s3.secret_access_key = Some("topsecret".into());
        cfg.github.token = Some("ghp_token".into());
        let dump = format!("{:?}", cfg);
        assert!(!dump.contains("hunter2"));
        assert!(!dump.contains("topsecret"));
        assert!(!dump.contains("ghp_token"));
    }
}

//! Client for the LTD documentation-hub API.
//!
//! LTD knows which document projects exist for the organization, where their
//! builds live, and when each default edition was last rebuilt. Requests are
//! authenticated with a short-lived token obtained from `GET /token`; tokens
//! are cached for `ltd.token_ttl_secs`.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LtdConfig;

/// An edition of a project (e.g. `__main`).
#[derive(Debug, Clone, Deserialize)]
pub struct LtdEdition {
    pub self_url: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub published_url: Option<String>,
    pub date_created: DateTime<Utc>,
    /// When the edition's build was last updated.
    pub date_rebuilt: DateTime<Utc>,
    #[serde(default)]
    pub date_ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tracked_ref: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub pending_rebuild: bool,
}

/// A documentation project.
#[derive(Debug, Clone, Deserialize)]
pub struct LtdProject {
    pub self_url: String,
    /// URL/path-safe identifier, unique within the organization.
    pub slug: String,
    pub title: String,
    /// GitHub homepage of the project.
    pub source_repo_url: String,
    pub published_url: String,
    pub default_edition: LtdEdition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LtdOrganization {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub layout: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub fastly_support: bool,
    /// Bucket hosting the builds, when LTD knows it.
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_public_read: bool,
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub projects_url: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct LtdClient {
    base_url: Url,
    organization: String,
    username: String,
    password: Option<String>,
    http: reqwest::Client,
    tokens: Cache<String, String>,
}

impl LtdClient {
    pub fn new(config: &LtdConfig, http: reqwest::Client) -> Result<Self> {
        let base_url = Url::parse(&config.api_url)
            .with_context(|| format!("Invalid ltd.api_url: {}", config.api_url))?;
        let tokens = Cache::builder()
            .max_capacity(1024)
            .time_to_live(Duration::from_secs(config.token_ttl_secs))
            .build();
        Ok(Self {
            base_url,
            organization: config.organization.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
            tokens,
        })
    }

    /// API URL for an absolute path, keeping the configured host.
    pub fn url_for_path(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    pub async fn get_auth_token(&self) -> Result<String> {
        if let Some(token) = self.tokens.get(&self.username).await {
            return Ok(token);
        }

        let password = self
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("Configure PORTAL_LTD_API_PASSWORD to access the LTD API"))?;

        let url = self.url_for_path("/token");
        let resp = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(password))
            .send()
            .await
            .context("LTD token request failed")?;
        if !resp.status().is_success() {
            bail!("LTD token request failed (HTTP {})", resp.status());
        }
        let token = resp
            .json::<TokenResponse>()
            .await
            .context("Malformed LTD token response")?
            .token;

        self.tokens.insert(self.username.clone(), token.clone()).await;
        tracing::debug!(username = %self.username, "Obtained LTD API token");
        Ok(token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let token = self.get_auth_token().await?;
        let url = self.url_for_path(path);
        let resp = self
            .http
            .get(url.clone())
            .basic_auth(token, Some(""))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        if !resp.status().is_success() {
            bail!("GET {} failed (HTTP {})", url, resp.status());
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("Malformed response from {}", url))
    }

    pub async fn get_organization(&self) -> Result<LtdOrganization> {
        self.get_json(&format!("/v2/orgs/{}", self.organization))
            .await
    }

    pub async fn get_projects(&self) -> Result<Vec<LtdProject>> {
        self.get_json(&format!("/v2/orgs/{}/projects", self.organization))
            .await
    }
}

//! GitHub REST client for repository activity.
//!
//! For each document repository the portal shows the latest release, the
//! time of the last push, and the number of open issues and pull requests.
//! [`GitHubClient::collect`] never fails: when GitHub can't be asked (no
//! token, not a GitHub URL) or a call errors, it returns defaults so the
//! document still renders.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::config::GitHubConfig;
use crate::models::{GitHubIssueCount, GitHubRelease};

const PER_PAGE: usize = 100;
// Upper bound on issue pages fetched for one repository.
const MAX_PAGES: u32 = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubOwner {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepository {
    pub name: String,
    pub full_name: String,
    pub owner: GitHubOwner,
    pub html_url: String,
    pub pushed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubReleaseResource {
    tag_name: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// GitHub-derived columns of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubMetadata {
    pub issues: GitHubIssueCount,
    pub release: Option<GitHubRelease>,
    pub commit_date: DateTime<Utc>,
}

impl GitHubMetadata {
    pub fn defaults(repo_url: &str, default_updated: DateTime<Utc>) -> Self {
        Self {
            issues: GitHubIssueCount::empty_for(repo_url),
            release: None,
            commit_date: default_updated,
        }
    }
}

/// Split `https://github.com/{owner}/{repo}` into its parts.
///
/// ```
/// use doc_portal::github::parse_repo_url;
/// assert_eq!(
///     parse_repo_url("https://github.com/SPHEREx/ssdc-ms-001.git"),
///     Some(("SPHEREx".to_string(), "ssdc-ms-001".to_string()))
/// );
/// assert_eq!(parse_repo_url("https://gitlab.com/a/b"), None);
/// ```
pub fn parse_repo_url(repo_url: &str) -> Option<(String, String)> {
    let rest = repo_url.trim().strip_prefix("https://github.com/")?;
    let mut parts = rest.trim_end_matches('/').split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// Web URL of a repository, normalized to `https://github.com/{owner}/{repo}`
/// when the URL parses; other URLs only lose trailing slashes.
///
/// ```
/// use doc_portal::github::repo_web_url;
/// assert_eq!(
///     repo_web_url("https://github.com/SPHEREx/ssdc-ms-001.git/"),
///     "https://github.com/SPHEREx/ssdc-ms-001"
/// );
/// assert_eq!(repo_web_url("https://gitlab.com/a/b/"), "https://gitlab.com/a/b");
/// ```
pub fn repo_web_url(repo_url: &str) -> String {
    match parse_repo_url(repo_url) {
        Some((owner, repo)) => format!("https://github.com/{}/{}", owner, repo),
        None => repo_url.trim().trim_end_matches('/').to_string(),
    }
}

pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    user_agent: String,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig, http: reqwest::Client) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            user_agent: config.user_agent.clone(),
            http,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    pub async fn get_repository(&self, owner: &str, repo: &str) -> Result<GitHubRepository> {
        let resp = self
            .request(&format!("/repos/{}/{}", owner, repo))
            .send()
            .await
            .with_context(|| format!("GitHub request for {}/{} failed", owner, repo))?;
        if !resp.status().is_success() {
            bail!("GitHub repo {}/{} (HTTP {})", owner, repo, resp.status());
        }
        Ok(resp.json().await?)
    }

    /// Count open issues and pull requests across all result pages.
    pub async fn count_open_issues(&self, owner: &str, repo: &str) -> Result<(u32, u32)> {
        let mut issues = 0u32;
        let mut prs = 0u32;

        for page in 1..=MAX_PAGES {
            let path = format!(
                "/repos/{}/{}/issues?state=open&per_page={}&page={}",
                owner, repo, PER_PAGE, page
            );
            let resp = self.request(&path).send().await?;
            if !resp.status().is_success() {
                bail!("GitHub issues for {}/{} (HTTP {})", owner, repo, resp.status());
            }
            let items: Vec<Value> = resp.json().await?;
            let (i, p) = tally_issues(&items);
            issues += i;
            prs += p;
            if items.len() < PER_PAGE {
                break;
            }
        }

        Ok((issues, prs))
    }

    /// The latest published release, or `None` if the repo has none.
    pub async fn get_latest_release(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<GitHubRelease>> {
        let resp = self
            .request(&format!("/repos/{}/{}/releases/latest", owner, repo))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("GitHub release for {}/{} (HTTP {})", owner, repo, resp.status());
        }
        let release: GitHubReleaseResource = resp.json().await?;
        Ok(Some(GitHubRelease {
            tag: release.tag_name,
            date_created: release.published_at.unwrap_or(release.created_at),
        }))
    }

    async fn fetch(&self, owner: &str, repo: &str) -> Result<GitHubMetadata> {
        let repository = self.get_repository(owner, repo).await?;
        let (owner, name) = (repository.owner.login.as_str(), repository.name.as_str());
        let (issues, prs) = self.count_open_issues(owner, name).await?;
        let release = self.get_latest_release(owner, name).await?;
        Ok(GitHubMetadata {
            issues: GitHubIssueCount::for_repo(&repository.html_url, issues, prs),
            release,
            commit_date: repository.pushed_at,
        })
    }

    /// Best-effort GitHub columns for a repository URL.
    pub async fn collect(&self, repo_url: &str, default_updated: DateTime<Utc>) -> GitHubMetadata {
        let defaults = GitHubMetadata::defaults(repo_url, default_updated);

        if !self.is_configured() {
            tracing::debug!(repo_url, "No GitHub token configured; using defaults");
            return defaults;
        }
        let Some((owner, repo)) = parse_repo_url(repo_url) else {
            tracing::debug!(repo_url, "Not a GitHub repository URL; using defaults");
            return defaults;
        };

        match self.fetch(&owner, &repo).await {
            Ok(meta) => {
                tracing::debug!(
                    repo_url,
                    issues = meta.issues.open_issue_count,
                    prs = meta.issues.open_pr_count,
                    release = meta.release.as_ref().map(|r| r.tag.as_str()),
                    "Got GitHub metadata"
                );
                meta
            }
            Err(e) => {
                tracing::warn!(repo_url, error = %e, "Failed to get GitHub metadata; using defaults");
                defaults
            }
        }
    }
}

/// Split a page of `/issues` results into (issues, pull requests).
fn tally_issues(items: &[Value]) -> (u32, u32) {
    items.iter().fold((0, 0), |(issues, prs), item| {
        if item.get("pull_request").is_some() {
            (issues, prs + 1)
        } else {
            (issues + 1, prs)
        }
    })
}

//! The refresh pipeline: external metadata in, cached documents out.
//!
//! A run lists the organization's projects in LTD, reads each project's
//! published metadata from the bucket, adds GitHub activity, and upserts
//! the resulting [`Document`]s into the [`ProjectStore`]. In `dataset` mode
//! the YAML manifest is the whole catalog instead.
//!
//! Failures are contained per project:
//!
//! - Listing fails: the run errors out and the cache is left as it was.
//! - One project's metadata is missing or invalid: the manifest entry for
//!   that project is used if there is one. Otherwise whatever the cache
//!   already holds for it stays in place.
//! - GitHub calls fail: the document is written with default GitHub columns.
//!
//! Documents whose project disappeared from a successful listing are pruned.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::{Config, RefreshMode};
use crate::dataset::Dataset;
use crate::error::MetadataError;
use crate::github::{GitHubClient, GitHubMetadata};
use crate::lander::LanderMetadata;
use crate::ltd::{LtdClient, LtdOrganization, LtdProject};
use crate::models::{Document, Series, SeriesDetails};
use crate::s3::{AwsCredentials, Bucket, DEFAULT_BUCKET};
use crate::store::ProjectStore;

/// Outcome counters of one refresh run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub id: String,
    /// `dataset` or `live`.
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Documents built from fresh metadata.
    pub ingested: u64,
    /// Documents taken from the manifest after their metadata failed.
    pub fallbacks: u64,
    /// Projects that could not be refreshed at all.
    pub failed: u64,
    /// Projects whose slug matches no series.
    pub skipped: u64,
    /// Cached documents removed because their project is gone.
    pub pruned: u64,
}

impl RefreshSummary {
    pub fn start(mode: RefreshMode) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode: mode.as_str().to_string(),
            started_at: now,
            finished_at: now,
            ingested: 0,
            fallbacks: 0,
            failed: 0,
            skipped: 0,
            pruned: 0,
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}

/// Where the live pipeline gets its data.
#[async_trait]
pub trait RefreshSources: Send + Sync {
    async fn organization(&self) -> Result<LtdOrganization>;

    async fn projects(&self) -> Result<Vec<LtdProject>>;

    async fn lander_metadata(&self, slug: &str) -> Result<LanderMetadata, MetadataError>;

    /// GitHub columns for a repository; never fails.
    async fn github_metadata(&self, repo_url: &str, default_updated: DateTime<Utc>)
        -> GitHubMetadata;
}

/// [`RefreshSources`] backed by LTD, the S3 bucket and GitHub.
pub struct LiveSources {
    config: Arc<Config>,
    ltd: LtdClient,
    github: GitHubClient,
    credentials: AwsCredentials,
    http: reqwest::Client,
    bucket: OnceCell<Bucket>,
}

impl LiveSources {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        check_live_credentials(&config)?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            ltd: LtdClient::new(&config.ltd, http.clone())?,
            github: GitHubClient::new(&config.github, http.clone()),
            credentials: AwsCredentials::from_config(&config.s3)?,
            http,
            bucket: OnceCell::new(),
            config,
        })
    }

    /// The configured bucket, else the organization's, else the default.
    fn make_bucket(&self, org_bucket: Option<&str>) -> Bucket {
        let name = self
            .config
            .s3
            .bucket
            .as_deref()
            .or(org_bucket)
            .unwrap_or(DEFAULT_BUCKET);
        tracing::debug!(bucket = name, "Using metadata bucket");
        Bucket::new(name, &self.config.s3, self.credentials.clone(), self.http.clone())
    }

    async fn bucket(&self) -> Result<&Bucket> {
        self.bucket
            .get_or_try_init(|| async {
                let org = self.ltd.get_organization().await?;
                Ok::<_, anyhow::Error>(self.make_bucket(org.s3_bucket.as_deref()))
            })
            .await
    }
}

#[async_trait]
impl RefreshSources for LiveSources {
    async fn organization(&self) -> Result<LtdOrganization> {
        let org = self.ltd.get_organization().await?;
        if !self.bucket.initialized() {
            let _ = self.bucket.set(self.make_bucket(org.s3_bucket.as_deref()));
        }
        Ok(org)
    }

    async fn projects(&self) -> Result<Vec<LtdProject>> {
        self.ltd.get_projects().await
    }

    async fn lander_metadata(&self, slug: &str) -> Result<LanderMetadata, MetadataError> {
        let bucket = self.bucket().await.map_err(|e| MetadataError::Fetch {
            key: slug.to_string(),
            source: e,
        })?;
        bucket.get_lander_metadata(slug).await
    }

    async fn github_metadata(
        &self,
        repo_url: &str,
        default_updated: DateTime<Utc>,
    ) -> GitHubMetadata {
        self.github.collect(repo_url, default_updated).await
    }
}

/// Live mode can't do anything useful without these secrets.
pub fn check_live_credentials(config: &Config) -> Result<()> {
    let mut missing = Vec::new();
    if config.ltd.password.is_none() {
        missing.push("PORTAL_LTD_API_PASSWORD");
    }
    if config.s3.access_key_id.is_none() {
        missing.push("PORTAL_AWS_ACCESS_KEY_ID");
    }
    if config.s3.secret_access_key.is_none() {
        missing.push("PORTAL_AWS_ACCESS_KEY_SECRET");
    }
    if !missing.is_empty() {
        bail!(
            "Live refresh requires credentials; set {} (or use PORTAL_USE_MOCK_DATA=true)",
            missing.join(", ")
        );
    }
    Ok(())
}

/// Tuning for a live run.
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub concurrency: usize,
    pub prune: bool,
    /// Base URL for documents taken from the manifest.
    pub docs_base_url: String,
}

impl RefreshOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.refresh.concurrency,
            prune: config.refresh.prune,
            docs_base_url: config.dataset.docs_base_url.clone(),
        }
    }
}

/// Write every manifest document into the store.
pub async fn refresh_from_dataset(
    dataset: &Dataset,
    docs_base_url: &str,
    store: &dyn ProjectStore,
    prune: bool,
) -> Result<RefreshSummary> {
    let mut summary = RefreshSummary::start(RefreshMode::Dataset);
    let mut keep: BTreeMap<Series, Vec<String>> = BTreeMap::new();

    for doc in dataset.documents(docs_base_url) {
        store.upsert(&doc).await?;
        keep.entry(doc.series()).or_default().push(doc.project_id.clone());
        summary.ingested += 1;
    }

    if prune {
        summary.pruned = prune_series(store, &keep).await?;
    }

    Ok(summary.finish())
}

/// Remove cached documents whose project is not in `keep`, for every series.
async fn prune_series(
    store: &dyn ProjectStore,
    keep: &BTreeMap<Series, Vec<String>>,
) -> Result<u64> {
    let mut pruned = 0;
    for series in Series::ALL {
        let ids = keep.get(&series).map(Vec::as_slice).unwrap_or(&[]);
        let removed = store.retain(series, ids).await?;
        if removed > 0 {
            tracing::info!(series = %series, removed, "Pruned documents no longer listed");
        }
        pruned += removed;
    }
    Ok(pruned)
}

/// Build one project's document from its published metadata and GitHub.
async fn ingest_project(
    sources: &dyn RefreshSources,
    organization: &str,
    project: &LtdProject,
    series: Series,
) -> Result<Document, MetadataError> {
    let lander = sources.lander_metadata(&project.slug).await?;
    let details = lander.series_details(&project.slug, series)?;

    let github_url = lander
        .repository_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| project.source_repo_url.clone());
    let github = sources
        .github_metadata(&github_url, project.default_edition.date_rebuilt)
        .await;

    let approval = match details {
        SeriesDetails::Tn | SeriesDetails::Op => None,
        _ => lander.approval_string(),
    };
    let url = if lander.canonical_url.trim().is_empty() {
        project.published_url.clone()
    } else {
        lander.canonical_url.clone()
    };
    let handle = if lander.identifier.trim().is_empty() {
        project.slug.to_ascii_uppercase()
    } else {
        lander.identifier.clone()
    };

    Ok(Document {
        url,
        title: lander.title.clone(),
        project_id: project.slug.clone(),
        organization_id: organization.to_string(),
        handle,
        github_url,
        github_issues: github.issues,
        github_release: github.release,
        latest_commit_datetime: github.commit_date,
        ssdc_author_name: lander.ssdc_lead(),
        approval,
        details,
    })
}

/// Refresh from the live sources, falling back to `dataset` per project.
pub async fn refresh_live(
    sources: Arc<dyn RefreshSources>,
    dataset: Option<&Dataset>,
    store: &dyn ProjectStore,
    options: &RefreshOptions,
) -> Result<RefreshSummary> {
    let mut summary = RefreshSummary::start(RefreshMode::Live);

    let org = sources
        .organization()
        .await
        .context("Failed to get LTD organization")?;
    let projects = sources
        .projects()
        .await
        .context("Failed to list LTD projects")?;
    tracing::info!(organization = %org.slug, projects = projects.len(), "Listed projects");

    let mut keep: BTreeMap<Series, Vec<String>> = BTreeMap::new();
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for project in projects {
        let Some(series) = Series::from_slug(&project.slug) else {
            tracing::debug!(slug = %project.slug, "Skipping project outside the known series");
            summary.skipped += 1;
            continue;
        };
        keep.entry(series).or_default().push(project.slug.clone());

        let permit = semaphore.clone().acquire_owned().await?;
        let sources = sources.clone();
        let organization = org.slug.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let result = ingest_project(sources.as_ref(), &organization, &project, series).await;
            (project.slug, series, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (slug, series, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Project ingest task failed");
                summary.failed += 1;
                continue;
            }
        };

        match result {
            Ok(doc) => {
                tracing::debug!(slug = %slug, handle = %doc.handle, "Ingested project");
                store.upsert(&doc).await?;
                summary.ingested += 1;
            }
            Err(e) => {
                let fallback = dataset
                    .and_then(|d| d.find(&slug, &options.docs_base_url))
                    .filter(|d| d.series() == series);
                match fallback {
                    Some(doc) => {
                        tracing::warn!(slug = %slug, error = %e, "Using dataset entry for project");
                        store.upsert(&doc).await?;
                        summary.fallbacks += 1;
                    }
                    None => {
                        tracing::warn!(slug = %slug, error = %e, "Keeping cached entry for project");
                        summary.failed += 1;
                    }
                }
            }
        }
    }

    if options.prune {
        summary.pruned = prune_series(store, &keep).await?;
    }

    Ok(summary.finish())
}

/// Runs refreshes against one store, reusing live clients between runs so
/// the LTD token cache stays warm.
pub struct Refresher {
    config: Arc<Config>,
    store: Arc<dyn ProjectStore>,
    sources: Option<Arc<dyn RefreshSources>>,
}

impl Refresher {
    /// Build live sources when the configured mode needs them.
    pub fn new(config: Arc<Config>, store: Arc<dyn ProjectStore>) -> Result<Self> {
        let sources: Option<Arc<dyn RefreshSources>> = match config.refresh.mode {
            RefreshMode::Dataset => None,
            RefreshMode::Live => Some(Arc::new(LiveSources::new(config.clone())?)),
        };
        Ok(Self {
            config,
            store,
            sources,
        })
    }

    /// Use the given sources for live runs.
    pub fn with_sources(
        config: Arc<Config>,
        store: Arc<dyn ProjectStore>,
        sources: Arc<dyn RefreshSources>,
    ) -> Self {
        Self {
            config,
            store,
            sources: Some(sources),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one refresh and record its summary in the store.
    pub async fn run_once(&self) -> Result<RefreshSummary> {
        let span = tracing::info_span!("refresh", mode = self.config.refresh.mode.as_str());
        async {
            let summary = match (self.config.refresh.mode, &self.sources) {
                (RefreshMode::Dataset, _) => {
                    let dataset = Dataset::load(&self.config.dataset.path)?;
                    refresh_from_dataset(
                        &dataset,
                        &self.config.dataset.docs_base_url,
                        self.store.as_ref(),
                        self.config.refresh.prune,
                    )
                    .await?
                }
                (RefreshMode::Live, Some(sources)) => {
                    let dataset = load_fallback_dataset(&self.config.dataset.path);
                    refresh_live(
                        sources.clone(),
                        dataset.as_ref(),
                        self.store.as_ref(),
                        &RefreshOptions::from_config(&self.config),
                    )
                    .await?
                }
                (RefreshMode::Live, None) => bail!("Live refresh has no configured sources"),
            };

            self.store.record_refresh(&summary).await?;
            tracing::info!(
                run_id = %summary.id,
                ingested = summary.ingested,
                fallbacks = summary.fallbacks,
                failed = summary.failed,
                skipped = summary.skipped,
                pruned = summary.pruned,
                "Refresh complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}

/// The manifest is optional in live mode; a broken one only disables
/// fallbacks.
fn load_fallback_dataset(path: &Path) -> Option<Dataset> {
    if !path.exists() {
        return None;
    }
    match Dataset::load(path) {
        Ok(d) => Some(d),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable dataset");
            None
        }
    }
}

/// One-shot refresh with the configured mode.
pub async fn run_refresh(config: &Config, store: Arc<dyn ProjectStore>) -> Result<RefreshSummary> {
    Refresher::new(Arc::new(config.clone()), store)?
        .run_once()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_live_credentials_required() {
        let config = Config::default();
        let err = check_live_credentials(&config).unwrap_err().to_string();
        assert!(err.contains("PORTAL_LTD_API_PASSWORD"));
        assert!(err.contains("PORTAL_AWS_ACCESS_KEY_ID"));
        assert!(err.contains("PORTAL_AWS_ACCESS_KEY_SECRET"));
    }

    #[test]
    fn test_live_credentials_present() {
        let mut config = Config::default();
        config.ltd.password = Some("pw".into());
        config.s3.access_key_id = Some("AKID".into());
        config.s3.secret_access_key = Some("secret".into());
        assert!(check_live_credentials(&config).is_ok());
    }

    #[test]
    fn test_refresher_live_without_credentials_fails() {
        let mut config = Config::default();
        config.refresh.mode = RefreshMode::Live;
        let result = Refresher::new(Arc::new(config), Arc::new(MemoryStore::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dataset_refresh_prunes_removed_entries() {
        let store = MemoryStore::new();
        let first = Dataset::from_yaml_str(
            r#"
ssdc-pm:
  - handle: SSDC-PM-001
    title: Plan
    project_id: ssdc-pm-001
    github_url: https://github.com/SPHEREx/ssdc-pm-001
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
  - handle: SSDC-PM-002
    title: Schedule
    project_id: ssdc-pm-002
    github_url: https://github.com/SPHEREx/ssdc-pm-002
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
"#,
        )
        .unwrap();
        let summary = refresh_from_dataset(&first, "https://docs", &store, true)
            .await
            .unwrap();
        assert_eq!(summary.ingested, 2);
        assert_eq!(summary.mode, "dataset");

        let second = Dataset::from_yaml_str(
            r#"
ssdc-pm:
  - handle: SSDC-PM-002
    title: Schedule
    project_id: ssdc-pm-002
    github_url: https://github.com/SPHEREx/ssdc-pm-002
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
"#,
        )
        .unwrap();
        let summary = refresh_from_dataset(&second, "https://docs", &store, true)
            .await
            .unwrap();
        assert_eq!(summary.pruned, 1);
        let left = store.get_all(Series::Pm).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].url, "https://docs/ssdc-pm-002");
    }
}

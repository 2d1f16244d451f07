//! The shared document cache.
//!
//! The refresh pipeline writes [`Document`]s here and the web tier reads
//! them back; handlers never touch the network. [`SqliteStore`] is the
//! cache shared between a `portal worker` process and a `portal serve`
//! process. [`MemoryStore`] keeps everything in-process.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](ProjectStore::upsert) | Insert or replace a document |
//! | [`get`](ProjectStore::get) | One document by series and project id |
//! | [`get_all`](ProjectStore::get_all) | All documents of a series, by project id |
//! | [`retain`](ProjectStore::retain) | Drop documents of a series not in a keep list |
//! | [`record_refresh`](ProjectStore::record_refresh) | Remember a refresh run |
//! | [`last_refresh`](ProjectStore::last_refresh) | Most recent refresh run |

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{Document, Series};
use crate::refresh::RefreshSummary;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert or replace a document, keyed by its series and project id.
    async fn upsert(&self, doc: &Document) -> Result<()>;

    async fn get(&self, series: Series, project_id: &str) -> Result<Option<Document>>;

    /// All documents of a series, sorted by project id.
    async fn get_all(&self, series: Series) -> Result<Vec<Document>>;

    /// Remove documents of `series` whose project id is not in `keep_ids`.
    ///
    /// Returns the number of documents removed.
    async fn retain(&self, series: Series, keep_ids: &[String]) -> Result<u64>;

    async fn record_refresh(&self, summary: &RefreshSummary) -> Result<()>;

    async fn last_refresh(&self) -> Result<Option<RefreshSummary>>;
}

/// SQLite implementation of [`ProjectStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured cache file and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_document(body: &str) -> Result<Document> {
    serde_json::from_str(body).context("Corrupt document in cache")
}

fn ts_to_datetime(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| anyhow!("Invalid timestamp in cache: {}", ts))
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn upsert(&self, doc: &Document) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        sqlx::query(
            r#"
            INSERT INTO projects (series, project_id, handle, body_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(series, project_id) DO UPDATE SET
                handle = excluded.handle,
                body_json = excluded.body_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(doc.series().cache_key())
        .bind(&doc.project_id)
        .bind(&doc.handle)
        .bind(body)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, series: Series, project_id: &str) -> Result<Option<Document>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body_json FROM projects WHERE series = ? AND project_id = ?",
        )
        .bind(series.cache_key())
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        body.as_deref().map(decode_document).transpose()
    }

    async fn get_all(&self, series: Series) -> Result<Vec<Document>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT body_json FROM projects WHERE series = ? ORDER BY project_id",
        )
        .bind(series.cache_key())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|b| decode_document(b)).collect()
    }

    async fn retain(&self, series: Series, keep_ids: &[String]) -> Result<u64> {
        let keep: HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT project_id FROM projects WHERE series = ?")
                .bind(series.cache_key())
                .fetch_all(&self.pool)
                .await?;

        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for project_id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
            removed += sqlx::query("DELETE FROM projects WHERE series = ? AND project_id = ?")
                .bind(series.cache_key())
                .bind(project_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }

    async fn record_refresh(&self, summary: &RefreshSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_runs (id, mode, started_at, finished_at,
                                      ingested, fallbacks, failed, skipped, pruned)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&summary.id)
        .bind(&summary.mode)
        .bind(summary.started_at.timestamp())
        .bind(summary.finished_at.timestamp())
        .bind(summary.ingested as i64)
        .bind(summary.fallbacks as i64)
        .bind(summary.failed as i64)
        .bind(summary.skipped as i64)
        .bind(summary.pruned as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_refresh(&self) -> Result<Option<RefreshSummary>> {
        let row = sqlx::query(
            r#"
            SELECT id, mode, started_at, finished_at, ingested, fallbacks, failed, skipped, pruned
            FROM refresh_runs
            ORDER BY finished_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(RefreshSummary {
            id: row.get("id"),
            mode: row.get("mode"),
            started_at: ts_to_datetime(row.get("started_at"))?,
            finished_at: ts_to_datetime(row.get("finished_at"))?,
            ingested: row.get::<i64, _>("ingested") as u64,
            fallbacks: row.get::<i64, _>("fallbacks") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            skipped: row.get::<i64, _>("skipped") as u64,
            pruned: row.get::<i64, _>("pruned") as u64,
        }))
    }
}

/// In-memory store for tests and single-process deployments.
///
/// Uses a `BTreeMap` behind `std::sync::RwLock`, so `get_all` comes back in
/// project-id order for free.
pub struct MemoryStore {
    docs: RwLock<BTreeMap<(Series, String), Document>>,
    runs: RwLock<Vec<RefreshSummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            runs: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn upsert(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        docs.insert((doc.series(), doc.project_id.clone()), doc.clone());
        Ok(())
    }

    async fn get(&self, series: Series, project_id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(&(series, project_id.to_string())).cloned())
    }

    async fn get_all(&self, series: Series) -> Result<Vec<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .iter()
            .filter(|((s, _), _)| *s == series)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn retain(&self, series: Series, keep_ids: &[String]) -> Result<u64> {
        let keep: HashSet<&str> = keep_ids.iter().map(String::as_str).collect();
        let mut docs = self.docs.write().map_err(poisoned)?;
        let before = docs.len();
        docs.retain(|(s, id), _| *s != series || keep.contains(id.as_str()));
        Ok((before - docs.len()) as u64)
    }

    async fn record_refresh(&self, summary: &RefreshSummary) -> Result<()> {
        self.runs.write().map_err(poisoned)?.push(summary.clone());
        Ok(())
    }

    async fn last_refresh(&self) -> Result<Option<RefreshSummary>> {
        Ok(self.runs.read().map_err(poisoned)?.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GitHubIssueCount, SeriesDetails};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn doc(project_id: &str, details: SeriesDetails) -> Document {
        let repo = format!("https://github.com/SPHEREx/{}", project_id);
        Document {
            url: format!("https://spherex-docs.ipac.caltech.edu/{}", project_id),
            title: format!("Title of {}", project_id),
            project_id: project_id.to_string(),
            organization_id: "spherex".into(),
            handle: project_id.to_uppercase(),
            github_issues: GitHubIssueCount::empty_for(&repo),
            github_url: repo,
            github_release: None,
            latest_commit_datetime: Utc.with_ymd_and_hms(2022, 5, 1, 0, 0, 0).unwrap(),
            ssdc_author_name: "Jane Doe".into(),
            approval: None,
            details,
        }
    }

    fn summary(id: &str, minute: u32) -> RefreshSummary {
        let at = Utc.with_ymd_and_hms(2022, 5, 1, 12, minute, 0).unwrap();
        RefreshSummary {
            id: id.to_string(),
            mode: "dataset".into(),
            started_at: at,
            finished_at: at,
            ingested: 3,
            fallbacks: 1,
            failed: 0,
            skipped: 2,
            pruned: 0,
        }
    }

    async fn sqlite_store(tmp: &TempDir) -> SqliteStore {
        let mut config = Config::default();
        config.cache.path = tmp.path().join("cache").join("portal.sqlite");
        SqliteStore::open(&config).await.unwrap()
    }

    async fn exercise(store: &dyn ProjectStore) {
        store.upsert(&doc("ssdc-pm-002", SeriesDetails::Pm)).await.unwrap();
        store.upsert(&doc("ssdc-pm-001", SeriesDetails::Pm)).await.unwrap();
        store.upsert(&doc("ssdc-tn-001", SeriesDetails::Tn)).await.unwrap();

        let pm = store.get_all(Series::Pm).await.unwrap();
        let ids: Vec<&str> = pm.iter().map(|d| d.project_id.as_str()).collect();
        assert_eq!(ids, vec!["ssdc-pm-001", "ssdc-pm-002"]);

        // Upsert replaces.
        let mut changed = doc("ssdc-pm-001", SeriesDetails::Pm);
        changed.title = "Renamed".into();
        store.upsert(&changed).await.unwrap();
        let got = store.get(Series::Pm, "ssdc-pm-001").await.unwrap().unwrap();
        assert_eq!(got, changed);
        assert_eq!(store.get_all(Series::Pm).await.unwrap().len(), 2);

        assert!(store.get(Series::Tn, "ssdc-pm-001").await.unwrap().is_none());

        // Retain only touches the given series.
        let removed = store
            .retain(Series::Pm, &["ssdc-pm-002".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_all(Series::Pm).await.unwrap().len(), 1);
        assert_eq!(store.get_all(Series::Tn).await.unwrap().len(), 1);

        assert!(store.last_refresh().await.unwrap().is_none());
        store.record_refresh(&summary("run-1", 0)).await.unwrap();
        store.record_refresh(&summary("run-2", 15)).await.unwrap();
        let last = store.last_refresh().await.unwrap().unwrap();
        assert_eq!(last.id, "run-2");
        assert_eq!(last.skipped, 2);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_shared_between_connections() {
        let tmp = TempDir::new().unwrap();
        let writer = sqlite_store(&tmp).await;
        let reader = sqlite_store(&tmp).await;

        let d = doc(
            "ssdc-if-003",
            SeriesDetails::If {
                interface_partner_name: "IRSA".into(),
            },
        );
        writer.upsert(&d).await.unwrap();
        assert_eq!(reader.get(Series::If, "ssdc-if-003").await.unwrap(), Some(d));
    }
}

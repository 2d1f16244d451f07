//! Cache statistics.
//!
//! A quick summary of what the cache holds: document counts per series and
//! the outcome of the last refresh. Used by `portal stats` to check that the
//! worker is keeping things fresh.

use anyhow::Result;

use crate::config::Config;
use crate::models::Series;
use crate::refresh::RefreshSummary;
use crate::store::{ProjectStore, SqliteStore};

#[derive(Debug, Clone)]
pub struct PortalStats {
    pub per_series: Vec<(Series, usize)>,
    pub last_refresh: Option<RefreshSummary>,
}

impl PortalStats {
    pub fn total(&self) -> usize {
        self.per_series.iter().map(|(_, n)| n).sum()
    }
}

pub async fn collect_stats(store: &dyn ProjectStore) -> Result<PortalStats> {
    let mut per_series = Vec::with_capacity(Series::ALL.len());
    for series in Series::ALL {
        per_series.push((series, store.get_all(series).await?.len()));
    }
    Ok(PortalStats {
        per_series,
        last_refresh: store.last_refresh().await?,
    })
}

/// Run the stats command: query the cache and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let stats = collect_stats(&store).await?;

    let cache_size = std::fs::metadata(&config.cache.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("SPHEREx Documentation Portal: Cache Stats");
    println!("=======================================");
    println!();
    println!("  Cache:       {}", config.cache.path.display());
    println!("  Size:        {}", format_bytes(cache_size));
    println!("  Documents:   {}", stats.total());
    println!();
    println!("  {:<10} {:>6}   {}", "SERIES", "DOCS", "TITLE");
    println!("  {}", "-".repeat(50));
    for (series, count) in &stats.per_series {
        println!("  {:<10} {:>6}   {}", series.handle_prefix(), count, series.title());
    }
    println!();

    match &stats.last_refresh {
        Some(r) => {
            println!(
                "  Last refresh: {} ({} mode, run {})",
                format_ts_relative(r.finished_at.timestamp()),
                r.mode,
                r.id
            );
            println!(
                "    ingested {}, fallbacks {}, failed {}, skipped {}, pruned {}",
                r.ingested, r.fallbacks, r.failed, r.skipped, r.pruned
            );
        }
        None => println!("  Last refresh: never"),
    }
    println!();

    store.pool().close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::refresh::refresh_from_dataset;
    use crate::store::MemoryStore;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
    }

    #[tokio::test]
    async fn test_collect_stats() {
        let store = MemoryStore::new();
        let empty = collect_stats(&store).await.unwrap();
        assert_eq!(empty.total(), 0);
        assert!(empty.last_refresh.is_none());

        let dataset = Dataset::from_yaml_str(
            r#"
ssdc-op:
  - handle: SSDC-OP-001
    title: Ops
    project_id: ssdc-op-001
    github_url: https://github.com/SPHEREx/ssdc-op-001
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
"#,
        )
        .unwrap();
        let summary = refresh_from_dataset(&dataset, "https://docs", &store, true)
            .await
            .unwrap();
        store.record_refresh(&summary).await.unwrap();

        let stats = collect_stats(&store).await.unwrap();
        assert_eq!(stats.total(), 1);
        assert_eq!(stats.per_series[6], (Series::Op, 1));
        assert_eq!(stats.last_refresh.unwrap().id, summary.id);
    }
}

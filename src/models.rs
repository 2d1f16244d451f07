//! Domain types for documentation project metadata.
//!
//! A [`Document`] is what the refresh pipeline writes into the cache and what
//! the web tier renders. The series-specific columns live in
//! [`SeriesDetails`], so a document's [`Series`] is always derived from the
//! shape of its details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::github::repo_web_url;

/// A document series, identified by its SSDC handle prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Series {
    Ms,
    Pm,
    If,
    Dp,
    Tr,
    Tn,
    Op,
}

impl Series {
    /// All series in the order they appear on the homepage.
    pub const ALL: [Series; 7] = [
        Series::Ms,
        Series::Pm,
        Series::If,
        Series::Dp,
        Series::Tr,
        Series::Tn,
        Series::Op,
    ];

    /// Project slug prefix in the LTD API, also the URL path segment.
    pub fn slug(&self) -> &'static str {
        match self {
            Series::Ms => "ssdc-ms",
            Series::Pm => "ssdc-pm",
            Series::If => "ssdc-if",
            Series::Dp => "ssdc-dp",
            Series::Tr => "ssdc-tr",
            Series::Tn => "ssdc-tn",
            Series::Op => "ssdc-op",
        }
    }

    /// Display prefix of document handles (e.g. `SSDC-MS`).
    pub fn handle_prefix(&self) -> &'static str {
        match self {
            Series::Ms => "SSDC-MS",
            Series::Pm => "SSDC-PM",
            Series::If => "SSDC-IF",
            Series::Dp => "SSDC-DP",
            Series::Tr => "SSDC-TR",
            Series::Tn => "SSDC-TN",
            Series::Op => "SSDC-OP",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Series::Ms => "Pipeline Module Specifications",
            Series::Pm => "Project Management",
            Series::If => "Interface Specifications",
            Series::Dp => "Data Products",
            Series::Tr => "Test Reports",
            Series::Tn => "Technical Notes",
            Series::Op => "Operations Documents",
        }
    }

    /// Key used for the series in the cache and the dataset manifest
    /// (e.g. `ssdc_ms`).
    pub fn cache_key(&self) -> &'static str {
        match self {
            Series::Ms => "ssdc_ms",
            Series::Pm => "ssdc_pm",
            Series::If => "ssdc_if",
            Series::Dp => "ssdc_dp",
            Series::Tr => "ssdc_tr",
            Series::Tn => "ssdc_tn",
            Series::Op => "ssdc_op",
        }
    }

    /// Classify an LTD project slug by its prefix.
    ///
    /// ```
    /// use doc_portal::models::Series;
    /// assert_eq!(Series::from_slug("ssdc-ms-012"), Some(Series::Ms));
    /// assert_eq!(Series::from_slug("SSDC-TR-001"), Some(Series::Tr));
    /// assert_eq!(Series::from_slug("spherex-handbook"), None);
    /// ```
    pub fn from_slug(slug: &str) -> Option<Series> {
        let lower = slug.to_ascii_lowercase();
        Series::ALL
            .into_iter()
            .find(|s| lower.starts_with(s.slug()))
    }

    /// Parse a URL path segment or cache key (`ssdc-ms` or `ssdc_ms`).
    pub fn from_key(key: &str) -> Option<Series> {
        Series::ALL
            .into_iter()
            .find(|s| key.eq_ignore_ascii_case(s.slug()) || key.eq_ignore_ascii_case(s.cache_key()))
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handle_prefix())
    }
}

/// Summary info about open GitHub issues and pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubIssueCount {
    pub open_issue_count: u32,
    pub open_pr_count: u32,
    pub issue_url: String,
    pub pr_url: String,
}

impl GitHubIssueCount {
    /// Zero counts with links derived from a repository URL.
    pub fn empty_for(repo_url: &str) -> Self {
        Self::for_repo(repo_url, 0, 0)
    }

    pub fn for_repo(repo_url: &str, issues: u32, prs: u32) -> Self {
        let base = repo_web_url(repo_url);
        Self {
            open_issue_count: issues,
            open_pr_count: prs,
            issue_url: format!("{}/issues", base),
            pr_url: format!("{}/pulls", base),
        }
    }
}

/// The latest GitHub release of a document repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag: String,
    /// When the release was published (UTC).
    pub date_created: DateTime<Utc>,
}

/// Series-specific document fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "series")]
pub enum SeriesDetails {
    #[serde(rename = "SSDC-MS")]
    Ms {
        project_contact_name: String,
        diagram_index: String,
        /// Pipeline level without any `L` prefix.
        pipeline_level: String,
        difficulty: String,
    },
    #[serde(rename = "SSDC-PM")]
    Pm,
    #[serde(rename = "SSDC-IF")]
    If { interface_partner_name: String },
    #[serde(rename = "SSDC-DP")]
    Dp,
    #[serde(rename = "SSDC-TR")]
    Tr {
        va_doors_id: Option<String>,
        req_doors_id: Option<String>,
        ipac_jira_id: Option<String>,
    },
    #[serde(rename = "SSDC-TN")]
    Tn,
    #[serde(rename = "SSDC-OP")]
    Op,
}

impl SeriesDetails {
    pub fn series(&self) -> Series {
        match self {
            SeriesDetails::Ms { .. } => Series::Ms,
            SeriesDetails::Pm => Series::Pm,
            SeriesDetails::If { .. } => Series::If,
            SeriesDetails::Dp => Series::Dp,
            SeriesDetails::Tr { .. } => Series::Tr,
            SeriesDetails::Tn => Series::Tn,
            SeriesDetails::Op => Series::Op,
        }
    }
}

/// A SPHEREx document hosted on the documentation site, with its GitHub
/// activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Root HTML URL of the published document.
    pub url: String,
    pub title: String,
    /// Project slug in the LTD API; unique within a series.
    pub project_id: String,
    pub organization_id: String,
    /// Document identifier, e.g. `SSDC-MS-012`.
    pub handle: String,
    pub github_url: String,
    pub github_issues: GitHubIssueCount,
    pub github_release: Option<GitHubRelease>,
    /// Latest push to the default branch (UTC).
    pub latest_commit_datetime: DateTime<Utc>,
    /// Name of the lead SSDC (IPAC) author.
    pub ssdc_author_name: String,
    /// Approval as `"{date}, {name}"`.
    pub approval: Option<String>,
    pub details: SeriesDetails,
}

impl Document {
    pub fn series(&self) -> Series {
        self.details.series()
    }
}

/// Natural ordering of document handles: numeric runs compare by value, so
/// `SSDC-MS-2` sorts before `SSDC-MS-10`.
pub fn compare_handles(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_number(&mut ai);
                let nb = take_number(&mut bi);
                let ord = na
                    .trim_start_matches('0')
                    .len()
                    .cmp(&nb.trim_start_matches('0').len())
                    .then_with(|| na.trim_start_matches('0').cmp(nb.trim_start_matches('0')));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                let ord = ca.to_ascii_lowercase().cmp(&cb.to_ascii_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_number<I: Iterator<Item = char>>(it: &mut std::iter::Peekable<I>) -> String {
    let mut digits = String::new();
    while let Some(c) = it.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        it.next();
    }
    digits
}

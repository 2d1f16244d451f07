//! Static YAML dataset manifest.
//!
//! The manifest lists documents per series under keys such as `ssdc-ms`.
//! In `dataset` refresh mode it is the whole catalog; in `live` mode it is
//! the per-project fallback when a project's published metadata can't be
//! read.
//!
//! ```yaml
//! ssdc-ms:
//!   - handle: SSDC-MS-001
//!     title: Level 1 Pipeline Overview
//!     project_id: ssdc-ms-001
//!     github_url: https://github.com/SPHEREx/ssdc-ms-001
//!     issues: 2
//!     prs: 1
//!     commit_date: 2022-03-01T12:00:00Z
//!     tag: v1.0.0
//!     tag_date: 2022-02-20T08:00:00Z
//!     ssdc_author: Jane Doe
//!     project_author: John Roe
//!     approval: null
//!     difficulty: Medium
//!     pipeline_level: 1
//!     diagram_index: 3
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::Path;

use crate::models::{Document, GitHubIssueCount, GitHubRelease, Series, SeriesDetails};

/// Accept either a YAML integer or string and keep it as a string.
pub(crate) fn de_flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Int(i64),
        Str(String),
    }

    Ok(match Flexible::deserialize(deserializer)? {
        Flexible::Int(i) => i.to_string(),
        Flexible::Str(s) => s,
    })
}

/// Pipeline levels are published either as `2` or `L2`.
pub(crate) fn normalize_pipeline_level(level: &str) -> String {
    level.trim().trim_start_matches(['L', 'l']).to_string()
}

fn default_organization() -> String {
    "spherex".to_string()
}

/// Fields shared by every manifest entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryBase {
    pub title: String,
    pub project_id: String,
    #[serde(default = "default_organization")]
    pub organization_id: String,
    pub handle: String,
    pub github_url: String,
    #[serde(default)]
    pub issues: u32,
    #[serde(default)]
    pub prs: u32,
    pub commit_date: DateTime<Utc>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub tag_date: Option<DateTime<Utc>>,
    pub ssdc_author: String,
    #[serde(default)]
    pub approval: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MsEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub project_author: String,
    pub difficulty: String,
    #[serde(deserialize_with = "de_flexible_string")]
    pub pipeline_level: String,
    #[serde(deserialize_with = "de_flexible_string")]
    pub diagram_index: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IfEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub interface_partner: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    #[serde(default)]
    pub va_doors_id: Option<String>,
    #[serde(default)]
    pub req_doors_id: Option<String>,
    #[serde(default)]
    pub ipac_jira_id: Option<String>,
}

/// The parsed manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dataset {
    #[serde(rename = "ssdc-ms", default)]
    pub ssdc_ms: Vec<MsEntry>,
    #[serde(rename = "ssdc-pm", default)]
    pub ssdc_pm: Vec<EntryBase>,
    #[serde(rename = "ssdc-if", default)]
    pub ssdc_if: Vec<IfEntry>,
    #[serde(rename = "ssdc-dp", default)]
    pub ssdc_dp: Vec<EntryBase>,
    #[serde(rename = "ssdc-tr", default)]
    pub ssdc_tr: Vec<TrEntry>,
    #[serde(rename = "ssdc-tn", default)]
    pub ssdc_tn: Vec<EntryBase>,
    #[serde(rename = "ssdc-op", default)]
    pub ssdc_op: Vec<EntryBase>,
}

impl EntryBase {
    fn to_document(&self, base_url: &str, details: SeriesDetails) -> Document {
        let github_release = match (&self.tag, self.tag_date) {
            (Some(tag), Some(date)) => Some(GitHubRelease {
                tag: tag.clone(),
                date_created: date,
            }),
            _ => None,
        };
        // Technical notes and operations documents carry no approval.
        let approval = match details {
            SeriesDetails::Tn | SeriesDetails::Op => None,
            _ => self.approval.clone(),
        };

        Document {
            url: format!("{}/{}", base_url.trim_end_matches('/'), self.project_id),
            title: self.title.clone(),
            project_id: self.project_id.clone(),
            organization_id: self.organization_id.clone(),
            handle: self.handle.clone(),
            github_url: self.github_url.clone(),
            github_issues: GitHubIssueCount::for_repo(&self.github_url, self.issues, self.prs),
            github_release,
            latest_commit_datetime: self.commit_date,
            ssdc_author_name: self.ssdc_author.clone(),
            approval,
            details,
        }
    }
}

impl Dataset {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty file parses as YAML null; treat it as an empty manifest.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse dataset YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid dataset file: {}", path.display()))
    }

    /// Export every entry as a domain [`Document`].
    pub fn documents(&self, base_url: &str) -> Vec<Document> {
        let mut docs = Vec::new();

        for e in &self.ssdc_ms {
            docs.push(e.base.to_document(
                base_url,
                SeriesDetails::Ms {
                    project_contact_name: e.project_author.clone(),
                    diagram_index: e.diagram_index.clone(),
                    pipeline_level: normalize_pipeline_level(&e.pipeline_level),
                    difficulty: e.difficulty.clone(),
                },
            ));
        }
        for e in &self.ssdc_pm {
            docs.push(e.to_document(base_url, SeriesDetails::Pm));
        }
        for e in &self.ssdc_if {
            docs.push(e.base.to_document(
                base_url,
                SeriesDetails::If {
                    interface_partner_name: e.interface_partner.clone(),
                },
            ));
        }
        for e in &self.ssdc_dp {
            docs.push(e.to_document(base_url, SeriesDetails::Dp));
        }
        for e in &self.ssdc_tr {
            docs.push(e.base.to_document(
                base_url,
                SeriesDetails::Tr {
                    va_doors_id: e.va_doors_id.clone(),
                    req_doors_id: e.req_doors_id.clone(),
                    ipac_jira_id: e.ipac_jira_id.clone(),
                },
            ));
        }
        for e in &self.ssdc_tn {
            docs.push(e.to_document(base_url, SeriesDetails::Tn));
        }
        for e in &self.ssdc_op {
            docs.push(e.to_document(base_url, SeriesDetails::Op));
        }

        docs
    }

    /// Look up one project by id, exported as a document.
    pub fn find(&self, project_id: &str, base_url: &str) -> Option<Document> {
        self.documents(base_url)
            .into_iter()
            .find(|d| d.project_id == project_id)
    }

    /// Number of entries per series, in homepage order.
    pub fn counts(&self) -> Vec<(Series, usize)> {
        Series::ALL
            .into_iter()
            .map(|s| {
                let n = match s {
                    Series::Ms => self.ssdc_ms.len(),
                    Series::Pm => self.ssdc_pm.len(),
                    Series::If => self.ssdc_if.len(),
                    Series::Dp => self.ssdc_dp.len(),
                    Series::Tr => self.ssdc_tr.len(),
                    Series::Tn => self.ssdc_tn.len(),
                    Series::Op => self.ssdc_op.len(),
                };
                (s, n)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counts().iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistency problems a loader wouldn't catch: handles filed under
    /// the wrong series and duplicate project ids.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for doc in self.documents("") {
            let series = doc.series();
            if !doc
                .handle
                .to_ascii_uppercase()
                .starts_with(series.handle_prefix())
            {
                problems.push(format!(
                    "{}: handle {} is listed under {}",
                    doc.project_id,
                    doc.handle,
                    series.slug()
                ));
            }
            if !seen.insert(doc.project_id.clone()) {
                problems.push(format!("{}: duplicate project_id", doc.project_id));
            }
        }

        problems
    }
}

/// Validate a manifest file and print a summary (`portal check-dataset`).
pub fn run_check_dataset(path: &Path) -> Result<()> {
    let dataset = Dataset::load(path)?;

    println!("Dataset: {}", path.display());
    for (series, count) in dataset.counts() {
        println!("  {:<10} {:>4}", series.handle_prefix(), count);
    }
    println!("  {:<10} {:>4}", "total", dataset.len());

    let problems = dataset.problems();
    if !problems.is_empty() {
        println!();
        for p in &problems {
            println!("  problem: {}", p);
        }
        bail!("{} problem(s) found in {}", problems.len(), path.display());
    }

    println!("OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://spherex-docs.ipac.caltech.edu";

    const SAMPLE: &str = r#"
ssdc-ms:
  - handle: SSDC-MS-001
    title: Level 1 Pipeline Overview
    project_id: ssdc-ms-001
    github_url: https://github.com/SPHEREx/ssdc-ms-001
    issues: 2
    prs: 1
    commit_date: 2022-03-01T12:00:00Z
    tag: v1.0.0
    tag_date: 2022-02-20T08:00:00Z
    ssdc_author: Jane Doe
    project_author: John Roe
    approval: "2022-02-21, A. Approver"
    difficulty: Medium
    pipeline_level: L1
    diagram_index: 3
  - handle: SSDC-MS-002
    title: Astrometry
    project_id: ssdc-ms-002
    github_url: https://github.com/SPHEREx/ssdc-ms-002
    commit_date: 2022-04-01T12:00:00Z
    tag: v0.1.0
    ssdc_author: Jane Doe
    project_author: John Roe
    difficulty: Hard
    pipeline_level: 2
    diagram_index: "4a"
ssdc-if:
  - handle: SSDC-IF-001
    title: IRSA Interface
    project_id: ssdc-if-001
    github_url: https://github.com/SPHEREx/ssdc-if-001
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
    interface_partner: IRSA
ssdc-tn:
  - handle: SSDC-TN-001
    title: A Note
    project_id: ssdc-tn-001
    github_url: https://github.com/SPHEREx/ssdc-tn-001
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
    approval: "ignored"
"#;

    #[test]
    fn test_parse_counts() {
        let ds = Dataset::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(ds.ssdc_ms.len(), 2);
        assert_eq!(ds.ssdc_if.len(), 1);
        assert_eq!(ds.len(), 4);
        let counts = ds.counts();
        assert_eq!(counts[0], (Series::Ms, 2));
        assert_eq!(counts[1], (Series::Pm, 0));
    }

    #[test]
    fn test_ms_document_export() {
        let ds = Dataset::from_yaml_str(SAMPLE).unwrap();
        let doc = ds.find("ssdc-ms-001", BASE).unwrap();
        assert_eq!(doc.url, "https://spherex-docs.ipac.caltech.edu/ssdc-ms-001");
        assert_eq!(doc.organization_id, "spherex");
        assert_eq!(doc.github_issues.open_issue_count, 2);
        assert_eq!(
            doc.github_issues.pr_url,
            "https://github.com/SPHEREx/ssdc-ms-001/pulls"
        );
        assert_eq!(doc.github_release.as_ref().unwrap().tag, "v1.0.0");
        assert_eq!(doc.approval.as_deref(), Some("2022-02-21, A. Approver"));
        match doc.details {
            SeriesDetails::Ms {
                pipeline_level,
                diagram_index,
                ..
            } => {
                assert_eq!(pipeline_level, "1");
                assert_eq!(diagram_index, "3");
            }
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_release_requires_tag_date() {
        let ds = Dataset::from_yaml_str(SAMPLE).unwrap();
        let doc = ds.find("ssdc-ms-002", BASE).unwrap();
        assert!(doc.github_release.is_none());
        assert_eq!(doc.github_issues.open_issue_count, 0);
    }

    #[test]
    fn test_series_details_per_key() {
        let ds = Dataset::from_yaml_str(SAMPLE).unwrap();
        let docs = ds.documents(BASE);
        let iface = docs.iter().find(|d| d.project_id == "ssdc-if-001").unwrap();
        assert_eq!(iface.series(), Series::If);

        let note = docs.iter().find(|d| d.project_id == "ssdc-tn-001").unwrap();
        assert_eq!(note.series(), Series::Tn);
        assert!(note.approval.is_none());
    }

    #[test]
    fn test_empty_dataset() {
        let ds = Dataset::from_yaml_str("").unwrap();
        assert!(ds.is_empty());
        let ds = Dataset::from_yaml_str("ssdc-ms: []\n").unwrap();
        assert!(ds.is_empty());
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let bad = "ssdc-pm:\n  - handle: SSDC-PM-001\n    title: Plan\n";
        assert!(Dataset::from_yaml_str(bad).is_err());
    }

    #[test]
    fn test_problems() {
        let ds = Dataset::from_yaml_str(SAMPLE).unwrap();
        assert!(ds.problems().is_empty());

        let bad = r#"
ssdc-pm:
  - handle: SSDC-TN-009
    title: Misfiled
    project_id: ssdc-pm-001
    github_url: https://github.com/SPHEREx/ssdc-pm-001
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
ssdc-dp:
  - handle: SSDC-DP-001
    title: Duplicate
    project_id: ssdc-pm-001
    github_url: https://github.com/SPHEREx/ssdc-pm-001
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
"#;
        let problems = Dataset::from_yaml_str(bad).unwrap().problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("SSDC-TN-009"));
        assert!(problems[1].contains("duplicate"));
    }

    #[test]
    fn test_normalize_pipeline_level() {
        assert_eq!(normalize_pipeline_level("L2"), "2");
        assert_eq!(normalize_pipeline_level("2"), "2");
        assert_eq!(normalize_pipeline_level(" l4 "), "4");
    }
}

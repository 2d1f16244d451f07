//! HTML pages.
//!
//! Each series page is a table whose columns depend on the series. Sorting
//! happens here, on the server: `?sort=<column key>&order=asc|desc`.
//! Templates live in `templates/` and are compiled in by askama.

use std::cmp::Ordering;

use anyhow::Result;
use askama::Template;
use chrono::{DateTime, Utc};

use crate::github::repo_web_url;
use crate::models::{compare_handles, Document, Series, SeriesDetails};
use crate::refresh::RefreshSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<SortOrder> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn reverse(&self) -> SortOrder {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Handle,
    Title,
    SsdcLead,
    Contact,
    PipelineLevel,
    Diagram,
    Difficulty,
    Partner,
    VaDoors,
    ReqDoors,
    Jira,
    Approval,
    Release,
    LastCommit,
    Issues,
    Prs,
}

use Column::*;

const MS_COLUMNS: &[Column] = &[
    Handle, Title, SsdcLead, Contact, PipelineLevel, Diagram, Difficulty, Approval, Release,
    LastCommit, Issues, Prs,
];
const APPROVED_COLUMNS: &[Column] = &[
    Handle, Title, SsdcLead, Approval, Release, LastCommit, Issues, Prs,
];
const IF_COLUMNS: &[Column] = &[
    Handle, Title, SsdcLead, Partner, Approval, Release, LastCommit, Issues, Prs,
];
const TR_COLUMNS: &[Column] = &[
    Handle, Title, SsdcLead, VaDoors, ReqDoors, Jira, Approval, Release, LastCommit, Issues, Prs,
];
const NOTE_COLUMNS: &[Column] = &[Handle, Title, SsdcLead, Release, LastCommit, Issues, Prs];

/// A comparable cell value. `None` from [`Column::value`] means missing.
enum SortValue<'a> {
    Text(&'a str),
    Natural(&'a str),
    Count(u32),
    Time(DateTime<Utc>),
}

impl SortValue<'_> {
    fn compare(&self, other: &SortValue<'_>) -> Ordering {
        match (self, other) {
            (SortValue::Text(a), SortValue::Text(b)) => a
                .to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b)),
            (SortValue::Natural(a), SortValue::Natural(b)) => compare_handles(a, b),
            (SortValue::Count(a), SortValue::Count(b)) => a.cmp(b),
            (SortValue::Time(a), SortValue::Time(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

fn text(s: &str) -> Option<SortValue<'_>> {
    (!s.trim().is_empty()).then_some(SortValue::Text(s))
}

fn natural(s: &str) -> Option<SortValue<'_>> {
    (!s.trim().is_empty()).then_some(SortValue::Natural(s))
}

/// Rendered table cell; an empty `href` means no link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub href: String,
}

impl Cell {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            href: String::new(),
        }
    }

    fn link(text: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            href: href.into(),
        }
    }
}

impl Column {
    pub fn for_series(series: Series) -> &'static [Column] {
        match series {
            Series::Ms => MS_COLUMNS,
            Series::Pm | Series::Dp => APPROVED_COLUMNS,
            Series::If => IF_COLUMNS,
            Series::Tr => TR_COLUMNS,
            Series::Tn | Series::Op => NOTE_COLUMNS,
        }
    }

    /// Query-string key.
    pub fn key(&self) -> &'static str {
        match self {
            Handle => "handle",
            Title => "title",
            SsdcLead => "ssdc_lead",
            Contact => "contact",
            PipelineLevel => "pipeline_level",
            Diagram => "diagram",
            Difficulty => "difficulty",
            Partner => "partner",
            VaDoors => "va_doors",
            ReqDoors => "req_doors",
            Jira => "jira",
            Approval => "approval",
            Release => "release",
            LastCommit => "updated",
            Issues => "issues",
            Prs => "prs",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Handle => "Document",
            Title => "Title",
            SsdcLead => "SSDC Lead",
            Contact => "SPHEREx Contact",
            PipelineLevel => "Level",
            Diagram => "Diagram",
            Difficulty => "Difficulty",
            Partner => "Interface Partner",
            VaDoors => "VA DOORS",
            ReqDoors => "REQ DOORS",
            Jira => "JIRA",
            Approval => "Approval",
            Release => "Release",
            LastCommit => "Updated",
            Issues => "Issues",
            Prs => "PRs",
        }
    }

    /// Look up a column by key among those shown for `series`.
    pub fn from_key(series: Series, key: &str) -> Option<Column> {
        Column::for_series(series)
            .iter()
            .copied()
            .find(|c| c.key().eq_ignore_ascii_case(key))
    }

    fn value<'a>(&self, doc: &'a Document) -> Option<SortValue<'a>> {
        match (self, &doc.details) {
            (Handle, _) => natural(&doc.handle),
            (Title, _) => text(&doc.title),
            (SsdcLead, _) => text(&doc.ssdc_author_name),
            (
                Contact,
                SeriesDetails::Ms {
                    project_contact_name,
                    ..
                },
            ) => text(project_contact_name),
            (PipelineLevel, SeriesDetails::Ms { pipeline_level, .. }) => natural(pipeline_level),
            (Diagram, SeriesDetails::Ms { diagram_index, .. }) => natural(diagram_index),
            (Difficulty, SeriesDetails::Ms { difficulty, .. }) => text(difficulty),
            (
                Partner,
                SeriesDetails::If {
                    interface_partner_name,
                },
            ) => text(interface_partner_name),
            (VaDoors, SeriesDetails::Tr { va_doors_id, .. }) => va_doors_id.as_deref().and_then(natural),
            (ReqDoors, SeriesDetails::Tr { req_doors_id, .. }) => {
                req_doors_id.as_deref().and_then(natural)
            }
            (Jira, SeriesDetails::Tr { ipac_jira_id, .. }) => ipac_jira_id.as_deref().and_then(natural),
            (Approval, _) => doc.approval.as_deref().and_then(text),
            (Release, _) => doc
                .github_release
                .as_ref()
                .map(|r| SortValue::Time(r.date_created)),
            (LastCommit, _) => Some(SortValue::Time(doc.latest_commit_datetime)),
            (Issues, _) => Some(SortValue::Count(doc.github_issues.open_issue_count)),
            (Prs, _) => Some(SortValue::Count(doc.github_issues.open_pr_count)),
            _ => None,
        }
    }

    /// Compare two documents by this column; missing values sort after
    /// present ones.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        match (self.value(a), self.value(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.compare(&y),
        }
    }

    pub fn cell(&self, doc: &Document) -> Cell {
        let opt = |v: &Option<String>| Cell::plain(v.clone().unwrap_or_default());
        match (self, &doc.details) {
            (Handle, _) => Cell::link(&doc.handle, &doc.url),
            (Title, _) => Cell::plain(&doc.title),
            (SsdcLead, _) => Cell::plain(&doc.ssdc_author_name),
            (
                Contact,
                SeriesDetails::Ms {
                    project_contact_name,
                    ..
                },
            ) => Cell::plain(project_contact_name),
            (PipelineLevel, SeriesDetails::Ms { pipeline_level, .. }) => {
                Cell::plain(format!("L{}", pipeline_level))
            }
            (Diagram, SeriesDetails::Ms { diagram_index, .. }) => Cell::plain(diagram_index),
            (Difficulty, SeriesDetails::Ms { difficulty, .. }) => Cell::plain(difficulty),
            (
                Partner,
                SeriesDetails::If {
                    interface_partner_name,
                },
            ) => Cell::plain(interface_partner_name),
            (VaDoors, SeriesDetails::Tr { va_doors_id, .. }) => opt(va_doors_id),
            (ReqDoors, SeriesDetails::Tr { req_doors_id, .. }) => opt(req_doors_id),
            (Jira, SeriesDetails::Tr { ipac_jira_id, .. }) => opt(ipac_jira_id),
            (Approval, _) => opt(&doc.approval),
            (Release, _) => match &doc.github_release {
                Some(r) => Cell::link(
                    format!("{} ({})", r.tag, r.date_created.format("%Y-%m-%d")),
                    format!("{}/releases/tag/{}", repo_web_url(&doc.github_url), r.tag),
                ),
                None => Cell::plain(""),
            },
            (LastCommit, _) => Cell::link(
                doc.latest_commit_datetime.format("%Y-%m-%d").to_string(),
                &doc.github_url,
            ),
            (Issues, _) => Cell::link(
                doc.github_issues.open_issue_count.to_string(),
                &doc.github_issues.issue_url,
            ),
            (Prs, _) => Cell::link(
                doc.github_issues.open_pr_count.to_string(),
                &doc.github_issues.pr_url,
            ),
            _ => Cell::plain(""),
        }
    }
}

/// Resolve query parameters to a sort for `series`, defaulting to handle
/// ascending.
pub fn resolve_sort(series: Series, sort: Option<&str>, order: Option<&str>) -> (Column, SortOrder) {
    // An unusable column resets the whole sort, order included.
    match sort.and_then(|k| Column::from_key(series, k)) {
        Some(column) => (column, order.and_then(SortOrder::parse).unwrap_or_default()),
        None => (Column::Handle, SortOrder::Asc),
    }
}

/// Stable sort by `column`. Descending is the exact reverse of ascending;
/// ties fall back to handle order.
pub fn sort_documents(docs: &mut [Document], column: Column, order: SortOrder) {
    docs.sort_by(|a, b| {
        let primary = column.compare(a, b);
        let primary = match order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| compare_handles(&a.handle, &b.handle))
    });
}

pub struct HeaderView {
    pub label: &'static str,
    pub href: String,
    pub active: bool,
    pub arrow: &'static str,
}

pub struct SeriesLink {
    pub slug: &'static str,
    pub prefix: &'static str,
    pub title: &'static str,
    pub count: usize,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexPage {
    pub app_name: String,
    pub series: Vec<SeriesLink>,
    pub last_refresh: String,
}

#[derive(Template)]
#[template(path = "series.html")]
pub struct SeriesPage {
    pub app_name: String,
    pub prefix: &'static str,
    pub title: &'static str,
    pub headers: Vec<HeaderView>,
    pub rows: Vec<Vec<Cell>>,
    pub last_refresh: String,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorPage {
    pub app_name: String,
    pub status: u16,
    pub message: String,
}

fn describe_refresh(last: Option<&RefreshSummary>) -> String {
    match last {
        Some(r) => format!(
            "Last updated {} ({} mode)",
            r.finished_at.format("%Y-%m-%d %H:%M UTC"),
            r.mode
        ),
        None => "Not refreshed yet".to_string(),
    }
}

pub fn render_index(
    app_name: &str,
    counts: &[(Series, usize)],
    last: Option<&RefreshSummary>,
) -> Result<String> {
    let page = IndexPage {
        app_name: app_name.to_string(),
        series: counts
            .iter()
            .map(|(s, count)| SeriesLink {
                slug: s.slug(),
                prefix: s.handle_prefix(),
                title: s.title(),
                count: *count,
            })
            .collect(),
        last_refresh: describe_refresh(last),
    };
    Ok(page.render()?)
}

pub fn render_series(
    app_name: &str,
    series: Series,
    mut docs: Vec<Document>,
    sort: Option<&str>,
    order: Option<&str>,
    last: Option<&RefreshSummary>,
) -> Result<String> {
    let (active, order) = resolve_sort(series, sort, order);
    sort_documents(&mut docs, active, order);

    let columns = Column::for_series(series);
    let headers = columns
        .iter()
        .map(|c| {
            let is_active = *c == active;
            let next = if is_active { order.reverse() } else { SortOrder::Asc };
            HeaderView {
                label: c.label(),
                href: format!("/{}?sort={}&order={}", series.slug(), c.key(), next.as_str()),
                active: is_active,
                arrow: match (is_active, order) {
                    (false, _) => "",
                    (true, SortOrder::Asc) => "\u{25B2}",
                    (true, SortOrder::Desc) => "\u{25BC}",
                },
            }
        })
        .collect();
    let rows = docs
        .iter()
        .map(|d| columns.iter().map(|c| c.cell(d)).collect())
        .collect();

    let page = SeriesPage {
        app_name: app_name.to_string(),
        prefix: series.handle_prefix(),
        title: series.title(),
        headers,
        rows,
        last_refresh: describe_refresh(last),
    };
    Ok(page.render()?)
}

/// Render an error page, degrading to plain text if the template fails.
pub fn render_error(app_name: &str, status: u16, message: &str) -> String {
    let page = ErrorPage {
        app_name: app_name.to_string(),
        status,
        message: message.to_string(),
    };
    page.render()
        .unwrap_or_else(|e| format!("{} {} (template error: {})", status, message, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GitHubIssueCount, GitHubRelease};
    use chrono::TimeZone;

    fn ms_doc(handle: &str, level: &str, release_day: Option<u32>, issues: u32) -> Document {
        let id = handle.to_lowercase();
        let repo = format!("https://github.com/SPHEREx/{}", id);
        Document {
            url: format!("https://spherex-docs.ipac.caltech.edu/{}", id),
            title: format!("Doc {}", handle),
            project_id: id,
            organization_id: "spherex".into(),
            handle: handle.to_string(),
            github_issues: GitHubIssueCount::for_repo(&repo, issues, 0),
            github_url: repo,
            github_release: release_day.map(|d| GitHubRelease {
                tag: format!("v1.{}", d),
                date_created: Utc.with_ymd_and_hms(2022, 3, d, 0, 0, 0).unwrap(),
            }),
            latest_commit_datetime: Utc.with_ymd_and_hms(2022, 4, 1, 0, 0, 0).unwrap(),
            ssdc_author_name: "Jane Doe".into(),
            approval: None,
            details: SeriesDetails::Ms {
                project_contact_name: "John Roe".into(),
                diagram_index: "1".into(),
                pipeline_level: level.into(),
                difficulty: "Low".into(),
            },
        }
    }

    fn handles(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.handle.as_str()).collect()
    }

    #[test]
    fn test_default_sort_is_natural_handle() {
        let mut docs = vec![
            ms_doc("SSDC-MS-010", "1", None, 0),
            ms_doc("SSDC-MS-002", "1", None, 0),
            ms_doc("SSDC-MS-001", "1", None, 0),
        ];
        let (col, order) = resolve_sort(Series::Ms, None, None);
        sort_documents(&mut docs, col, order);
        assert_eq!(handles(&docs), vec!["SSDC-MS-001", "SSDC-MS-002", "SSDC-MS-010"]);
    }

    #[test]
    fn test_missing_release_sorts_last_ascending() {
        let mut docs = vec![
            ms_doc("SSDC-MS-001", "1", None, 0),
            ms_doc("SSDC-MS-002", "1", Some(20), 0),
            ms_doc("SSDC-MS-003", "1", Some(5), 0),
        ];
        sort_documents(&mut docs, Column::Release, SortOrder::Asc);
        assert_eq!(handles(&docs), vec!["SSDC-MS-003", "SSDC-MS-002", "SSDC-MS-001"]);

        sort_documents(&mut docs, Column::Release, SortOrder::Desc);
        assert_eq!(handles(&docs), vec!["SSDC-MS-001", "SSDC-MS-002", "SSDC-MS-003"]);
    }

    #[test]
    fn test_numeric_columns_and_ties() {
        let mut docs = vec![
            ms_doc("SSDC-MS-003", "2", None, 10),
            ms_doc("SSDC-MS-001", "10", None, 2),
            ms_doc("SSDC-MS-002", "2", None, 2),
        ];
        sort_documents(&mut docs, Column::Issues, SortOrder::Desc);
        assert_eq!(handles(&docs), vec!["SSDC-MS-003", "SSDC-MS-001", "SSDC-MS-002"]);

        sort_documents(&mut docs, Column::PipelineLevel, SortOrder::Asc);
        assert_eq!(handles(&docs), vec!["SSDC-MS-002", "SSDC-MS-003", "SSDC-MS-001"]);
    }

    #[test]
    fn test_inapplicable_sort_falls_back() {
        assert_eq!(
            resolve_sort(Series::Pm, Some("pipeline_level"), Some("desc")),
            (Column::Handle, SortOrder::Asc)
        );
        assert_eq!(
            resolve_sort(Series::Ms, Some("bogus"), Some("desc")),
            (Column::Handle, SortOrder::Asc)
        );
        assert_eq!(
            resolve_sort(Series::Ms, None, Some("desc")),
            (Column::Handle, SortOrder::Asc)
        );
        assert_eq!(
            resolve_sort(Series::Ms, Some("handle"), Some("desc")),
            (Column::Handle, SortOrder::Desc)
        );
        assert_eq!(
            resolve_sort(Series::Ms, Some("bogus"), Some("sideways")),
            (Column::Handle, SortOrder::Asc)
        );
        assert_eq!(
            resolve_sort(Series::Tr, Some("JIRA"), None),
            (Column::Jira, SortOrder::Asc)
        );
    }

    #[test]
    fn test_column_sets() {
        assert!(Column::for_series(Series::Ms).contains(&Column::Difficulty));
        assert!(!Column::for_series(Series::Tn).contains(&Column::Approval));
        assert!(Column::for_series(Series::If).contains(&Column::Partner));
        assert_eq!(Column::for_series(Series::Dp), Column::for_series(Series::Pm));
    }

    #[test]
    fn test_cells() {
        let doc = ms_doc("SSDC-MS-001", "2", Some(3), 4);
        assert_eq!(Column::PipelineLevel.cell(&doc).text, "L2");
        let release = Column::Release.cell(&doc);
        assert_eq!(release.text, "v1.3 (2022-03-03)");
        assert_eq!(
            release.href,
            "https://github.com/SPHEREx/ssdc-ms-001/releases/tag/v1.3"
        );
        assert_eq!(Column::Issues.cell(&doc).text, "4");
        assert_eq!(Column::Partner.cell(&doc), Cell::plain(""));
    }

    #[test]
    fn test_release_link_from_git_suffixed_url() {
        let mut doc = ms_doc("SSDC-MS-001", "2", Some(3), 0);
        doc.github_url = "https://github.com/SPHEREx/ssdc-ms-001.git".into();
        assert_eq!(
            Column::Release.cell(&doc).href,
            "https://github.com/SPHEREx/ssdc-ms-001/releases/tag/v1.3"
        );
    }

    #[test]
    fn test_render_series_headers_toggle_order() {
        let docs = vec![ms_doc("SSDC-MS-001", "2", None, 0)];
        let html = render_series("spherexportal", Series::Ms, docs, Some("issues"), Some("asc"), None)
            .unwrap();
        assert!(html.contains("Pipeline Module Specifications"));
        assert!(html.contains("SSDC-MS-001"));
        assert!(html.contains("sort=issues"));
        assert!(html.contains("order=desc"));
        assert!(html.contains("Not refreshed yet"));
    }

    #[test]
    fn test_render_index_and_error() {
        let html = render_index("spherexportal", &[(Series::Tr, 3)], None).unwrap();
        assert!(html.contains("/ssdc-tr"));
        assert!(html.contains("Test Reports"));

        let html = render_error("spherexportal", 404, "Unknown series <x>");
        assert!(html.contains("404"));
        assert!(html.contains("Unknown series &lt;x&gt;"));
    }
}

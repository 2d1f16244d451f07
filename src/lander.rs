//! Metadata published alongside each document build.
//!
//! The site generator writes a JSON metadata file next to every edition of a
//! document. All series share one schema; series-specific fields are simply
//! absent for series that don't use them, and [`LanderMetadata::series_details`]
//! checks that the ones a series needs are present.

use serde::Deserialize;

use crate::dataset::{de_flexible_string, normalize_pipeline_level};
use crate::error::MetadataError;
use crate::models::{Series, SeriesDetails};

const SSDC_LEAD_ROLE: &str = "IPAC Lead";
const SPHEREX_LEAD_ROLE: &str = "SPHEREx Lead";

#[derive(Debug, Clone, Deserialize)]
pub struct LanderAuthor {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalInfo {
    pub date: String,
    pub name: String,
}

fn de_opt_flexible<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "de_flexible_string")] String);

    Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanderMetadata {
    pub canonical_url: String,
    /// Document handle, e.g. `SSDC-MS-012`.
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub document_handle_prefix: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub authors: Vec<LanderAuthor>,
    #[serde(default)]
    pub approval: Option<ApprovalInfo>,

    // SSDC-MS
    #[serde(default, deserialize_with = "de_opt_flexible")]
    pub diagram_index: Option<String>,
    #[serde(default, deserialize_with = "de_opt_flexible")]
    pub pipeline_level: Option<String>,
    #[serde(default, deserialize_with = "de_opt_flexible")]
    pub difficulty: Option<String>,

    // SSDC-IF
    #[serde(default)]
    pub interface_partner: Option<String>,

    // SSDC-TR
    #[serde(default)]
    pub va_doors_id: Option<String>,
    #[serde(default)]
    pub req_doors_id: Option<String>,
    #[serde(default)]
    pub ipac_jira_id: Option<String>,
}

impl LanderMetadata {
    pub fn from_json(key: &str, bytes: &[u8]) -> Result<Self, MetadataError> {
        serde_json::from_slice(bytes).map_err(|e| MetadataError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn author_with_role(&self, role: &str) -> String {
        self.authors
            .iter()
            .find(|a| a.role.as_deref() == Some(role))
            .map(|a| a.name.clone())
            .unwrap_or_default()
    }

    /// Name of the lead IPAC author, or empty.
    pub fn ssdc_lead(&self) -> String {
        self.author_with_role(SSDC_LEAD_ROLE)
    }

    /// Name of the SPHEREx project contact, or empty.
    pub fn spherex_lead(&self) -> String {
        self.author_with_role(SPHEREX_LEAD_ROLE)
    }

    pub fn approval_string(&self) -> Option<String> {
        self.approval
            .as_ref()
            .map(|a| format!("{}, {}", a.date, a.name))
    }

    pub fn series_details(
        &self,
        project: &str,
        series: Series,
    ) -> Result<SeriesDetails, MetadataError> {
        let require = |value: &Option<String>, field: &'static str| {
            value.clone().ok_or_else(|| MetadataError::MissingField {
                project: project.to_string(),
                field,
            })
        };

        Ok(match series {
            Series::Ms => SeriesDetails::Ms {
                project_contact_name: self.spherex_lead(),
                diagram_index: require(&self.diagram_index, "diagram_index")?,
                pipeline_level: normalize_pipeline_level(&require(
                    &self.pipeline_level,
                    "pipeline_level",
                )?),
                difficulty: require(&self.difficulty, "difficulty")?,
            },
            Series::Pm => SeriesDetails::Pm,
            Series::If => SeriesDetails::If {
                interface_partner_name: require(&self.interface_partner, "interface_partner")?,
            },
            Series::Dp => SeriesDetails::Dp,
            Series::Tr => SeriesDetails::Tr {
                va_doors_id: self.va_doors_id.clone(),
                req_doors_id: self.req_doors_id.clone(),
                ipac_jira_id: self.ipac_jira_id.clone(),
            },
            Series::Tn => SeriesDetails::Tn,
            Series::Op => SeriesDetails::Op,
        })
    }
}

//! Typed errors at the per-project ingestion seam.
//!
//! Everything else in the crate propagates `anyhow::Error`; a
//! [`MetadataError`] marks a failure that affects one project only, so the
//! refresh pipeline can log it and move on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata object doesn't exist in the bucket.
    #[error("metadata not found: {key}")]
    NotFound { key: String },

    /// The object exists but could not be parsed.
    #[error("invalid metadata in {key}: {reason}")]
    Invalid { key: String, reason: String },

    /// Parsed, but a field required by the document's series is absent.
    #[error("{project} is missing required field '{field}'")]
    MissingField { project: String, field: &'static str },

    /// Transport or authorization failure while fetching.
    #[error("failed to fetch {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

//! Site-specific extraction rules
//!
//! The orchestrator only talks to the [`Extractor`] trait. [`HtmlExtractor`] is a
//! best-effort implementation for the crowdfunding site's listing and detail markup;
//! other sites plug in their own implementation.

mod html;

pub use html::HtmlExtractor;

use crate::model::{CandidateRef, ProjectFields, ProjectStatus};
use thiserror::Error;

/// Extraction failures for a single page
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("Required element missing: {0}")]
    Missing(String),

    #[error("Malformed value for {field}: '{value}'")]
    Malformed { field: String, value: String },
}

/// Turns raw page bodies into candidates and project fields
pub trait Extractor: Send + Sync {
    /// Extracts project links from a listing page
    fn parse_listing(&self, html: &str) -> Result<Vec<CandidateRef>, ExtractError>;

    /// Determines the project stage shown on a detail page
    fn detect_status(&self, html: &str) -> ProjectStatus;

    /// Extracts project fields from a detail page, branching on `status`
    fn parse_detail(
        &self,
        html: &str,
        candidate: &CandidateRef,
        status: ProjectStatus,
    ) -> Result<ProjectFields, ExtractError>;
}

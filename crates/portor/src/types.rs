//! Core data types for registry listings, tenant records, and errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::SessionHandle;

/// Normalized key/value pairs read from one document section.
pub type Record = BTreeMap<String, String>;

/// One row of a registry search listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    /// Opaque id the registry keys its detail pages by.
    #[serde(rename = "portorId")]
    pub registry_id: String,
    pub excerpt_id: String,
    /// 8-digit business id (MBO).
    #[serde(rename = "id")]
    pub business_id: String,
    pub name: String,
    pub status: String,
}

/// Outcome of a listing query together with the session that produced it.
///
/// The session is carried forward so the detail page of any returned record
/// can be fetched without solving another CAPTCHA.
#[derive(Debug)]
pub struct ListingResult {
    pub records: Vec<SummaryRecord>,
    /// Total result count, already offset by the requested page.
    pub total_results: u64,
    pub session: SessionHandle,
}

impl ListingResult {
    /// Drop the session and keep the plain, cacheable data.
    pub fn into_page(self) -> SearchPage {
        SearchPage {
            data: self.records,
            total_results: self.total_results,
            page_size: crate::client::PAGE_SIZE,
        }
    }
}

/// Search listing as handed to the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub data: Vec<SummaryRecord>,
    pub total_results: u64,
    pub page_size: u32,
}

/// Normalized detail record of one sole proprietorship.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDetail {
    /// Business section fields, merged at the top level.
    #[serde(flatten)]
    pub fields: Record,
    #[serde(rename = "vlasnik", skip_serializing_if = "Option::is_none")]
    pub owner: Option<Record>,
    #[serde(rename = "djelatnosti", skip_serializing_if = "Option::is_none")]
    pub activities: Option<Vec<Record>>,
}

/// Errors surfaced by the registry core.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No session: {0}")]
    NoSession(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Invalid parameter {parameter}: {message}")]
    Validation { parameter: String, message: String },
}

impl RegistryError {
    pub fn validation(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        RegistryError::Validation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Whether a later retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::NoSession(_) | RegistryError::UpstreamUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        RegistryError::UpstreamUnavailable(e.to_string())
    }
}

/// Failure of a single OCR invocation. Never leaves the solver.
#[derive(thiserror::Error, Debug)]
pub enum OcrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR process exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("OCR process timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Convenience result type.
pub type RegistryResult<T> = Result<T, RegistryError>;

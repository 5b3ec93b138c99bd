//! Billing domain errors
//!
//! Every failure a core operation can surface to a caller. Handlers turn these
//! into `ErrorResponse`s through [`BillingError::code`] and [`BillingError::details`].

use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Error reading or parsing CSV: {0}")]
    Parse(String),

    #[error("CSV file is empty")]
    EmptyFile,

    #[error("CSV is missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Invalid row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error(
        "License limit exceeded. Your current limit is {limit} meter IDs. Contact {contact} to increase capacity."
    )]
    LicenseLimitExceeded { limit: i64, contact: String },

    #[error("License check failed: owner not found or inactive")]
    OwnerNotFound,

    #[error(
        "{count} device serial numbers have no reference entry (e.g., {}). Upload or update the reference data first.",
        example_list(.examples, .count)
    )]
    MissingReferenceData { count: usize, examples: Vec<String> },

    #[error("Invalid number or date for device {serial}: {field}")]
    InvalidNumber { serial: String, field: String },

    #[error("PDF generation failed: {0}")]
    Render(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Archive storage failed: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn example_list(examples: &[String], count: &usize) -> String {
    let mut list = examples.join(", ");
    if *count > examples.len() {
        list.push_str("...");
    }
    list
}

impl BillingError {
    /// Stable wire code for the error response
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::EmptyFile => "EMPTY_FILE",
            Self::Schema { .. } => "SCHEMA_ERROR",
            Self::InvalidRow { .. } => "INVALID_ROW",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::LicenseLimitExceeded { .. } => "LICENSE_LIMIT_EXCEEDED",
            Self::OwnerNotFound => "OWNER_NOT_FOUND",
            Self::MissingReferenceData { .. } => "MISSING_REFERENCE_DATA",
            Self::InvalidNumber { .. } => "INVALID_NUMBER",
            Self::Render(_) => "RENDER_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured payload attached to the error response, if any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Schema { missing } => Some(json!({ "missingColumns": missing })),
            Self::LicenseLimitExceeded { limit, contact } => {
                Some(json!({ "limit": limit, "contact": contact }))
            }
            Self::MissingReferenceData { count, examples } => {
                Some(json!({ "count": count, "serials": examples }))
            }
            Self::InvalidRow { row, .. } => Some(json!({ "row": row })),
            Self::InvalidNumber { serial, field } => {
                Some(json!({ "serial": serial, "field": field }))
            }
            _ => None,
        }
    }
}

impl From<csv::Error> for BillingError {
    fn from(e: csv::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<std::io::Error> for BillingError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<zip::result::ZipError> for BillingError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Internal(format!("archive: {}", e))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

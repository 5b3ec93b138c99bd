//! Reference data types (device serial -> customer name)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored reference row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRecord {
    pub id: i64,
    pub owner_id: Uuid,
    pub device_serialno: String,
    pub customer_name: String,
    pub insert_timestamp: DateTime<Utc>,
    pub last_update_timestamp: Option<DateTime<Utc>>,
}

/// Tenant license as read from `owner_info`
#[derive(Debug, Clone, FromRow)]
pub struct OwnerLicense {
    pub owner_id: Uuid,
    pub max_rows_allowed: i64,
    pub is_active: bool,
}

/// Result of a natural-key upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Request for litebill.reference.upload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceUploadRequest {
    pub csv_content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceUploadSummary {
    pub updated: u32,
    pub inserted: u32,
    pub total_after: i64,
    pub limit: i64,
}

/// One requested edit of a reference row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceChange {
    #[serde(default)]
    pub original_serial: String,
    #[serde(default)]
    pub new_serial: String,
    #[serde(default)]
    pub new_customer_name: String,
}

/// Request for litebill.reference.update
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReferenceRequest {
    #[serde(default)]
    pub changes: Vec<ReferenceChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeError {
    MissingFields,
    NotFound,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeResult {
    pub index: usize,
    pub original_serial: String,
    pub new_serial: String,
    pub new_customer_name: String,
    pub success: bool,
    pub error: Option<ChangeError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ChangeResult {
    pub(crate) fn pending(index: usize, change: &ReferenceChange) -> Self {
        Self {
            index,
            original_serial: change.original_serial.clone(),
            new_serial: change.new_serial.clone(),
            new_customer_name: change.new_customer_name.clone(),
            success: false,
            error: None,
            error_message: None,
        }
    }

    pub(crate) fn fail(mut self, error: ChangeError, message: impl Into<String>) -> Self {
        self.error = Some(error);
        self.error_message = Some(message.into());
        self
    }

    pub(crate) fn succeed(mut self) -> Self {
        self.success = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeBatchStatus {
    Success,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReferenceResponse {
    pub status: ChangeBatchStatus,
    pub updated: u32,
    pub change_results: Vec<ChangeResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceListResponse {
    pub items: Vec<ReferenceRecord>,
    pub total: i64,
}

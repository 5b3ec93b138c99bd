//! Invoice rendering and bulk export types

use serde::{Deserialize, Serialize};

use super::billing::BillRecord;

/// Request for litebill.invoice.render
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderInvoiceRequest {
    pub bill: BillRecord,
}

/// Request for litebill.invoice.bulk
///
/// Either `bills` is supplied by the caller, or `month` names a stored month
/// to export.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExportRequest {
    pub job_id: String,
    #[serde(default)]
    pub bills: Vec<BillRecord>,
    #[serde(default)]
    pub month: Option<String>,
}

/// Request for litebill.invoice.bulk.progress and litebill.invoice.bulk.cancel
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobRequest {
    pub job_id: String,
}

/// Progress of one bulk job, as polled by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkProgress {
    pub processed: u32,
    pub total: u32,
    pub done: bool,
}

/// Lifecycle of a bulk job. There is no failed state: the archive is always finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkJobState {
    Pending,
    Running,
    Completed,
    CompletedWithSkips,
}

impl BulkJobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithSkips)
    }
}

/// Reply for litebill.invoice.bulk. The archive itself is streamed into the
/// JetStream object store; clients fetch `objectName` from `bucket`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExportResponse {
    pub bucket: String,
    pub object_name: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub state: BulkJobState,
    pub invoices_written: u32,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBulkResponse {
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_string(&BulkJobState::CompletedWithSkips).unwrap();
        assert_eq!(json, "\"completedWithSkips\"");
        assert!(BulkJobState::Completed.is_terminal());
        assert!(!BulkJobState::Running.is_terminal());
    }

    #[test]
    fn test_bulk_request_accepts_month_only() {
        let request: BulkExportRequest =
            serde_json::from_str(r#"{"jobId":"job-1","month":"2026-03"}"#).unwrap();
        assert!(request.bills.is_empty());
        assert_eq!(request.month.as_deref(), Some("2026-03"));
    }
}

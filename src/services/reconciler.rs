//! Reference data reconciliation
//!
//! Maintains the per-tenant device -> customer table:
//! - batch ingestion with the license row limit checked before any write
//! - upserts keyed by the device serial, never by surrogate id
//! - serial renames with per-change conflict detection and error attribution
//!
//! Storage goes through [`ReferenceWriter`]; callers open a transaction-backed
//! writer and commit it once the call returns `Ok`.

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::services::csv_ingest::{CsvTable, REFERENCE_COLUMNS};
use crate::types::{
    ChangeBatchStatus, ChangeError, ChangeResult, OwnerLicense, ReferenceChange,
    ReferenceUploadSummary, UpdateReferenceResponse, UpsertOutcome,
};

/// Write access to one tenant's reference table, scoped to a single transaction
#[async_trait]
pub trait ReferenceWriter: Send {
    /// Active license for the tenant; locks it for the rest of the transaction
    async fn lock_license(&mut self, tenant_id: Uuid) -> BillingResult<Option<OwnerLicense>>;

    async fn count(&mut self, tenant_id: Uuid) -> BillingResult<i64>;

    async fn upsert(
        &mut self,
        tenant_id: Uuid,
        serial: &str,
        customer_name: &str,
    ) -> BillingResult<UpsertOutcome>;

    /// Returns false when no row has `serial`
    async fn update_name(
        &mut self,
        tenant_id: Uuid,
        serial: &str,
        customer_name: &str,
    ) -> BillingResult<bool>;

    async fn serial_exists(&mut self, tenant_id: Uuid, serial: &str) -> BillingResult<bool>;

    /// Returns false when no row has `old_serial`
    async fn rename(
        &mut self,
        tenant_id: Uuid,
        old_serial: &str,
        new_serial: &str,
        customer_name: &str,
    ) -> BillingResult<bool>;
}

/// Ingest a parsed reference CSV for one tenant.
///
/// The whole batch is rejected with `LicenseLimitExceeded` when the current row
/// count plus the batch size would exceed the tenant's license; nothing is
/// written in that case.
pub async fn ingest_reference_batch<W: ReferenceWriter + ?Sized>(
    writer: &mut W,
    tenant_id: Uuid,
    table: &CsvTable,
    contact: &str,
) -> BillingResult<ReferenceUploadSummary> {
    table.require_columns(REFERENCE_COLUMNS)?;

    let rows = table
        .rows
        .iter()
        .map(|row| {
            let serial = row.value("device.serialNo").trim();
            let name = row.value("Customer Name").trim();
            if serial.is_empty() || name.is_empty() {
                return Err(BillingError::InvalidRow {
                    row: row.number,
                    message: "device.serialNo and Customer Name must not be empty".into(),
                });
            }
            Ok((serial, name))
        })
        .collect::<BillingResult<Vec<_>>>()?;

    let license = writer
        .lock_license(tenant_id)
        .await?
        .ok_or(BillingError::OwnerNotFound)?;

    let current = writer.count(tenant_id).await?;
    let projected = current + rows.len() as i64;
    if projected > license.max_rows_allowed {
        warn!(
            "Reference upload for tenant {} rejected: {} existing + {} rows exceeds limit {}",
            tenant_id,
            current,
            rows.len(),
            license.max_rows_allowed
        );
        return Err(BillingError::LicenseLimitExceeded {
            limit: license.max_rows_allowed,
            contact: contact.to_string(),
        });
    }

    let mut summary = ReferenceUploadSummary {
        updated: 0,
        inserted: 0,
        total_after: 0,
        limit: license.max_rows_allowed,
    };
    for (serial, name) in rows {
        match writer.upsert(tenant_id, serial, name).await? {
            UpsertOutcome::Inserted => summary.inserted += 1,
            UpsertOutcome::Updated => summary.updated += 1,
        }
    }
    summary.total_after = writer.count(tenant_id).await?;

    info!(
        "Reference upload for tenant {}: {} updated, {} inserted ({} / {})",
        tenant_id, summary.updated, summary.inserted, summary.total_after, summary.limit
    );
    Ok(summary)
}

/// Apply a list of edits. Each change is validated and reported on its own;
/// a failed change does not stop the others.
pub async fn apply_reference_changes<W: ReferenceWriter + ?Sized>(
    writer: &mut W,
    tenant_id: Uuid,
    changes: &[ReferenceChange],
) -> BillingResult<UpdateReferenceResponse> {
    if changes.is_empty() {
        return Err(BillingError::InvalidInput("No reference data changes provided".into()));
    }

    let mut updated = 0;
    let mut results = Vec::with_capacity(changes.len());

    for (index, change) in changes.iter().enumerate() {
        let result = apply_change(writer, tenant_id, index, change).await?;
        if result.success {
            updated += 1;
        } else {
            debug!("Reference change {} failed: {:?}", index, result.error);
        }
        results.push(result);
    }

    info!(
        "Reference changes for tenant {}: {} of {} applied",
        tenant_id,
        updated,
        changes.len()
    );

    Ok(UpdateReferenceResponse {
        status: if updated > 0 {
            ChangeBatchStatus::Success
        } else {
            ChangeBatchStatus::Partial
        },
        updated,
        change_results: results,
    })
}

async fn apply_change<W: ReferenceWriter + ?Sized>(
    writer: &mut W,
    tenant_id: Uuid,
    index: usize,
    change: &ReferenceChange,
) -> BillingResult<ChangeResult> {
    let result = ChangeResult::pending(index, change);
    let original = change.original_serial.trim();
    let new_serial = change.new_serial.trim();
    let name = change.new_customer_name.trim();

    if original.is_empty() || new_serial.is_empty() || name.is_empty() {
        return Ok(result.fail(ChangeError::MissingFields, "Missing required fields"));
    }

    if original == new_serial {
        return Ok(if writer.update_name(tenant_id, original, name).await? {
            result.succeed()
        } else {
            result.fail(
                ChangeError::NotFound,
                format!("Meter ID {} not found for updating customer name.", original),
            )
        });
    }

    if writer.serial_exists(tenant_id, new_serial).await? {
        return Ok(result.fail(
            ChangeError::AlreadyExists,
            format!("The New Meter ID ({}) already exists in the reference table.", new_serial),
        ));
    }

    Ok(if writer.rename(tenant_id, original, new_serial, name).await? {
        result.succeed()
    } else {
        result.fail(
            ChangeError::NotFound,
            format!("Old Meter ID {} was not found in the reference table.", original),
        )
    })
}

//! Billing upload pipeline and upsert store
//!
//! One upload is all-or-nothing: the writer wraps a single transaction and the
//! caller commits only when [`ingest_billing_batch`] returns `Ok`. Any failing
//! row rolls back every bill of the batch.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::services::bill_calculator::{self, BillingParams};
use crate::services::csv_ingest::{CsvTable, BILLING_COLUMNS};
use crate::types::{BillFields, BillingUploadSummary, UpsertOutcome};

/// Transaction-scoped access to one tenant's bills
#[async_trait]
pub trait BillWriter: Send {
    /// Device serial -> customer name for the tenant
    async fn reference_lookup(&mut self, tenant_id: Uuid) -> BillingResult<HashMap<String, String>>;

    /// Insert, or overwrite the row with the same (month, serial)
    async fn upsert_bill(&mut self, tenant_id: Uuid, bill: &BillFields) -> BillingResult<UpsertOutcome>;
}

/// Validate, compute and store every bill of a billing CSV
pub async fn ingest_billing_batch<W: BillWriter + ?Sized>(
    writer: &mut W,
    tenant_id: Uuid,
    table: &CsvTable,
    params: &BillingParams,
) -> BillingResult<BillingUploadSummary> {
    table.require_columns(BILLING_COLUMNS)?;

    let reference = writer.reference_lookup(tenant_id).await?;
    let bills = bill_calculator::compute_batch(&table.rows, &reference, params)?;

    let summary = upsert_bills(writer, tenant_id, &bills).await?;
    info!(
        "Billing upload for tenant {} month {}: {} updated, {} inserted",
        tenant_id, params.bill_month, summary.updated, summary.inserted
    );
    Ok(summary)
}

pub async fn upsert_bills<W: BillWriter + ?Sized>(
    writer: &mut W,
    tenant_id: Uuid,
    bills: &[BillFields],
) -> BillingResult<BillingUploadSummary> {
    let mut summary = BillingUploadSummary::default();
    for bill in bills {
        match writer.upsert_bill(tenant_id, bill).await? {
            UpsertOutcome::Inserted => summary.inserted += 1,
            UpsertOutcome::Updated => summary.updated += 1,
        }
    }
    Ok(summary)
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryBillStore;
    use super::*;
    use crate::error::BillingError;
    use crate::services::csv_ingest;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const HEADER: &str = "device.serialNo,values.timestamp,values.volume.main (m3),Customer #,Building #,Apartment #,Bill Duration Start Date,Bill Duration End Date,Net Consumption (m3),Invoice Date\n";

    fn billing_csv(rows: &[(&str, &str)]) -> CsvTable {
        let mut content = HEADER.to_string();
        for (serial, net) in rows {
            content.push_str(&format!(
                "{},31/03/2026 23:00,1000,C1,B1,A1,01/03/2026,31/03/2026,{},02/04/2026\n",
                serial, net
            ));
        }
        csv_ingest::parse(content.as_bytes()).unwrap()
    }

    fn params(tariff: Decimal) -> BillingParams {
        BillingParams::new("2026-03", tariff, dec!(15), &[]).unwrap()
    }

    async fn run(
        store: &mut MemoryBillStore,
        tenant: Uuid,
        table: &CsvTable,
        params: &BillingParams,
    ) -> BillingResult<BillingUploadSummary> {
        store.begin();
        let result = ingest_billing_batch(store, tenant, table, params).await;
        match result {
            Ok(_) => store.commit(),
            Err(_) => store.rollback(),
        }
        result
    }

    #[tokio::test]
    async fn test_upload_inserts_then_overwrites_last_write_wins() {
        let tenant = Uuid::new_v4();
        let mut store = MemoryBillStore::with_reference(tenant, &[("M1", "Acme")]);
        let table = billing_csv(&[("M1", "100")]);

        let first = run(&mut store, tenant, &table, &params(dec!(5))).await.unwrap();
        assert_eq!((first.inserted, first.updated), (1, 0));

        let second = run(&mut store, tenant, &table, &params(dec!(7))).await.unwrap();
        assert_eq!((second.inserted, second.updated), (0, 1));

        assert_eq!(store.committed.len(), 1);
        let bill = store.get(tenant, "2026-03", "M1").unwrap();
        assert_eq!(bill.upload_tariff_sar, dec!(7));
        assert_eq!(bill.total_bill_amount_sar, dec!(805.00));
    }

    #[tokio::test]
    async fn test_missing_reference_writes_nothing() {
        let tenant = Uuid::new_v4();
        let mut store = MemoryBillStore::with_reference(tenant, &[("M1", "Acme")]);
        let table = billing_csv(&[("M1", "10"), ("M3", "10")]);

        let err = run(&mut store, tenant, &table, &params(dec!(5))).await.unwrap_err();
        match err {
            BillingError::MissingReferenceData { examples, .. } => assert_eq!(examples, vec!["M3"]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(store.committed.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back_whole_batch() {
        let tenant = Uuid::new_v4();
        let mut store = MemoryBillStore::with_reference(tenant, &[("M1", "A"), ("M2", "B"), ("M3", "C")]);
        store.fail_on = Some(2);

        let table = billing_csv(&[("M1", "1"), ("M2", "2"), ("M3", "3")]);
        assert!(run(&mut store, tenant, &table, &params(dec!(5))).await.is_err());
        assert!(store.committed.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_number_fails_batch() {
        let tenant = Uuid::new_v4();
        let mut store = MemoryBillStore::with_reference(tenant, &[("M1", "A"), ("M2", "B")]);
        let table = billing_csv(&[("M1", "1"), ("M2", "n/a")]);

        let err = run(&mut store, tenant, &table, &params(dec!(5))).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_NUMBER");
        assert!(store.committed.is_empty());
    }

    #[tokio::test]
    async fn test_reference_is_tenant_scoped() {
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut store = MemoryBillStore::with_reference(other, &[("M1", "Acme")]);
        let err = run(&mut store, tenant, &billing_csv(&[("M1", "1")]), &params(dec!(5)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_REFERENCE_DATA");
    }

    #[tokio::test]
    async fn test_schema_checked_before_lookup() {
        let tenant = Uuid::new_v4();
        let mut store = MemoryBillStore::default();
        let table = csv_ingest::parse(b"device.serialNo,Customer Name\nM1,Acme\n").unwrap();
        let err = run(&mut store, tenant, &table, &params(dec!(5))).await.unwrap_err();
        assert_eq!(err.code(), "SCHEMA_ERROR");
    }
}

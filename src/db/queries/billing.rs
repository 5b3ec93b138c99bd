//! Final billing data queries

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::services::billing_store::BillWriter;
use crate::types::billing::{BillFields, BillRecord};
use crate::types::reference::UpsertOutcome;

const BILL_COLUMNS: &str = r#"
    id, upload_month, device_serialno, customer_name,
    final_reading_timestamp, final_reading_volume_m3,
    customer_hash, building_hash, apartment_hash,
    bill_start_date, bill_end_date, net_consumption_m3, invoice_date_csv,
    upload_tariff_sar, vat_percent, total_bill_amount_sar,
    csv_charge_1_desc, csv_charge_1_rate,
    csv_charge_2_desc, csv_charge_2_rate,
    csv_charge_3_desc, csv_charge_3_rate
"#;

/// [`BillWriter`] over one PostgreSQL transaction
pub struct PgBillWriter {
    tx: Transaction<'static, Postgres>,
}

impl PgBillWriter {
    pub async fn begin(pool: &PgPool) -> BillingResult<Self> {
        Ok(Self { tx: pool.begin().await? })
    }

    pub async fn commit(self) -> BillingResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BillWriter for PgBillWriter {
    async fn reference_lookup(&mut self, tenant_id: Uuid) -> BillingResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT device_serialno, customer_name FROM reference_data WHERE owner_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn upsert_bill(&mut self, tenant_id: Uuid, bill: &BillFields) -> BillingResult<UpsertOutcome> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO final_billing_data (
                owner_id, upload_month, device_serialno, customer_name,
                final_reading_timestamp, final_reading_volume_m3,
                customer_hash, building_hash, apartment_hash,
                bill_start_date, bill_end_date, net_consumption_m3, invoice_date_csv,
                upload_tariff_sar, vat_percent, total_bill_amount_sar,
                csv_charge_1_desc, csv_charge_1_rate,
                csv_charge_2_desc, csv_charge_2_rate,
                csv_charge_3_desc, csv_charge_3_rate
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            ON CONFLICT ON CONSTRAINT final_billing_data_owner_month_serial_key DO UPDATE SET
                customer_name = EXCLUDED.customer_name,
                final_reading_timestamp = EXCLUDED.final_reading_timestamp,
                final_reading_volume_m3 = EXCLUDED.final_reading_volume_m3,
                customer_hash = EXCLUDED.customer_hash,
                building_hash = EXCLUDED.building_hash,
                apartment_hash = EXCLUDED.apartment_hash,
                bill_start_date = EXCLUDED.bill_start_date,
                bill_end_date = EXCLUDED.bill_end_date,
                net_consumption_m3 = EXCLUDED.net_consumption_m3,
                invoice_date_csv = EXCLUDED.invoice_date_csv,
                upload_tariff_sar = EXCLUDED.upload_tariff_sar,
                vat_percent = EXCLUDED.vat_percent,
                total_bill_amount_sar = EXCLUDED.total_bill_amount_sar,
                csv_charge_1_desc = EXCLUDED.csv_charge_1_desc,
                csv_charge_1_rate = EXCLUDED.csv_charge_1_rate,
                csv_charge_2_desc = EXCLUDED.csv_charge_2_desc,
                csv_charge_2_rate = EXCLUDED.csv_charge_2_rate,
                csv_charge_3_desc = EXCLUDED.csv_charge_3_desc,
                csv_charge_3_rate = EXCLUDED.csv_charge_3_rate,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(tenant_id)
        .bind(&bill.upload_month)
        .bind(&bill.device_serialno)
        .bind(&bill.customer_name)
        .bind(bill.final_reading_timestamp)
        .bind(bill.final_reading_volume_m3)
        .bind(&bill.customer_hash)
        .bind(&bill.building_hash)
        .bind(&bill.apartment_hash)
        .bind(bill.bill_start_date)
        .bind(bill.bill_end_date)
        .bind(bill.net_consumption_m3)
        .bind(bill.invoice_date_csv)
        .bind(bill.upload_tariff_sar)
        .bind(bill.vat_percent)
        .bind(bill.total_bill_amount_sar)
        .bind(&bill.csv_charge_1_desc)
        .bind(bill.csv_charge_1_rate)
        .bind(&bill.csv_charge_2_desc)
        .bind(bill.csv_charge_2_rate)
        .bind(&bill.csv_charge_3_desc)
        .bind(bill.csv_charge_3_rate)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(if inserted { UpsertOutcome::Inserted } else { UpsertOutcome::Updated })
    }
}

/// Bills of one month, in upload order
pub async fn get_bills_for_month(
    pool: &PgPool,
    tenant_id: Uuid,
    month: &str,
) -> BillingResult<Vec<BillRecord>> {
    let sql = format!(
        "SELECT {} FROM final_billing_data WHERE owner_id = $1 AND upload_month = $2 ORDER BY id",
        BILL_COLUMNS
    );
    let bills = sqlx::query_as::<_, BillRecord>(&sql)
        .bind(tenant_id)
        .bind(month)
        .fetch_all(pool)
        .await?;

    Ok(bills)
}

/// Months with stored bills, newest first
pub async fn get_available_months(pool: &PgPool, tenant_id: Uuid) -> BillingResult<Vec<String>> {
    let months: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT upload_month
        FROM final_billing_data
        WHERE owner_id = $1
        ORDER BY upload_month DESC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(months)
}

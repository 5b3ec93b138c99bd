//! Reference data queries

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::services::reconciler::ReferenceWriter;
use crate::types::reference::{OwnerLicense, ReferenceRecord, UpsertOutcome};

/// [`ReferenceWriter`] over one PostgreSQL transaction.
///
/// Dropping it without [`PgReferenceWriter::commit`] rolls everything back.
pub struct PgReferenceWriter {
    tx: Transaction<'static, Postgres>,
}

impl PgReferenceWriter {
    pub async fn begin(pool: &PgPool) -> BillingResult<Self> {
        Ok(Self { tx: pool.begin().await? })
    }

    pub async fn commit(self) -> BillingResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ReferenceWriter for PgReferenceWriter {
    async fn lock_license(&mut self, tenant_id: Uuid) -> BillingResult<Option<OwnerLicense>> {
        // Row lock serializes concurrent uploads for the same tenant
        let license = sqlx::query_as::<_, OwnerLicense>(
            r#"
            SELECT id AS owner_id, max_rows_allowed::BIGINT AS max_rows_allowed, is_active
            FROM owner_info
            WHERE id = $1 AND is_active
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(license)
    }

    async fn count(&mut self, tenant_id: Uuid) -> BillingResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reference_data WHERE owner_id = $1")
            .bind(tenant_id)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(count)
    }

    async fn upsert(
        &mut self,
        tenant_id: Uuid,
        serial: &str,
        customer_name: &str,
    ) -> BillingResult<UpsertOutcome> {
        // xmax is 0 only for a freshly inserted tuple
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO reference_data (owner_id, device_serialno, customer_name, insert_timestamp)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT ON CONSTRAINT reference_data_owner_serial_key DO UPDATE SET
                customer_name = EXCLUDED.customer_name,
                last_update_timestamp = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(tenant_id)
        .bind(serial)
        .bind(customer_name)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(if inserted { UpsertOutcome::Inserted } else { UpsertOutcome::Updated })
    }

    async fn update_name(
        &mut self,
        tenant_id: Uuid,
        serial: &str,
        customer_name: &str,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reference_data
            SET customer_name = $3, last_update_timestamp = NOW()
            WHERE owner_id = $1 AND device_serialno = $2
            "#,
        )
        .bind(tenant_id)
        .bind(serial)
        .bind(customer_name)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn serial_exists(&mut self, tenant_id: Uuid, serial: &str) -> BillingResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reference_data WHERE owner_id = $1 AND device_serialno = $2)",
        )
        .bind(tenant_id)
        .bind(serial)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(exists)
    }

    async fn rename(
        &mut self,
        tenant_id: Uuid,
        old_serial: &str,
        new_serial: &str,
        customer_name: &str,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reference_data
            SET device_serialno = $3, customer_name = $4, last_update_timestamp = NOW()
            WHERE owner_id = $1 AND device_serialno = $2
            "#,
        )
        .bind(tenant_id)
        .bind(old_serial)
        .bind(new_serial)
        .bind(customer_name)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// All reference rows of a tenant, by serial
pub async fn list_reference(pool: &PgPool, tenant_id: Uuid) -> BillingResult<Vec<ReferenceRecord>> {
    let rows = sqlx::query_as::<_, ReferenceRecord>(
        r#"
        SELECT id, owner_id, device_serialno, customer_name, insert_timestamp, last_update_timestamp
        FROM reference_data
        WHERE owner_id = $1
        ORDER BY device_serialno
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

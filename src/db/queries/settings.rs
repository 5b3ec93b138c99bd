//! Company settings queries

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::types::settings::CompanySettings;

/// Branding of a tenant, if configured
pub async fn get_company_settings(
    pool: &PgPool,
    tenant_id: Uuid,
) -> BillingResult<Option<CompanySettings>> {
    let settings = sqlx::query_as::<_, CompanySettings>(
        r#"
        SELECT company_name, logo_url, address, city, phone, email, vat_number
        FROM company_settings
        WHERE owner_id = $1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    Ok(settings)
}

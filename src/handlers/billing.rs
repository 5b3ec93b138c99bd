//! Billing upload and query handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use super::{authorize, parse_request, publish_error, publish_success, Access, AppState};
use crate::db::queries;
use crate::db::queries::billing::PgBillWriter;
use crate::error::BillingResult;
use crate::services::bill_calculator::BillingParams;
use crate::services::{billing_store, csv_ingest};
use crate::types::{
    AvailableMonthsResponse, BillListResponse, BillingUploadRequest, BillingUploadSummary,
    BillsForMonthRequest, EmptyPayload,
};

async fn upload(
    state: &AppState,
    tenant_id: Uuid,
    request: &BillingUploadRequest,
) -> BillingResult<BillingUploadSummary> {
    let params = BillingParams::new(
        &request.bill_month,
        request.tariff,
        request.vat_percent,
        &request.extra_charges,
    )?;
    let table = csv_ingest::parse(request.csv_content.as_bytes())?;

    // Dropped without commit on any error, which rolls the batch back
    let mut writer = PgBillWriter::begin(&state.pool).await?;
    let summary = billing_store::ingest_billing_batch(&mut writer, tenant_id, &table, &params).await?;
    writer.commit().await?;
    Ok(summary)
}

/// Handle litebill.billing.upload
pub async fn handle_upload(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received billing.upload message");

        let Some((reply, request)) = parse_request::<BillingUploadRequest>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Write).await? else {
            continue;
        };

        match upload(&state, auth_info.tenant_id, &request.payload).await {
            Ok(summary) => publish_success(&client, reply, request.id, summary).await?,
            Err(e) => publish_error(&client, reply, request.id, &e).await?,
        }
    }

    Ok(())
}

/// Handle litebill.billing.list
pub async fn handle_list(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received billing.list message");

        let Some((reply, request)) = parse_request::<BillsForMonthRequest>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Read).await? else {
            continue;
        };

        let month = request.payload.month.trim();
        match queries::billing::get_bills_for_month(&state.pool, auth_info.tenant_id, month).await {
            Ok(items) => {
                let response = BillListResponse { total: items.len() as i64, items };
                publish_success(&client, reply, request.id, response).await?;
            }
            Err(e) => publish_error(&client, reply, request.id, &e).await?,
        }
    }

    Ok(())
}

/// Handle litebill.billing.months
pub async fn handle_months(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received billing.months message");

        let Some((reply, request)) = parse_request::<EmptyPayload>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Read).await? else {
            continue;
        };

        match queries::billing::get_available_months(&state.pool, auth_info.tenant_id).await {
            Ok(months) => {
                let response = AvailableMonthsResponse { months };
                publish_success(&client, reply, request.id, response).await?;
            }
            Err(e) => publish_error(&client, reply, request.id, &e).await?,
        }
    }

    Ok(())
}

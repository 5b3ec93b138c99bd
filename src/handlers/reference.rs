//! Reference data handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use super::{authorize, parse_request, publish_error, publish_success, Access, AppState};
use crate::db::queries;
use crate::db::queries::reference::PgReferenceWriter;
use crate::error::BillingResult;
use crate::services::{csv_ingest, reconciler};
use crate::types::{
    EmptyPayload, ReferenceListResponse, ReferenceUploadRequest, ReferenceUploadSummary,
    UpdateReferenceRequest, UpdateReferenceResponse,
};

async fn upload(
    state: &AppState,
    tenant_id: Uuid,
    request: &ReferenceUploadRequest,
) -> BillingResult<ReferenceUploadSummary> {
    let table = csv_ingest::parse(request.csv_content.as_bytes())?;

    let mut writer = PgReferenceWriter::begin(&state.pool).await?;
    let summary =
        reconciler::ingest_reference_batch(&mut writer, tenant_id, &table, &state.contact_email).await?;
    writer.commit().await?;
    Ok(summary)
}

async fn update(
    state: &AppState,
    tenant_id: Uuid,
    request: &UpdateReferenceRequest,
) -> BillingResult<UpdateReferenceResponse> {
    let mut writer = PgReferenceWriter::begin(&state.pool).await?;
    let response = reconciler::apply_reference_changes(&mut writer, tenant_id, &request.changes).await?;
    writer.commit().await?;
    Ok(response)
}

/// Handle litebill.reference.upload
pub async fn handle_upload(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received reference.upload message");

        let Some((reply, request)) = parse_request::<ReferenceUploadRequest>(&client, &msg).await? else {
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

/// Handle litebill.reference.list
pub async fn handle_list(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received reference.list message");

        let Some((reply, request)) = parse_request::<EmptyPayload>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Read).await? else {
            continue;
        };

        match queries::reference::list_reference(&state.pool, auth_info.tenant_id).await {
            Ok(items) => {
                let response = ReferenceListResponse { total: items.len() as i64, items };
                publish_success(&client, reply, request.id, response).await?;
            }
            Err(e) => publish_error(&client, reply, request.id, &e).await?,
        }
    }

    Ok(())
}

/// Handle litebill.reference.update
pub async fn handle_update(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received reference.update message");

        let Some((reply, request)) = parse_request::<UpdateReferenceRequest>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Write).await? else {
            continue;
        };

        match update(&state, auth_info.tenant_id, &request.payload).await {
            Ok(response) => publish_success(&client, reply, request.id, response).await?,
            Err(e) => publish_error(&client, reply, request.id, &e).await?,
        }
    }

    Ok(())
}

//! Invoice rendering and bulk export handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{authorize, parse_request, publish, publish_error, publish_success, Access, AppState};
use crate::auth::AuthInfo;
use crate::db::queries;
use crate::error::{BillingError, BillingResult};
use crate::services::archive_store::archive_object_name;
use crate::services::branding::Branding;
use crate::services::bulk_export::{
    archive_filename, BulkExportOutcome, BulkExporter, BulkJob, StoredArchive,
};
use crate::services::cancellation::{CancelError, CancellationRegistry, JobGuard, JobOwner};
use crate::types::{
    BillFields, BillRecord, BulkExportRequest, BulkExportResponse, BulkJobRequest, BulkProgress,
    CancelBulkResponse, ErrorResponse, FileResponse, RenderInvoiceRequest,
};

const PDF_CONTENT_TYPE: &str = "application/pdf";
const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Job ids are chosen by callers, so they are namespaced by tenant
fn job_key(tenant_id: Uuid, job_id: &str) -> String {
    format!("{}:{}", tenant_id, job_id)
}

fn owner_of(auth_info: &AuthInfo) -> JobOwner {
    JobOwner {
        tenant_id: auth_info.tenant_id,
        user_id: auth_info.user_id,
    }
}

/// Where a bulk request's bills come from
#[derive(Debug, PartialEq)]
enum BulkSource {
    /// Bills sent with the request; `month` names the archive
    Supplied { month: String, bills: Vec<BillFields> },
    /// Every stored bill of a month
    StoredMonth(String),
}

/// Check a bulk request and return its trimmed job id and bill source
fn plan_bulk(request: BulkExportRequest) -> BillingResult<(String, BulkSource)> {
    let job_id = request.job_id.trim().to_string();
    if job_id.is_empty() {
        return Err(BillingError::InvalidInput("jobId is required".into()));
    }

    let month = request
        .month
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    if !request.bills.is_empty() {
        let bills: Vec<BillFields> = request.bills.into_iter().map(|record| record.fields).collect();
        let month = month
            .or_else(|| bills.first().map(|b| b.upload_month.clone()))
            .unwrap_or_default();
        return Ok((job_id, BulkSource::Supplied { month, bills }));
    }

    match month {
        Some(month) => Ok((job_id, BulkSource::StoredMonth(month))),
        None => Err(BillingError::InvalidInput("Either bills or month must be provided".into())),
    }
}

fn stored_month_bills(month: &str, stored: Vec<BillRecord>) -> BillingResult<Vec<BillFields>> {
    if stored.is_empty() {
        return Err(BillingError::NotFound(format!("Bills for {}", month)));
    }
    Ok(stored.into_iter().map(|record| record.fields).collect())
}

/// Claim `key` for a new job; a job with the same key must not be running
fn claim_job(
    jobs: &CancellationRegistry,
    key: &str,
    job_id: &str,
    owner: JobOwner,
) -> BillingResult<JobGuard> {
    jobs.register(key, owner)
        .ok_or_else(|| BillingError::InvalidInput(format!("Bulk job {} is already running", job_id)))
}

fn bulk_response(stored: StoredArchive, outcome: BulkExportOutcome) -> BulkExportResponse {
    BulkExportResponse {
        bucket: stored.bucket,
        object_name: stored.object_name,
        filename: outcome.filename,
        content_type: ZIP_CONTENT_TYPE.to_string(),
        size_bytes: stored.size_bytes,
        state: outcome.state,
        invoices_written: outcome.written,
        skipped: outcome.skipped,
    }
}

/// Unknown or expired jobs are `NOT_FOUND`, with zero progress in `details`
fn progress_reply(
    request_id: Uuid,
    job_id: &str,
    progress: Option<BulkProgress>,
) -> Result<BulkProgress, ErrorResponse> {
    progress.ok_or_else(|| {
        let mut error = ErrorResponse::new(
            request_id,
            "NOT_FOUND",
            format!("Bulk job {} not found or expired", job_id),
        );
        error.error.details = serde_json::to_value(BulkProgress::default()).ok();
        error
    })
}

fn cancel_reply(
    request_id: Uuid,
    result: Result<bool, CancelError>,
) -> Result<CancelBulkResponse, ErrorResponse> {
    match result {
        Ok(cancelled) => Ok(CancelBulkResponse { cancelled }),
        Err(CancelError::NotOwner) => Err(ErrorResponse::new(
            request_id,
            "FORBIDDEN",
            "Only the user who started a job can cancel it",
        )),
    }
}

async fn load_branding(state: &AppState, tenant_id: Uuid) -> BillingResult<Branding> {
    let settings = queries::settings::get_company_settings(&state.pool, tenant_id).await?;
    let public_dir = state.public_dir.clone();
    tokio::task::spawn_blocking(move || Branding::from_settings(settings, &public_dir))
        .await
        .map_err(|e| BillingError::Internal(format!("logo lookup failed: {}", e)))
}

async fn render(state: &AppState, tenant_id: Uuid, bill: &BillFields) -> BillingResult<FileResponse> {
    let branding = load_branding(state, tenant_id).await?;
    let pdf = state
        .renderer
        .render_single(state.launcher.as_ref(), bill, &branding)
        .await?;
    Ok(FileResponse::new(bill.invoice_filename(), PDF_CONTENT_TYPE, &pdf))
}

async fn bulk_export(
    state: &AppState,
    auth_info: &AuthInfo,
    request: BulkExportRequest,
) -> BillingResult<BulkExportResponse> {
    let (job_id, source) = plan_bulk(request)?;
    let (month, bills) = match source {
        BulkSource::Supplied { month, bills } => (month, bills),
        BulkSource::StoredMonth(month) => {
            let stored =
                queries::billing::get_bills_for_month(&state.pool, auth_info.tenant_id, &month).await?;
            let bills = stored_month_bills(&month, stored)?;
            (month, bills)
        }
    };

    let key = job_key(auth_info.tenant_id, &job_id);
    let guard = claim_job(&state.jobs, &key, &job_id, owner_of(auth_info))?;

    let branding = load_branding(state, auth_info.tenant_id).await?;
    let exporter = BulkExporter {
        renderer: &state.renderer,
        launcher: state.launcher.as_ref(),
        progress: state.progress.as_ref(),
        options: state.bulk_options.clone(),
    };
    let job = BulkJob {
        job_id: &key,
        month: &month,
        bills: &bills,
        company: &branding,
    };
    let object_name = archive_object_name(auth_info.tenant_id, &job_id, &archive_filename(&month));

    let (stored, outcome) = exporter
        .export_to(state.archives.as_ref(), &object_name, job, &guard.token())
        .await?;
    drop(guard);

    Ok(bulk_response(stored, outcome))
}

/// Handle litebill.invoice.render
pub async fn handle_render(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received invoice.render message");

        let Some((reply, request)) = parse_request::<RenderInvoiceRequest>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Read).await? else {
            continue;
        };

        match render(&state, auth_info.tenant_id, &request.payload.bill.fields).await {
            Ok(file) => publish_success(&client, reply, request.id, file).await?,
            Err(e) => publish_error(&client, reply, request.id, &e).await?,
        }
    }

    Ok(())
}

/// Handle litebill.invoice.bulk. Each job runs in its own task.
pub async fn handle_bulk(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received invoice.bulk message");

        let Some((reply, request)) = parse_request::<BulkExportRequest>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Read).await? else {
            continue;
        };

        let client = client.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let request_id = request.id;
            info!("Bulk job {} requested by {}", request.payload.job_id, auth_info.user_id);
            let result = match bulk_export(&state, &auth_info, request.payload).await {
                Ok(response) => publish_success(&client, reply, request_id, response).await,
                Err(e) => publish_error(&client, reply, request_id, &e).await,
            };
            if let Err(e) = result {
                error!("Failed to reply to bulk request {}: {}", request_id, e);
            }
        });
    }

    Ok(())
}

/// Handle litebill.invoice.bulk.progress
pub async fn handle_progress(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some((reply, request)) = parse_request::<BulkJobRequest>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Read).await? else {
            continue;
        };

        let job_id = request.payload.job_id.trim();
        let progress = state.progress.get(&job_key(auth_info.tenant_id, job_id)).await;
        match progress_reply(request.id, job_id, progress) {
            Ok(progress) => publish_success(&client, reply, request.id, progress).await?,
            Err(error) => publish(&client, reply, &error).await?,
        }
    }

    Ok(())
}

/// Handle litebill.invoice.bulk.cancel
pub async fn handle_cancel(client: Client, mut subscriber: Subscriber, state: Arc<AppState>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received invoice.bulk.cancel message");

        let Some((reply, request)) = parse_request::<BulkJobRequest>(&client, &msg).await? else {
            continue;
        };
        let Some(auth_info) = authorize(&client, &reply, &request, &state.jwt_secret, Access::Read).await? else {
            continue;
        };

        let key = job_key(auth_info.tenant_id, request.payload.job_id.trim());
        match cancel_reply(request.id, state.jobs.cancel(&key, owner_of(&auth_info))) {
            Ok(response) => {
                if response.cancelled {
                    info!("Bulk job {} cancelled by {}", request.payload.job_id, auth_info.user_id);
                }
                publish_success(&client, reply, request.id, response).await?;
            }
            Err(error) => publish(&client, reply, &error).await?,
        }
    }

    Ok(())
}

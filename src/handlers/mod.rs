//! NATS message handlers

pub mod billing;
pub mod invoice;
pub mod ping;
pub mod reference;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Message, Subject};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{self, AuthInfo};
use crate::config::Config;
use crate::error::BillingError;
use crate::services::archive_store::ArchiveStore;
use crate::services::bulk_export::BulkExportOptions;
use crate::services::cancellation::CancellationRegistry;
use crate::services::invoice_renderer::InvoiceRenderer;
use crate::services::progress::{InMemoryProgressStore, ProgressStore};
use crate::services::render_engine::{ChromiumLauncher, EngineLauncher};
use crate::types::{ErrorResponse, Request, SuccessResponse};

/// Everything a handler needs, shared across all subscriptions
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: String,
    pub contact_email: String,
    pub public_dir: PathBuf,
    pub renderer: InvoiceRenderer,
    pub launcher: Arc<dyn EngineLauncher>,
    pub progress: Arc<dyn ProgressStore>,
    pub archives: Arc<dyn ArchiveStore>,
    pub jobs: CancellationRegistry,
    pub bulk_options: BulkExportOptions,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config, archives: Arc<dyn ArchiveStore>) -> Result<Self> {
        Ok(Self {
            pool,
            jwt_secret: config.jwt_secret.clone(),
            contact_email: config.contact_email.clone(),
            public_dir: config.public_dir.clone(),
            renderer: InvoiceRenderer::new()?.with_timeout(config.render_timeout),
            launcher: Arc::new(ChromiumLauncher::new(config.chrome_executable.clone())),
            progress: Arc::new(InMemoryProgressStore::new()),
            archives,
            jobs: CancellationRegistry::new(),
            bulk_options: BulkExportOptions {
                concurrency: config.bulk_pdf_concurrency,
                compression_level: config.zip_compression_level,
                ..Default::default()
            },
        })
    }
}

/// What a subject requires of the caller's role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Serialize and send a reply
pub(crate) async fn publish<T: Serialize>(client: &Client, reply: Subject, body: &T) -> Result<()> {
    if let Err(e) = client.publish(reply, serde_json::to_vec(body)?.into()).await {
        error!("Failed to publish reply: {}", e);
    }
    Ok(())
}

/// Send a success reply. When it cannot be delivered (for example it exceeds
/// the server's max payload) the caller gets a small `REPLY_FAILED` error instead.
pub(crate) async fn publish_success<T: Serialize>(
    client: &Client,
    reply: Subject,
    request_id: Uuid,
    payload: T,
) -> Result<()> {
    let body = serde_json::to_vec(&SuccessResponse::new(request_id, payload))?;
    if let Err(e) = client.publish(reply.clone(), body.into()).await {
        error!("Failed to publish reply to request {}: {}", request_id, e);
        let error = ErrorResponse::new(
            request_id,
            "REPLY_FAILED",
            format!("Reply could not be delivered: {}", e),
        );
        publish(client, reply, &error).await?;
    }
    Ok(())
}

/// Reply with a domain error, logging infrastructure failures
pub(crate) async fn publish_error(
    client: &Client,
    reply: Subject,
    request_id: Uuid,
    err: &BillingError,
) -> Result<()> {
    match err {
        BillingError::Database(_) | BillingError::Internal(_) | BillingError::Storage(_) => {
            error!("{}", err)
        }
        _ => warn!("Request {} rejected: {}", request_id, err),
    }
    publish(client, reply, &ErrorResponse::from_billing(request_id, err)).await
}

/// Reply subject and parsed request, or `None` after answering `INVALID_REQUEST`
pub(crate) async fn parse_request<T: DeserializeOwned>(
    client: &Client,
    msg: &Message,
) -> Result<Option<(Subject, Request<T>)>> {
    let reply = match msg.reply {
        Some(ref reply) => reply.clone(),
        None => {
            warn!("Message on {} without reply subject", msg.subject);
            return Ok(None);
        }
    };

    match serde_json::from_slice::<Request<T>>(&msg.payload) {
        Ok(request) => Ok(Some((reply, request))),
        Err(e) => {
            error!("Failed to parse {} request: {}", msg.subject, e);
            let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
            publish(client, reply, &error).await?;
            Ok(None)
        }
    }
}

/// Caller identity, or `None` after answering `UNAUTHORIZED` / `FORBIDDEN`
pub(crate) async fn authorize<T>(
    client: &Client,
    reply: &Subject,
    request: &Request<T>,
    jwt_secret: &str,
    access: Access,
) -> Result<Option<AuthInfo>> {
    let auth_info = match auth::extract_auth(request, jwt_secret) {
        Ok(info) => info,
        Err(_) => {
            let error = ErrorResponse::new(request.id, "UNAUTHORIZED", "Authentication required");
            publish(client, reply.clone(), &error).await?;
            return Ok(None);
        }
    };

    let allowed = match access {
        Access::Read => auth_info.can_read(),
        Access::Write => auth_info.can_write(),
    };
    if !allowed {
        let error = ErrorResponse::new(
            request.id,
            "FORBIDDEN",
            format!("Role '{}' may not perform this operation", auth_info.role),
        );
        publish(client, reply.clone(), &error).await?;
        return Ok(None);
    }

    Ok(Some(auth_info))
}

/// Start all message handlers
pub async fn start_handlers(client: Client, state: Arc<AppState>) -> Result<()> {
    info!("Starting message handlers...");
    info!("Render engine: {}", state.launcher.name());

    // Subscribe to all subjects
    let ping_sub = client.subscribe("litebill.ping").await?;
    let reference_upload_sub = client.subscribe("litebill.reference.upload").await?;
    let reference_list_sub = client.subscribe("litebill.reference.list").await?;
    let reference_update_sub = client.subscribe("litebill.reference.update").await?;
    let billing_upload_sub = client.subscribe("litebill.billing.upload").await?;
    let billing_list_sub = client.subscribe("litebill.billing.list").await?;
    let billing_months_sub = client.subscribe("litebill.billing.months").await?;
    let invoice_render_sub = client.subscribe("litebill.invoice.render").await?;
    let invoice_bulk_sub = client.subscribe("litebill.invoice.bulk").await?;
    let invoice_progress_sub = client.subscribe("litebill.invoice.bulk.progress").await?;
    let invoice_cancel_sub = client.subscribe("litebill.invoice.bulk.cancel").await?;

    info!("Subscribed to NATS subjects");

    let client_ping = client.clone();
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub).await
    });

    let client_ref_upload = client.clone();
    let state_ref_upload = Arc::clone(&state);
    let reference_upload_handle = tokio::spawn(async move {
        reference::handle_upload(client_ref_upload, reference_upload_sub, state_ref_upload).await
    });

    let client_ref_list = client.clone();
    let state_ref_list = Arc::clone(&state);
    let reference_list_handle = tokio::spawn(async move {
        reference::handle_list(client_ref_list, reference_list_sub, state_ref_list).await
    });

    let client_ref_update = client.clone();
    let state_ref_update = Arc::clone(&state);
    let reference_update_handle = tokio::spawn(async move {
        reference::handle_update(client_ref_update, reference_update_sub, state_ref_update).await
    });

    let client_bill_upload = client.clone();
    let state_bill_upload = Arc::clone(&state);
    let billing_upload_handle = tokio::spawn(async move {
        billing::handle_upload(client_bill_upload, billing_upload_sub, state_bill_upload).await
    });

    let client_bill_list = client.clone();
    let state_bill_list = Arc::clone(&state);
    let billing_list_handle = tokio::spawn(async move {
        billing::handle_list(client_bill_list, billing_list_sub, state_bill_list).await
    });

    let client_bill_months = client.clone();
    let state_bill_months = Arc::clone(&state);
    let billing_months_handle = tokio::spawn(async move {
        billing::handle_months(client_bill_months, billing_months_sub, state_bill_months).await
    });

    let client_render = client.clone();
    let state_render = Arc::clone(&state);
    let invoice_render_handle = tokio::spawn(async move {
        invoice::handle_render(client_render, invoice_render_sub, state_render).await
    });

    let client_bulk = client.clone();
    let state_bulk = Arc::clone(&state);
    let invoice_bulk_handle = tokio::spawn(async move {
        invoice::handle_bulk(client_bulk, invoice_bulk_sub, state_bulk).await
    });

    let client_progress = client.clone();
    let state_progress = Arc::clone(&state);
    let invoice_progress_handle = tokio::spawn(async move {
        invoice::handle_progress(client_progress, invoice_progress_sub, state_progress).await
    });

    let client_cancel = client.clone();
    let state_cancel = Arc::clone(&state);
    let invoice_cancel_handle = tokio::spawn(async move {
        invoice::handle_cancel(client_cancel, invoice_cancel_sub, state_cancel).await
    });

    info!("All handlers started");

    // Any handler exiting means its subscription is gone
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = reference_upload_handle => {
            error!("Reference upload handler finished: {:?}", result);
        }
        result = reference_list_handle => {
            error!("Reference list handler finished: {:?}", result);
        }
        result = reference_update_handle => {
            error!("Reference update handler finished: {:?}", result);
        }
        result = billing_upload_handle => {
            error!("Billing upload handler finished: {:?}", result);
        }
        result = billing_list_handle => {
            error!("Billing list handler finished: {:?}", result);
        }
        result = billing_months_handle => {
            error!("Billing months handler finished: {:?}", result);
        }
        result = invoice_render_handle => {
            error!("Invoice render handler finished: {:?}", result);
        }
        result = invoice_bulk_handle => {
            error!("Bulk export handler finished: {:?}", result);
        }
        result = invoice_progress_handle => {
            error!("Bulk progress handler finished: {:?}", result);
        }
        result = invoice_cancel_handle => {
            error!("Bulk cancel handler finished: {:?}", result);
        }
    }

    Ok(())
}

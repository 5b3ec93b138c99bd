//! Bulk invoice export
//!
//! Renders many invoices against one shared engine with bounded concurrency and
//! writes them into a ZIP archive in completion order. Individual failures
//! become entries in a skip report; the archive is always finalized.
//!
//! The archive is spooled to an anonymous temp file and then streamed to an
//! [`ArchiveStore`], so memory use does not grow with the job.

use std::io::{Seek, Write};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::defaults::{default_bulk_concurrency, PROGRESS_RETENTION};
use crate::error::BillingResult;
use crate::services::archive_store::ArchiveStore;
use crate::services::branding::Branding;
use crate::services::invoice_renderer::InvoiceRenderer;
use crate::services::progress::ProgressStore;
use crate::services::render_engine::EngineLauncher;
use crate::services::render_pool::RenderPool;
use crate::types::{file_component, BillFields, BulkJobState};

const SKIP_REPORT_HEADER: &str = "The following invoices were skipped during PDF generation:";

#[derive(Debug, Clone)]
pub struct BulkExportOptions {
    /// Render contexts open at once
    pub concurrency: usize,
    /// 0 stores entries uncompressed, 1-9 deflates
    pub compression_level: u32,
    /// How long progress stays pollable after the job ends
    pub retention: Duration,
}

impl Default for BulkExportOptions {
    fn default() -> Self {
        Self {
            concurrency: default_bulk_concurrency(),
            compression_level: 0,
            retention: PROGRESS_RETENTION,
        }
    }
}

impl BulkExportOptions {
    fn entry_options(&self) -> SimpleFileOptions {
        match self.compression_level {
            0 => SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
            level => SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(level.min(9) as i64)),
        }
    }
}

/// One bulk job's input
pub struct BulkJob<'a> {
    pub job_id: &'a str,
    pub month: &'a str,
    pub bills: &'a [BillFields],
    pub company: &'a Branding,
}

#[derive(Debug, Clone)]
pub struct BulkExportOutcome {
    pub filename: String,
    pub state: BulkJobState,
    pub written: u32,
    pub skipped: Vec<String>,
}

/// Where a finished archive was stored
#[derive(Debug, Clone)]
pub struct StoredArchive {
    pub bucket: String,
    pub object_name: String,
    pub size_bytes: u64,
}

pub fn archive_filename(month: &str) -> String {
    format!("Invoice_Bulk_{}.zip", file_component(month))
}

pub fn skip_report_filename(month: &str) -> String {
    format!("SKIPPED_INVOICES_{}.txt", file_component(month))
}

pub struct BulkExporter<'a> {
    pub renderer: &'a InvoiceRenderer,
    pub launcher: &'a dyn EngineLauncher,
    pub progress: &'a dyn ProgressStore,
    pub options: BulkExportOptions,
}

impl BulkExporter<'_> {
    /// Run a job, spooling the archive to disk, then stream it into `archives`
    /// as `object_name`.
    pub async fn export_to(
        &self,
        archives: &dyn ArchiveStore,
        object_name: &str,
        job: BulkJob<'_>,
        cancel: &CancellationToken,
    ) -> BillingResult<(StoredArchive, BulkExportOutcome)> {
        let spool = tempfile::tempfile()?;
        let (mut spool, outcome) = self.run(spool, job, cancel).await?;
        spool.rewind()?;

        let size_bytes = archives
            .put_file(object_name, tokio::fs::File::from_std(spool))
            .await?;
        info!("Archive {} stored in {} ({} bytes)", object_name, archives.bucket(), size_bytes);

        let stored = StoredArchive {
            bucket: archives.bucket().to_string(),
            object_name: object_name.to_string(),
            size_bytes,
        };
        Ok((stored, outcome))
    }

    /// Run a job to completion, writing the archive into `sink`.
    ///
    /// Only a failure to finalize the archive itself is returned as an error.
    pub async fn run<W: Write + Seek + Send>(
        &self,
        sink: W,
        job: BulkJob<'_>,
        cancel: &CancellationToken,
    ) -> BillingResult<(W, BulkExportOutcome)> {
        let started = Instant::now();
        let total = job.bills.len() as u32;
        let BulkJob { job_id, month, bills, company } = job;
        let mut state = BulkJobState::Pending;
        self.progress.create(job_id, total).await;
        debug!("Bulk job {} {:?}", job_id, state);

        let mut zip = ZipWriter::new(sink);
        let entry_options = self.options.entry_options();
        let mut written = 0u32;
        let mut skipped = Vec::new();

        match self.launcher.launch().await {
            Ok(engine) => {
                state = BulkJobState::Running;
                debug!(
                    "Bulk job {} {:?}: {} invoices on {} with {} contexts",
                    job_id,
                    state,
                    total,
                    self.launcher.name(),
                    self.options.concurrency.max(1)
                );
                let pool = RenderPool::new(engine, self.options.concurrency);

                let renders: Vec<_> = bills
                    .iter()
                    .map(|bill| self.render_entry(&pool, bill, company, job_id, cancel))
                    .collect();
                let mut renders = stream::iter(renders).buffer_unordered(pool.size());

                while let Some((filename, result)) = renders.next().await {
                    let appended = result.and_then(|pdf| {
                        zip.start_file(filename.as_str(), entry_options)
                            .and_then(|_| zip.write_all(&pdf).map_err(Into::into))
                            .map_err(|e| format!("archive error: {}", e))
                    });
                    match appended {
                        Ok(()) => written += 1,
                        Err(reason) => skipped.push(format!("{} - {}", filename, reason)),
                    }
                }
                drop(renders);

                pool.shutdown().await;
            }
            Err(e) => {
                warn!("Bulk job {} could not start a render engine: {}", job_id, e);
                skipped.push(format!("Bulk generation failed: {}", e));
            }
        }

        if !skipped.is_empty() {
            let report = zip
                .start_file(skip_report_filename(month), entry_options)
                .map_err(std::io::Error::from)
                .and_then(|_| write_skip_report(&mut zip, &skipped));
            if let Err(e) = report {
                warn!("Bulk job {} could not write skip report: {}", job_id, e);
            }
        }

        let finished = zip.finish();
        self.progress.mark_done(job_id).await;
        self.progress.expire(job_id, self.options.retention).await;
        let sink = finished?;

        state = if skipped.is_empty() {
            BulkJobState::Completed
        } else {
            BulkJobState::CompletedWithSkips
        };
        info!(
            "Bulk job {} {:?}: {} written, {} skipped in {:?}",
            job_id,
            state,
            written,
            skipped.len(),
            started.elapsed()
        );

        Ok((
            sink,
            BulkExportOutcome {
                filename: archive_filename(month),
                state,
                written,
                skipped,
            },
        ))
    }

    /// Render one invoice for the archive; progress moves on either way
    async fn render_entry(
        &self,
        pool: &RenderPool,
        bill: &BillFields,
        company: &Branding,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> (String, Result<Vec<u8>, String>) {
        let filename = bill.invoice_filename();
        let result = if cancel.is_cancelled() {
            Err("cancelled".to_string())
        } else {
            self.renderer
                .render_pdf(pool, bill, company)
                .await
                .map_err(|e| format!("generation error: {}", e))
        };
        self.progress.increment(job_id).await;
        (filename, result)
    }
}

fn write_skip_report<W: Write>(out: &mut W, skipped: &[String]) -> std::io::Result<()> {
    writeln!(out, "{}", SKIP_REPORT_HEADER)?;
    writeln!(out)?;
    for reason in skipped {
        writeln!(out, "{}", reason)?;
    }
    Ok(())
}

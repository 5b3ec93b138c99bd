//! Invoice document rendering
//!
//! A bill is turned into a display model, rendered through the embedded
//! handlebars template and printed to PDF by a pooled render context.

use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate};
use handlebars::Handlebars;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::defaults::{INVOICE_DUE_DAYS, RENDER_TIMEOUT};
use crate::error::{BillingError, BillingResult};
use crate::services::bill_calculator::{compute_breakdown, round_money, vat_of};
use crate::services::branding::Branding;
use crate::services::render_engine::EngineLauncher;
use crate::services::render_pool::RenderPool;
use crate::types::BillFields;

const INVOICE_TEMPLATE: &str = include_str!("../../templates/invoice.hbs");
const TEMPLATE_NAME: &str = "invoice";

#[derive(Debug, Clone, Serialize)]
pub struct SummaryLine {
    pub description: String,
    pub before_vat: String,
    pub vat: String,
    pub after_vat: String,
}

/// Everything the template prints, preformatted
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView<'a> {
    pub company: &'a Branding,
    pub serial: &'a str,
    pub customer_name: &'a str,
    pub customer_hash: &'a str,
    pub building_hash: &'a str,
    pub apartment_hash: &'a str,
    pub month: &'a str,
    pub invoice_date: String,
    pub due_date: String,
    pub bill_start: String,
    pub bill_end: String,
    pub reading_time: String,
    pub reading_volume: String,
    pub consumption_m3: String,
    pub tariff: String,
    pub vat_rate: String,
    pub lines: Vec<SummaryLine>,
    pub total_before_vat: String,
    pub total_vat: String,
    pub total_after_vat: String,
}

fn money(value: Decimal) -> String {
    format!("{:.2}", round_money(value))
}

fn display_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d/%m/%Y").to_string()).unwrap_or_default()
}

/// Build the display model. Line items are recomputed from the bill's stored
/// inputs with the same arithmetic as ingestion; the grand total is the stored one.
pub fn build_view<'a>(bill: &'a BillFields, company: &'a Branding) -> InvoiceView<'a> {
    let charges = bill.extra_charges();
    let breakdown = compute_breakdown(
        bill.net_consumption_m3,
        bill.upload_tariff_sar,
        bill.vat_percent,
        &charges,
    );

    let line = |description: &str, amount: Decimal| {
        let vat = vat_of(amount, bill.vat_percent);
        SummaryLine {
            description: description.to_string(),
            before_vat: money(amount),
            vat: money(vat),
            after_vat: money(amount + vat),
        }
    };

    let mut lines = vec![line("Water Consumption Value", breakdown.consumption_charge)];
    lines.extend(charges.iter().map(|c| line(&c.description, c.rate)));

    let due_date = bill
        .invoice_date_csv
        .map(|d| display_date(Some(d + Duration::days(INVOICE_DUE_DAYS))))
        .unwrap_or_else(|| "-".to_string());

    InvoiceView {
        company,
        serial: &bill.device_serialno,
        customer_name: &bill.customer_name,
        customer_hash: &bill.customer_hash,
        building_hash: &bill.building_hash,
        apartment_hash: &bill.apartment_hash,
        month: &bill.upload_month,
        invoice_date: display_date(bill.invoice_date_csv),
        due_date,
        bill_start: display_date(Some(bill.bill_start_date)),
        bill_end: display_date(bill.bill_end_date),
        reading_time: bill.final_reading_timestamp.format("%d/%m/%Y %H:%M").to_string(),
        reading_volume: bill
            .final_reading_volume_m3
            .map(money)
            .unwrap_or_default(),
        consumption_m3: money(bill.net_consumption_m3),
        tariff: format!("{:.4}", bill.upload_tariff_sar),
        vat_rate: bill.vat_percent.normalize().to_string(),
        lines,
        total_before_vat: money(breakdown.subtotal),
        total_vat: money(breakdown.vat_amount),
        total_after_vat: money(bill.total_bill_amount_sar),
    }
}

pub struct InvoiceRenderer {
    templates: Handlebars<'static>,
    timeout: StdDuration,
}

impl InvoiceRenderer {
    pub fn new() -> BillingResult<Self> {
        let mut templates = Handlebars::new();
        templates
            .register_template_string(TEMPLATE_NAME, INVOICE_TEMPLATE)
            .map_err(|e| BillingError::Internal(format!("invoice template: {}", e)))?;
        Ok(Self {
            templates,
            timeout: RENDER_TIMEOUT,
        })
    }

    /// Limit on loading and printing one page
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn render_html(&self, bill: &BillFields, company: &Branding) -> BillingResult<String> {
        let view = build_view(bill, company);
        self.templates
            .render(TEMPLATE_NAME, &view)
            .map_err(|e| BillingError::Render(e.to_string()))
    }

    /// Render one invoice on a context borrowed from `pool`.
    ///
    /// A page that does not print within the timeout fails with a render error
    /// and its context is released.
    pub async fn render_pdf(
        &self,
        pool: &RenderPool,
        bill: &BillFields,
        company: &Branding,
    ) -> BillingResult<Vec<u8>> {
        let html = self.render_html(bill, company)?;
        let mut context = pool.acquire().await?;
        let result = match tokio::time::timeout(self.timeout, context.print_pdf(&html)).await {
            Ok(result) => result,
            Err(_) => Err(BillingError::Render(format!(
                "page did not print within {:?}",
                self.timeout
            ))),
        };
        pool.release(context).await;

        match &result {
            Ok(pdf) => debug!("Rendered {} ({} bytes)", bill.invoice_filename(), pdf.len()),
            Err(e) => warn!("Rendering {} failed: {}", bill.invoice_filename(), e),
        }
        result
    }

    /// Render one invoice on a dedicated engine, closed before returning
    pub async fn render_single(
        &self,
        launcher: &dyn EngineLauncher,
        bill: &BillFields,
        company: &Branding,
    ) -> BillingResult<Vec<u8>> {
        let pool = RenderPool::new(launcher.launch().await?, 1);
        let result = self.render_pdf(&pool, bill, company).await;
        pool.shutdown().await;
        result
    }
}

//! Billing and invoicing services

pub mod archive_store;
pub mod bill_calculator;
pub mod billing_store;
pub mod branding;
pub mod bulk_export;
pub mod cancellation;
pub mod csv_ingest;
pub mod invoice_renderer;
pub mod progress;
pub mod reconciler;
pub mod render_engine;
pub mod render_pool;

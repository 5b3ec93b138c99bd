use std::time::Duration;

/// Extra-charge slots stored per bill
pub const MAX_EXTRA_CHARGES: usize = 3;

/// Example serials listed in a MISSING_REFERENCE_DATA error
pub const MISSING_SERIAL_EXAMPLES: usize = 5;

/// Days between invoice date and due date
pub const INVOICE_DUE_DAYS: i64 = 20;

/// How long a finished bulk job's progress stays pollable
pub const PROGRESS_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Logo looked up under the public dir when none is configured
pub const FALLBACK_LOGO_PATH: &str = "uploads/company-logo.png";

pub const DEFAULT_CONTACT_EMAIL: &str = "support@litebill.local";

/// Twice the available cores
pub fn default_bulk_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// Upper bound on loading and printing one invoice page
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// JetStream object store bucket holding bulk archives
pub const DEFAULT_ARCHIVE_BUCKET: &str = "litebill_archives";

/// How long a bulk archive stays downloadable
pub const ARCHIVE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

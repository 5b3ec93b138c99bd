//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::defaults::{
    default_bulk_concurrency, ARCHIVE_RETENTION, DEFAULT_ARCHIVE_BUCKET, DEFAULT_CONTACT_EMAIL,
    RENDER_TIMEOUT,
};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    pub nats_user: Option<String>,
    pub nats_password: Option<String>,

    /// PostgreSQL connection string
    pub database_url: String,

    /// JWT secret key for token validation
    pub jwt_secret: String,

    /// Shown to tenants that hit their license limit
    pub contact_email: String,

    /// Render contexts per bulk job
    pub bulk_pdf_concurrency: usize,

    /// 0 = stored, 1-9 = deflate level
    pub zip_compression_level: u32,

    /// Root for relative logo paths
    pub public_dir: PathBuf,

    pub chrome_executable: Option<PathBuf>,

    /// Per-invoice page load and print limit
    pub render_timeout: Duration,

    /// Object store bucket for bulk archives
    pub archive_bucket: String,
    pub archive_retention: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let nats_url = var("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let jwt_secret = jwt_secret(&lookup)?;

        let bulk_pdf_concurrency = match var("BULK_PDF_CONCURRENCY") {
            Some(raw) => parse_number::<usize>("BULK_PDF_CONCURRENCY", &raw)?.max(1),
            None => default_bulk_concurrency(),
        };

        let zip_compression_level = match var("ZIP_COMPRESSION_LEVEL") {
            Some(raw) => parse_number::<u32>("ZIP_COMPRESSION_LEVEL", &raw)?,
            None => 0,
        };
        if zip_compression_level > 9 {
            anyhow::bail!(
                "ZIP_COMPRESSION_LEVEL must be between 0 and 9 (got {})",
                zip_compression_level
            );
        }

        let render_timeout = match var("RENDER_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number::<u64>("RENDER_TIMEOUT_SECS", &raw)?.max(1)),
            None => RENDER_TIMEOUT,
        };

        let archive_retention = match var("ARCHIVE_RETENTION_HOURS") {
            Some(raw) => Duration::from_secs(parse_number::<u64>("ARCHIVE_RETENTION_HOURS", &raw)?.max(1) * 3600),
            None => ARCHIVE_RETENTION,
        };

        let archive_bucket = var("ARCHIVE_BUCKET").unwrap_or_else(|| DEFAULT_ARCHIVE_BUCKET.to_string());
        if !archive_bucket.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            anyhow::bail!("ARCHIVE_BUCKET may only contain letters, digits, '-' and '_' (got {:?})", archive_bucket);
        }

        Ok(Self {
            nats_url,
            nats_user: var("NATS_USER"),
            nats_password: var("NATS_PASSWORD"),
            database_url,
            jwt_secret,
            contact_email: var("CONTACT_EMAIL").unwrap_or_else(|| DEFAULT_CONTACT_EMAIL.to_string()),
            bulk_pdf_concurrency,
            zip_compression_level,
            public_dir: var("PUBLIC_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("public")),
            chrome_executable: var("CHROME_EXECUTABLE").map(PathBuf::from),
            render_timeout,
            archive_bucket,
            archive_retention,
        })
    }
}

/// Read and check `JWT_SECRET` on its own (token minting needs nothing else)
pub fn jwt_secret(lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let jwt_secret = lookup("JWT_SECRET")
        .context("JWT_SECRET must be set, generate one with: openssl rand -base64 48")?;

    if jwt_secret.len() < 32 {
        anyhow::bail!(
            "JWT_SECRET must be at least 32 bytes (current: {} bytes). Generate one with: openssl rand -base64 48",
            jwt_secret.len()
        );
    }
    Ok(jwt_secret)
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{} must be a non-negative integer (got {:?})", key, raw))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "test-secret-key-for-jwt-at-least-32-bytes-long";

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let mut env: HashMap<String, String> = HashMap::from([
            ("DATABASE_URL".to_string(), "postgres://test".to_string()),
            ("JWT_SECRET".to_string(), SECRET.to_string()),
        ]);
        for (k, v) in pairs {
            env.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert!(config.nats_user.is_none());
        assert_eq!(config.contact_email, DEFAULT_CONTACT_EMAIL);
        assert_eq!(config.zip_compression_level, 0);
        assert_eq!(config.public_dir, PathBuf::from("public"));
        assert!(config.chrome_executable.is_none());
        assert!(config.bulk_pdf_concurrency >= 1);
        assert_eq!(config.render_timeout, Duration::from_secs(60));
        assert_eq!(config.archive_bucket, DEFAULT_ARCHIVE_BUCKET);
        assert_eq!(config.archive_retention, ARCHIVE_RETENTION);
    }

    #[test]
    fn test_config_render_timeout_and_archive() {
        let config = load(&[
            ("RENDER_TIMEOUT_SECS", "15"),
            ("ARCHIVE_BUCKET", "exports-eu"),
            ("ARCHIVE_RETENTION_HOURS", "2"),
        ])
        .unwrap();
        assert_eq!(config.render_timeout, Duration::from_secs(15));
        assert_eq!(config.archive_bucket, "exports-eu");
        assert_eq!(config.archive_retention, Duration::from_secs(7200));
    }

    #[test]
    fn test_config_rejects_bad_bucket_name() {
        assert!(load(&[("ARCHIVE_BUCKET", "exports.eu")]).is_err());
        assert!(load(&[("RENDER_TIMEOUT_SECS", "-5")]).is_err());
    }

    #[test]
    fn test_config_overrides() {
        let config = load(&[
            ("BULK_PDF_CONCURRENCY", "3"),
            ("ZIP_COMPRESSION_LEVEL", "6"),
            ("CONTACT_EMAIL", "sales@example.com"),
            ("CHROME_EXECUTABLE", "/usr/bin/chromium"),
        ])
        .unwrap();
        assert_eq!(config.bulk_pdf_concurrency, 3);
        assert_eq!(config.zip_compression_level, 6);
        assert_eq!(config.contact_email, "sales@example.com");
        assert_eq!(config.chrome_executable, Some(PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn test_config_zero_concurrency_clamped() {
        let config = load(&[("BULK_PDF_CONCURRENCY", "0")]).unwrap();
        assert_eq!(config.bulk_pdf_concurrency, 1);
    }

    #[test]
    fn test_config_rejects_bad_numbers() {
        assert!(load(&[("BULK_PDF_CONCURRENCY", "lots")]).is_err());
        assert!(load(&[("ZIP_COMPRESSION_LEVEL", "12")]).is_err());
    }

    #[test]
    fn test_config_requires_database_url() {
        let result = Config::from_lookup(|key| (key == "JWT_SECRET").then(|| SECRET.to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        assert!(load(&[("JWT_SECRET", "too-short")]).is_err());
    }
}

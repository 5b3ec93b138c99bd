//! Company branding for invoices
//!
//! Local logo files are inlined as data URLs so the headless browser never
//! needs filesystem or network access while printing.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Serialize;
use tracing::{debug, warn};

use crate::defaults::FALLBACK_LOGO_PATH;
use crate::types::CompanySettings;

/// Branding block passed to the invoice template
#[derive(Debug, Clone, Default, Serialize)]
pub struct Branding {
    pub company_name: Option<String>,
    /// Data URL, remote URL, or none (template shows the company name instead)
    pub logo_src: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub vat_number: Option<String>,
}

impl Branding {
    pub fn from_settings(settings: Option<CompanySettings>, public_dir: &Path) -> Self {
        let settings = settings.unwrap_or_default();
        Self {
            logo_src: resolve_logo(settings.logo_url.as_deref(), public_dir),
            company_name: settings.company_name,
            address: settings.address,
            city: settings.city,
            phone: settings.phone,
            email: settings.email,
            vat_number: settings.vat_number,
        }
    }
}

/// Resolve the configured logo to something the template can embed.
///
/// Order: configured path (absolute, or relative to `public_dir`), then the
/// conventional upload path, then a remote URL passed through untouched.
pub fn resolve_logo(configured: Option<&str>, public_dir: &Path) -> Option<String> {
    let configured = configured.map(str::trim).filter(|s| !s.is_empty());
    let remote = configured.filter(|s| is_remote(s));

    let found = configured
        .filter(|s| !is_remote(s))
        .and_then(|s| find_file(s, public_dir))
        .or_else(|| find_file(FALLBACK_LOGO_PATH, public_dir));

    if let Some(path) = found {
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!("Embedding logo from {}", path.display());
                return Some(data_url(&path, &bytes));
            }
            Err(e) => warn!("Could not read logo {}: {}", path.display(), e),
        }
    }

    remote.map(str::to_string)
}

fn is_remote(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn find_file(value: &str, public_dir: &Path) -> Option<PathBuf> {
    let path = Path::new(value);
    if path.is_absolute() && path.is_file() {
        return Some(path.to_path_buf());
    }

    let relative = value.trim_start_matches(['/', '\\']);
    [public_dir.join(relative), PathBuf::from(relative)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

fn data_url(path: &Path, bytes: &[u8]) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    };
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_logo_is_embedded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/logo.svg"), b"<svg/>").unwrap();

        let src = resolve_logo(Some("/img/logo.svg"), dir.path()).unwrap();
        assert_eq!(src, "data:image/svg+xml;base64,PHN2Zy8+");
    }

    #[test]
    fn test_absolute_logo_is_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brand.JPG");
        std::fs::write(&path, b"jpg").unwrap();

        let src = resolve_logo(path.to_str(), Path::new("/nonexistent")).unwrap();
        assert!(src.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_fallback_upload_path_used_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join(FALLBACK_LOGO_PATH), b"png").unwrap();

        let src = resolve_logo(None, dir.path()).unwrap();
        assert!(src.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_remote_url_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let src = resolve_logo(Some("https://cdn.example.com/logo.png"), dir.path());
        assert_eq!(src.as_deref(), Some("https://cdn.example.com/logo.png"));
    }

    #[test]
    fn test_local_fallback_preferred_over_remote() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join(FALLBACK_LOGO_PATH), b"png").unwrap();

        let src = resolve_logo(Some("HTTPS://cdn.example.com/logo.png"), dir.path()).unwrap();
        assert!(src.starts_with("data:image/png"));
    }

    #[test]
    fn test_missing_logo_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_logo(Some("missing.png"), dir.path()).is_none());
        assert!(resolve_logo(None, dir.path()).is_none());
    }

    #[test]
    fn test_branding_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CompanySettings {
            company_name: Some("Acme Water".into()),
            ..Default::default()
        };
        let branding = Branding::from_settings(Some(settings), dir.path());
        assert_eq!(branding.company_name.as_deref(), Some("Acme Water"));
        assert!(branding.logo_src.is_none());
    }
}

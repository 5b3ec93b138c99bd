//! Headless-browser PDF engine
//!
//! One engine is one browser process. Each [`RenderContext`] is an isolated
//! tab inside it; many contexts may be open concurrently against one engine.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BillingError, BillingResult};

/// A4 in inches
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;

#[async_trait]
pub trait RenderContext: Send {
    /// Load `html` and print it to a PDF
    async fn print_pdf(&mut self, html: &str) -> BillingResult<Vec<u8>>;

    async fn close(self: Box<Self>) -> BillingResult<()>;
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn new_context(&self) -> BillingResult<Box<dyn RenderContext>>;

    /// Shut the engine down; later `new_context` calls fail
    async fn close(&self) -> BillingResult<()>;
}

#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> BillingResult<Arc<dyn RenderEngine>>;

    fn name(&self) -> &'static str;
}

fn render_err(e: impl std::fmt::Display) -> BillingError {
    BillingError::Render(e.to_string())
}

/// Launches headless Chromium over the DevTools protocol
pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl EngineLauncher for ChromiumLauncher {
    async fn launch(&self) -> BillingResult<Arc<dyn RenderEngine>> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--disable-gpu");
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(BillingError::Render)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(render_err)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                }
            }
        });

        info!("Launched headless browser");
        Ok(Arc::new(ChromiumEngine {
            browser: RwLock::new(Some(browser)),
            handler_task: parking_lot::Mutex::new(Some(handler_task)),
        }))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

struct ChromiumEngine {
    browser: RwLock<Option<Browser>>,
    handler_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn new_context(&self) -> BillingResult<Box<dyn RenderContext>> {
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| BillingError::Render("browser already closed".into()))?;
        let page = browser.new_page("about:blank").await.map_err(render_err)?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&self) -> BillingResult<()> {
        let browser = self.browser.write().await.take();
        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map_err(render_err);
                if let Err(e) = browser.wait().await {
                    warn!("Browser process did not exit cleanly: {}", e);
                }
                closed.map(|_| ())
            }
            None => Ok(()),
        };

        let handler_task = self.handler_task.lock().take();
        if let Some(task) = handler_task {
            task.abort();
        }
        debug!("Headless browser closed");
        result
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl RenderContext for ChromiumPage {
    async fn print_pdf(&mut self, html: &str) -> BillingResult<Vec<u8>> {
        self.page.set_content(html).await.map_err(render_err)?;

        let params = PrintToPdfParams {
            print_background: Some(true),
            paper_width: Some(A4_WIDTH_IN),
            paper_height: Some(A4_HEIGHT_IN),
            margin_top: Some(0.0),
            margin_bottom: Some(0.0),
            margin_left: Some(0.0),
            margin_right: Some(0.0),
            ..Default::default()
        };
        self.page.pdf(params).await.map_err(render_err)
    }

    async fn close(self: Box<Self>) -> BillingResult<()> {
        self.page.close().await.map_err(render_err)
    }
}

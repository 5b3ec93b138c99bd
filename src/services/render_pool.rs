//! Bounded pool of rendering contexts over one shared engine
//!
//! At most `size` contexts are open at any time. The engine is closed exactly
//! once, by [`RenderPool::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{BillingError, BillingResult};
use crate::services::render_engine::{RenderContext, RenderEngine};

/// A stuck page or browser must not hold up pool cleanup
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RenderPool {
    engine: Arc<dyn RenderEngine>,
    permits: Arc<Semaphore>,
    size: usize,
    closed: AtomicBool,
}

/// An open context holding one pool slot
pub struct PooledContext {
    context: Box<dyn RenderContext>,
    _permit: OwnedSemaphorePermit,
}

impl PooledContext {
    pub async fn print_pdf(&mut self, html: &str) -> BillingResult<Vec<u8>> {
        self.context.print_pdf(html).await
    }
}

impl RenderPool {
    pub fn new(engine: Arc<dyn RenderEngine>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            engine,
            permits: Arc::new(Semaphore::new(size)),
            size,
            closed: AtomicBool::new(false),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for a free slot, then open a context in it
    pub async fn acquire(&self) -> BillingResult<PooledContext> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BillingError::Render("render pool is shut down".into()))?;
        let context = self.engine.new_context().await?;
        Ok(PooledContext { context, _permit: permit })
    }

    /// Close the context and free its slot
    pub async fn release(&self, pooled: PooledContext) {
        let PooledContext { context, _permit } = pooled;
        match tokio::time::timeout(CLOSE_TIMEOUT, context.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close render context: {}", e),
            Err(_) => warn!("Render context did not close within {:?}", CLOSE_TIMEOUT),
        }
    }

    /// Close the engine. Only the first call has any effect.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        match tokio::time::timeout(CLOSE_TIMEOUT, self.engine.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close render engine: {}", e),
            Err(_) => warn!("Render engine did not close within {:?}", CLOSE_TIMEOUT),
        }
        debug!("Render pool shut down");
    }
}

//! The browser capability the pipeline depends on.
//!
//! Search, extraction and session handling only ever see these traits; the
//! concrete engine lives in `webdriver`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::session::SessionIdentity;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("renderer session error: {0}")]
    Session(String),
}

/// Where a navigation ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    /// Main document HTTP status, when the engine exposes it.
    pub status: Option<u16>,
    pub final_url: String,
}

/// One isolated browsing context.
#[async_trait]
pub trait Renderer: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Navigation, RenderError>;

    /// Evaluate a JS function expression (`() => ...`) and return its JSON result.
    async fn evaluate(&mut self, script: &str) -> Result<Value, RenderError>;

    /// Poll until `selector` matches an element or `timeout` elapses.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, RenderError>;

    /// Release the context. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), RenderError>;
}

/// Opens fresh renderer sessions with a given identity for a given worker.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn open(
        &self,
        worker_id: usize,
        identity: &SessionIdentity,
    ) -> Result<Box<dyn Renderer>, RenderError>;
}

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::pause;
use crate::renderer::{RenderError, Renderer, RendererFactory};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub const VIEWPORT: (u32, u32) = (1920, 1080);

/// Runs before any page script; hides the `navigator.webdriver` flag.
pub const STEALTH_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined});";

/// Client identity a session presents to the sites it visits.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub init_script: &'static str,
}

impl SessionIdentity {
    pub fn random() -> Self {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        SessionIdentity {
            user_agent: user_agent.to_string(),
            viewport: VIEWPORT,
            init_script: STEALTH_SCRIPT,
        }
    }
}

/// Owns one worker's renderer session.
///
/// The session is opened on first use, replaced on `recycle`, refreshed every
/// `recycle_every` completed records, and closed on every exit path: `close`
/// when the worker finishes, a spawned close from `Drop` otherwise.
pub struct SessionManager {
    worker_id: usize,
    factory: Arc<dyn RendererFactory>,
    renderer: Option<Box<dyn Renderer>>,
    recycle_every: usize,
    completed_since_open: usize,
    recycles: usize,
    runtime: Option<Handle>,
}

impl SessionManager {
    pub fn new(worker_id: usize, factory: Arc<dyn RendererFactory>, recycle_every: usize) -> Self {
        SessionManager {
            worker_id,
            factory,
            renderer: None,
            recycle_every,
            completed_since_open: 0,
            recycles: 0,
            runtime: Handle::try_current().ok(),
        }
    }

    /// The live session, opening one if needed.
    pub async fn renderer(&mut self) -> Result<&mut dyn Renderer, RenderError> {
        let renderer = match self.renderer.take() {
            Some(r) => r,
            None => self.open().await?,
        };
        Ok(self.renderer.insert(renderer).as_mut())
    }

    /// Discard the session, wait out `cooldown`, and open a fresh one.
    pub async fn recycle(&mut self, cooldown: Duration) -> Result<(), RenderError> {
        self.recycles += 1;
        self.close().await;
        pause(cooldown).await;
        let renderer = self.open().await?;
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Count a recycle and drop the session without reopening; the next use opens
    /// a fresh one.
    pub async fn discard(&mut self) {
        self.recycles += 1;
        self.close().await;
    }

    /// Count a finished record; refresh the session when it has served its quota.
    pub async fn record_completed(&mut self) {
        self.completed_since_open += 1;
        if self.recycle_every > 0 && self.completed_since_open >= self.recycle_every {
            debug!(worker = self.worker_id, "refreshing session after {} records", self.completed_since_open);
            self.close().await;
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Engine-triggered recycles so far.
    pub fn recycles(&self) -> usize {
        self.recycles
    }

    pub async fn close(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Err(e) = renderer.close().await {
                warn!(worker = self.worker_id, "Failed to close session: {}", e);
            }
        }
        self.completed_since_open = 0;
    }

    async fn open(&mut self) -> Result<Box<dyn Renderer>, RenderError> {
        let identity = SessionIdentity::random();
        debug!(worker = self.worker_id, user_agent = %identity.user_agent, "opening session");
        let renderer = self.factory.open(self.worker_id, &identity).await?;
        self.completed_since_open = 0;
        Ok(renderer)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let Some(mut renderer) = self.renderer.take() else {
            return;
        };
        let worker_id = self.worker_id;
        match &self.runtime {
            Some(handle) => {
                handle.spawn(async move {
                    if let Err(e) = renderer.close().await {
                        warn!(worker = worker_id, "Session cleanup on drop failed: {}", e);
                    }
                });
            }
            None => warn!(worker = worker_id, "Session dropped outside a runtime; not closed"),
        }
    }
}

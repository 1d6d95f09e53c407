use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::{
    CapabilitiesHelper, ChromiumLikeCapabilities, DesiredCapabilities, PageLoadStrategy, WebDriver,
};
use tracing::debug;

use crate::renderer::{Navigation, RenderError, Renderer, RendererFactory};
use crate::session::SessionIdentity;

const NAVIGATION_STATUS_JS: &str =
    "const e = performance.getEntriesByType('navigation')[0]; return e ? (e.responseStatus || null) : null;";
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Headroom over the driver's own page-load timeout before we give up on it.
const NAVIGATE_SLACK: Duration = Duration::from_secs(2);

/// Opens Chrome sessions on a WebDriver endpoint (chromedriver, selenium).
pub struct WebDriverFactory {
    server_url: String,
    headless: bool,
    visible_worker: Option<usize>,
}

impl WebDriverFactory {
    pub fn new(server_url: &str, headless: bool, visible_worker: Option<usize>) -> Self {
        WebDriverFactory {
            server_url: server_url.to_string(),
            headless,
            visible_worker,
        }
    }

    /// Headless runs still keep `visible_worker`'s browser on screen.
    fn headless_for(&self, worker_id: usize) -> bool {
        self.headless && self.visible_worker != Some(worker_id)
    }
}

fn session_err(e: impl std::fmt::Display) -> RenderError {
    RenderError::Session(e.to_string())
}

#[async_trait]
impl RendererFactory for WebDriverFactory {
    async fn open(
        &self,
        worker_id: usize,
        identity: &SessionIdentity,
    ) -> Result<Box<dyn Renderer>, RenderError> {
        let (width, height) = identity.viewport;
        let mut args = vec![
            format!("--user-agent={}", identity.user_agent),
            format!("--window-size={},{}", width, height),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
        ];
        if self.headless_for(worker_id) {
            args.push("--headless=new".to_string());
        }

        let mut caps = DesiredCapabilities::chrome();
        for arg in &args {
            caps.add_arg(arg).map_err(session_err)?;
        }
        caps.set_page_load_strategy(PageLoadStrategy::Eager)
            .map_err(session_err)?;

        let driver = WebDriver::new(&self.server_url, caps)
            .await
            .map_err(session_err)?;

        let devtools = ChromeDevTools::new(driver.handle.clone());
        if let Err(e) = devtools
            .execute_cdp_with_params(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": identity.init_script }),
            )
            .await
        {
            let _ = driver.quit().await;
            return Err(session_err(e));
        }

        debug!(worker = worker_id, "WebDriver session opened on {}", self.server_url);
        Ok(Box::new(WebDriverRenderer {
            driver: Some(driver),
        }))
    }
}

/// One browser session. Scripts are passed as JS arrow functions and invoked in the page.
pub struct WebDriverRenderer {
    driver: Option<WebDriver>,
}

impl WebDriverRenderer {
    fn driver(&self) -> Result<&WebDriver, RenderError> {
        self.driver
            .as_ref()
            .ok_or_else(|| RenderError::Session("session already closed".into()))
    }
}

#[async_trait]
impl Renderer for WebDriverRenderer {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Navigation, RenderError> {
        let driver = self.driver()?;
        driver.set_page_load_timeout(timeout).await.map_err(session_err)?;

        match tokio::time::timeout(timeout + NAVIGATE_SLACK, driver.goto(url)).await {
            Err(_) => {
                return Err(RenderError::Timeout {
                    url: url.to_string(),
                    timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(RenderError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(())) => {}
        }

        let final_url = driver
            .current_url()
            .await
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string());
        let status = driver
            .execute(NAVIGATION_STATUS_JS, Vec::new())
            .await
            .ok()
            .and_then(|ret| ret.json().as_u64())
            .and_then(|s| u16::try_from(s).ok());

        Ok(Navigation { status, final_url })
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, RenderError> {
        let driver = self.driver()?;
        let ret = driver
            .execute(format!("return ({})();", script), Vec::new())
            .await
            .map_err(|e| RenderError::Script(e.to_string()))?;
        Ok(ret.json().clone())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, RenderError> {
        let literal = serde_json::to_string(selector).map_err(|e| RenderError::Script(e.to_string()))?;
        let present = format!("() => document.querySelector({}) !== null", literal);
        let deadline = Instant::now() + timeout;
        loop {
            if self.evaluate(&present).await?.as_bool().unwrap_or(false) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await.map_err(session_err)?;
        }
        Ok(())
    }
}

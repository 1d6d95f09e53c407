use std::time::Duration;

use tracing::debug;

use crate::config::pause;
use crate::renderer::{RenderError, Renderer};

/// Visible text of the main content region, else the body minus chrome.
pub(crate) const MAIN_CONTENT_JS: &str = r#"() => {
    const selectors = [
        'main', '[role="main"]', '#main-content', '#content', '.main-content',
        'article', '.business-info', '.listing-content', '.profile-content'
    ];
    for (const sel of selectors) {
        const el = document.querySelector(sel);
        if (el?.innerText?.length > 200) return el.innerText;
    }
    const body = document.body.cloneNode(true);
    ['footer', 'nav', '[role="navigation"]', '.footer', '.nav', '.sidebar', '#footer', '#nav', '.related-searches']
        .forEach(sel => body.querySelectorAll(sel).forEach(el => el.remove()));
    return body.innerText || "";
}"#;

pub struct PageExtractor {
    load_timeout: Duration,
    settle: Duration,
}

impl PageExtractor {
    pub fn new(load_timeout: Duration, settle: Duration) -> Self {
        PageExtractor {
            load_timeout,
            settle,
        }
    }

    /// Visible page text, or `None` if the page could not be loaded.
    /// An empty string is a successful fetch of an empty page.
    pub async fn fetch_text(&self, renderer: &mut dyn Renderer, url: &str) -> Option<String> {
        match self.try_fetch(renderer, url).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Fetch failed for {}: {}", url, e);
                None
            }
        }
    }

    async fn try_fetch(
        &self,
        renderer: &mut dyn Renderer,
        url: &str,
    ) -> Result<Option<String>, RenderError> {
        let nav = renderer.navigate(url, self.load_timeout).await?;
        if let Some(status) = nav.status.filter(|s| *s >= 400) {
            debug!("HTTP {} for {}", status, url);
            return Ok(None);
        }

        pause(self.settle).await;
        let text = renderer.evaluate(MAIN_CONTENT_JS).await?;
        Ok(Some(text.as_str().unwrap_or("").to_string()))
    }
}

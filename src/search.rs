use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::{pause, Pacing};
use crate::matcher::is_eligible_url;
use crate::renderer::{RenderError, Renderer};

const ENGINE_URL: &str = "https://duckduckgo.com/?q=";
const ENGINE_HOST: &str = "duckduckgo.com";
/// Path segment of the engine's automation-defense interstitial (e.g. `static-pages/418.html`).
const ERROR_PAGE_MARKER: &str = "static-pages";
const UNEXPECTED_ERROR_TEXT: &str = "Unexpected error";
const RESULT_SELECTOR: &str = r#"article[data-testid="result"]"#;
/// A results page shorter than this without result containers is a refusal.
const MIN_CONTENT_LEN: u64 = 1000;

const MAX_CONTAINERS: usize = 12;
const MAX_ANCHORS: usize = 30;
const MAX_URLS: usize = 12;

/// Fewer URLs than this from result containers triggers the raw-anchor scan;
/// fewer than this from the exact query triggers the broad query.
pub const MIN_USEFUL_URLS: usize = 5;

pub(crate) const CURRENT_URL_JS: &str = "() => window.location.href";
pub(crate) const BODY_TEXT_JS: &str = r#"() => document.body?.innerText || """#;
pub(crate) const PAGE_LENGTH_JS: &str = "() => document.documentElement.outerHTML.length";
pub(crate) const RESULT_LINKS_JS: &str = r#"() => ({
    containers: Array.from(document.querySelectorAll('article[data-testid="result"]'))
        .slice(0, 12)
        .map(a => Array.from(a.querySelectorAll('a[href^="http"]')).map(l => l.getAttribute('href'))),
    anchors: Array.from(document.querySelectorAll('a[href^="http"]'))
        .slice(0, 30)
        .map(l => l.getAttribute('href')),
})"#;

/// Result of one search attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Eligible result URLs in page order, deduplicated.
    Success(Vec<String>),
    /// The engine gave no usable answer; retry the record later.
    Blocked,
    /// The engine served its anti-automation page; the session must be recycled.
    EngineError,
}

/// Raw hrefs pulled from a results page.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResultLinks {
    /// Links inside each structured result container, container by container.
    pub containers: Vec<Vec<Option<String>>>,
    /// The page's first hyperlinks regardless of container.
    pub anchors: Vec<Option<String>>,
}

pub fn query_url(query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!("{}{}", ENGINE_URL, encoded)
}

/// Quoted name plus location.
pub fn exact_query(name: &str, city: &str, state: &str) -> String {
    format!("\"{}\" {} {}", name, city, state)
}

pub fn broad_query(name: &str, city: &str, state: &str) -> String {
    format!("{} {} {}", name, city, state)
}

/// First eligible link per result container, topped up from raw anchors when thin.
pub fn collect_candidate_urls(links: &ResultLinks) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();

    for hrefs in links.containers.iter().take(MAX_CONTAINERS) {
        let first = hrefs.iter().flatten().find(|h| is_eligible_url(h));
        if let Some(href) = first {
            if !urls.contains(href) {
                urls.push(href.clone());
            }
        }
    }

    if urls.len() < MIN_USEFUL_URLS {
        for href in links.anchors.iter().take(MAX_ANCHORS).flatten() {
            if urls.len() >= MAX_URLS {
                break;
            }
            if is_eligible_url(href) && !urls.contains(href) {
                urls.push(href.clone());
            }
        }
    }

    urls
}

pub struct SearchClient {
    page_load_timeout: Duration,
    results_timeout: Duration,
    pacing: Pacing,
}

impl SearchClient {
    pub fn new(page_load_timeout: Duration, results_timeout: Duration, pacing: Pacing) -> Self {
        SearchClient {
            page_load_timeout,
            results_timeout,
            pacing,
        }
    }

    /// Run one query. Renderer failures count as `Blocked`, never as errors.
    pub async fn search(&self, renderer: &mut dyn Renderer, query: &str) -> SearchOutcome {
        match self.try_search(renderer, query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Search for {} failed: {}", query, e);
                SearchOutcome::Blocked
            }
        }
    }

    async fn try_search(
        &self,
        renderer: &mut dyn Renderer,
        query: &str,
    ) -> Result<SearchOutcome, RenderError> {
        let nav = renderer
            .navigate(&query_url(query), self.page_load_timeout)
            .await?;
        pause(self.pacing.search_settle()).await;

        let landed = match renderer.evaluate(CURRENT_URL_JS).await {
            Ok(v) => v.as_str().map(str::to_string).unwrap_or(nav.final_url),
            Err(_) => nav.final_url,
        };

        if landed.contains(ERROR_PAGE_MARKER) {
            debug!("Engine error page: {}", landed);
            return Ok(SearchOutcome::EngineError);
        }

        if let Ok(body) = renderer.evaluate(BODY_TEXT_JS).await {
            if body.as_str().unwrap_or("").contains(UNEXPECTED_ERROR_TEXT) {
                debug!("Engine reported an unexpected error for {}", query);
                return Ok(SearchOutcome::EngineError);
            }
        }

        if landed == "about:blank" || !landed.contains(ENGINE_HOST) {
            return Ok(SearchOutcome::Blocked);
        }

        let has_results = renderer
            .wait_for_selector(RESULT_SELECTOR, self.results_timeout)
            .await
            .unwrap_or(false);
        if !has_results {
            let len = renderer.evaluate(PAGE_LENGTH_JS).await?.as_u64().unwrap_or(0);
            if len < MIN_CONTENT_LEN {
                return Ok(SearchOutcome::Blocked);
            }
        }

        let raw = renderer.evaluate(RESULT_LINKS_JS).await?;
        let links: ResultLinks = serde_json::from_value(raw)
            .map_err(|e| RenderError::Script(format!("unexpected result links shape: {}", e)))?;

        Ok(SearchOutcome::Success(collect_candidate_urls(&links)))
    }
}

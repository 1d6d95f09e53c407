//! Scripted in-memory web used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::extractor::MAIN_CONTENT_JS;
use crate::renderer::{Navigation, RenderError, Renderer, RendererFactory};
use crate::search::{BODY_TEXT_JS, CURRENT_URL_JS, PAGE_LENGTH_JS, RESULT_LINKS_JS};
use crate::session::SessionIdentity;

const ENGINE_PREFIX: &str = "https://duckduckgo.com/?";
const INTERSTITIAL_URL: &str = "https://duckduckgo.com/static-pages/418.html";

/// How the engine answers one query.
#[derive(Debug, Clone)]
pub enum FakeSearch {
    Results(Vec<String>),
    EngineError,
    UnexpectedError,
    Blank,
    NoResults,
    NavigationFailure,
    /// The renderer panics mid-navigation.
    Crash,
}

impl FakeSearch {
    pub fn results(urls: &[&str]) -> Self {
        FakeSearch::Results(urls.iter().map(|u| u.to_string()).collect())
    }
}

#[derive(Debug, Clone)]
pub enum FakePage {
    Text(String),
    Status(u16),
    Unreachable,
}

impl FakePage {
    pub fn text(t: &str) -> Self {
        FakePage::Text(t.to_string())
    }
}

#[derive(Default)]
pub struct FakeWeb {
    searches: Mutex<HashMap<String, VecDeque<FakeSearch>>>,
    pages: Mutex<HashMap<String, FakePage>>,
    queries: Mutex<Vec<String>>,
    refuse_sessions: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeWeb {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeWeb::default())
    }

    /// Answers for `query`, in order; the last one repeats. Unknown queries get no results.
    pub fn on_search(&self, query: &str, answers: Vec<FakeSearch>) {
        self.searches
            .lock()
            .unwrap()
            .insert(query.to_string(), answers.into());
    }

    pub fn page(&self, url: &str, page: FakePage) {
        self.pages.lock().unwrap().insert(url.to_string(), page);
    }

    /// Make every later session open fail, as when the driver endpoint is down.
    pub fn refuse_sessions(&self) {
        self.refuse_sessions.store(true, Ordering::SeqCst);
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn RendererFactory> {
        Arc::new(FakeFactory { web: self.clone() })
    }

    pub fn renderer(self: &Arc<Self>) -> Box<dyn Renderer> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeRenderer {
            web: self.clone(),
            current: Current::Blank,
            closed: false,
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn answer(&self, query: &str) -> FakeSearch {
        self.queries.lock().unwrap().push(query.to_string());
        let mut searches = self.searches.lock().unwrap();
        match searches.get_mut(query) {
            Some(answers) if answers.len() > 1 => answers.pop_front().unwrap(),
            Some(answers) => answers
                .front()
                .cloned()
                .unwrap_or(FakeSearch::Results(Vec::new())),
            None => FakeSearch::Results(Vec::new()),
        }
    }
}

struct FakeFactory {
    web: Arc<FakeWeb>,
}

#[async_trait]
impl RendererFactory for FakeFactory {
    async fn open(
        &self,
        _worker_id: usize,
        _identity: &SessionIdentity,
    ) -> Result<Box<dyn Renderer>, RenderError> {
        if self.web.refuse_sessions.load(Ordering::SeqCst) {
            return Err(RenderError::Session("connection refused".into()));
        }
        Ok(self.web.renderer())
    }
}

enum Current {
    Blank,
    Search { url: String, answer: FakeSearch },
    Page { url: String, text: String },
}

struct FakeRenderer {
    web: Arc<FakeWeb>,
    current: Current,
    closed: bool,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Navigation, RenderError> {
        if self.closed {
            return Err(RenderError::Session("closed".into()));
        }

        if url.starts_with(ENGINE_PREFIX) {
            let query = url::Url::parse(url)
                .ok()
                .and_then(|u| u.query_pairs().find(|(k, _)| k == "q").map(|(_, v)| v.into_owned()))
                .unwrap_or_default();
            let answer = self.web.answer(&query);
            let final_url = match answer {
                FakeSearch::NavigationFailure => {
                    return Err(RenderError::Timeout {
                        url: url.to_string(),
                        timeout,
                    })
                }
                FakeSearch::Crash => panic!("renderer crashed on {}", query),
                FakeSearch::EngineError => INTERSTITIAL_URL.to_string(),
                FakeSearch::Blank => "about:blank".to_string(),
                _ => url.to_string(),
            };
            self.current = Current::Search {
                url: final_url.clone(),
                answer,
            };
            return Ok(Navigation {
                status: Some(200),
                final_url,
            });
        }

        self.web.fetches.fetch_add(1, Ordering::SeqCst);
        let page = self.web.pages.lock().unwrap().get(url).cloned();
        let (status, text) = match page {
            Some(FakePage::Text(t)) => (200, t),
            Some(FakePage::Status(s)) => (s, String::new()),
            Some(FakePage::Unreachable) | None => {
                return Err(RenderError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".into(),
                })
            }
        };
        self.current = Current::Page {
            url: url.to_string(),
            text,
        };
        Ok(Navigation {
            status: Some(status),
            final_url: url.to_string(),
        })
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, RenderError> {
        let value = match (&self.current, script) {
            (Current::Blank, CURRENT_URL_JS) => json!("about:blank"),
            (Current::Search { url, .. }, CURRENT_URL_JS) => json!(url),
            (Current::Page { url, .. }, CURRENT_URL_JS) => json!(url),
            (Current::Search { answer, .. }, BODY_TEXT_JS) => match answer {
                FakeSearch::UnexpectedError => json!("Unexpected error. Please try again."),
                _ => json!("results"),
            },
            (Current::Search { answer, .. }, PAGE_LENGTH_JS) => match answer {
                FakeSearch::Results(_) => json!(50_000),
                _ => json!(300),
            },
            (Current::Search { answer, .. }, RESULT_LINKS_JS) => match answer {
                FakeSearch::Results(urls) => json!({
                    "containers": urls.iter().map(|u| vec![u.clone()]).collect::<Vec<_>>(),
                    "anchors": [],
                }),
                _ => json!({ "containers": [], "anchors": [] }),
            },
            (Current::Page { text, .. }, MAIN_CONTENT_JS | BODY_TEXT_JS) => json!(text),
            _ => return Err(RenderError::Script("unscripted evaluation".into())),
        };
        Ok(value)
    }

    async fn wait_for_selector(
        &mut self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<bool, RenderError> {
        Ok(matches!(
            self.current,
            Current::Search {
                answer: FakeSearch::Results(_),
                ..
            }
        ))
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        if !self.closed {
            self.closed = true;
            self.web.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

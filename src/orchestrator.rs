use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::{pause, Pacing, Settings};
use crate::extractor::PageExtractor;
use crate::matcher::{
    address_matches, clean_name, contains_service_term, display_host, mentions_service,
    rank_by_priority_domain,
};
use crate::record::BusinessRecord;
use crate::search::{broad_query, exact_query, SearchClient, SearchOutcome, MIN_USEFUL_URLS};
use crate::session::SessionManager;

/// Final classification of one verification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Found { url: String },
    AutoApproved,
    NotFound,
    /// The engine refused; the record goes back on the queue.
    BlockedRetry,
    /// Engine errors outlasted the recycle budget.
    Skipped,
}

/// Session recycles one record may spend on engine errors, across all its names.
#[derive(Debug)]
pub struct RetryBudget {
    used: usize,
    ceiling: usize,
}

impl RetryBudget {
    pub fn new(ceiling: usize) -> Self {
        RetryBudget { used: 0, ceiling }
    }

    fn spend(&mut self) -> bool {
        if self.used >= self.ceiling {
            return false;
        }
        self.used += 1;
        true
    }

    fn exhausted(&self) -> bool {
        self.used >= self.ceiling
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

enum NameOutcome {
    Found(String),
    NotFound,
    Blocked,
    Skipped,
}

impl From<NameOutcome> for Disposition {
    fn from(outcome: NameOutcome) -> Self {
        match outcome {
            NameOutcome::Found(url) => Disposition::Found { url },
            NameOutcome::NotFound => Disposition::NotFound,
            NameOutcome::Blocked => Disposition::BlockedRetry,
            NameOutcome::Skipped => Disposition::Skipped,
        }
    }
}

enum QueryOutcome {
    Urls(Vec<String>),
    Blocked,
    Skipped,
}

/// Drives one record through auto-check, search, URL scan and the DBA fallback.
pub struct Orchestrator {
    search: SearchClient,
    extractor: PageExtractor,
    pacing: Pacing,
    max_urls: usize,
    max_recycles: usize,
}

impl Orchestrator {
    pub fn new(
        search: SearchClient,
        extractor: PageExtractor,
        pacing: Pacing,
        max_urls: usize,
        max_recycles: usize,
    ) -> Self {
        Orchestrator {
            search,
            extractor,
            pacing,
            max_urls,
            max_recycles,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let pacing = settings.pacing();
        Orchestrator::new(
            SearchClient::new(
                settings.page_load_timeout(),
                settings.results_wait_timeout(),
                pacing.clone(),
            ),
            PageExtractor::new(settings.page_load_timeout(), pacing.page_settle),
            pacing,
            settings.max_urls_to_check,
            settings.max_recycles,
        )
    }

    /// Verify one record. `Err` means something unexpected broke (e.g. no
    /// session could be opened); every search and fetch failure is folded into
    /// the returned disposition instead.
    pub async fn verify(
        &self,
        session: &mut SessionManager,
        record: &BusinessRecord,
    ) -> Result<Disposition> {
        if contains_service_term(&record.legal_name, record.dba_name()) {
            return Ok(Disposition::AutoApproved);
        }

        let mut budget = RetryBudget::new(self.max_recycles);

        let legal = clean_name(&record.legal_name);
        if let Some(name) = &legal {
            pause(self.pacing.record_delay()).await;
            match self.verify_name(session, record, name, &mut budget).await? {
                NameOutcome::NotFound => {}
                other => return Ok(other.into()),
            }
        }

        if let Some(dba) = record.dba_name().and_then(clean_name) {
            if legal.as_deref() != Some(dba.as_str()) {
                debug!(worker = session.worker_id(), "  Trying DBA: {}", dba);
                pause(self.pacing.record_delay()).await;
                match self.verify_name(session, record, &dba, &mut budget).await? {
                    NameOutcome::NotFound => {}
                    other => return Ok(other.into()),
                }
            }
        }

        Ok(Disposition::NotFound)
    }

    async fn verify_name(
        &self,
        session: &mut SessionManager,
        record: &BusinessRecord,
        name: &str,
        budget: &mut RetryBudget,
    ) -> Result<NameOutcome> {
        let worker = session.worker_id();
        let (city, state) = (record.city(), record.state());

        let exact = exact_query(name, city, state);
        debug!(worker, "    Query: {}", exact);
        let mut urls = match self.search_with_recycle(session, &exact, budget).await? {
            QueryOutcome::Urls(urls) => urls,
            QueryOutcome::Blocked => return Ok(NameOutcome::Blocked),
            QueryOutcome::Skipped => return Ok(NameOutcome::Skipped),
        };
        debug!(worker, "    Found {} URLs from exact query", urls.len());

        if urls.len() < MIN_USEFUL_URLS {
            pause(self.pacing.search_settle()).await;
            let broad = broad_query(name, city, state);
            debug!(worker, "    Query (broad): {}", broad);
            match self.search_with_recycle(session, &broad, budget).await? {
                QueryOutcome::Urls(more) => {
                    let before = urls.len();
                    for url in more {
                        if !urls.contains(&url) {
                            urls.push(url);
                        }
                    }
                    debug!(worker, "    Found {} additional URLs from broad query", urls.len() - before);
                }
                QueryOutcome::Blocked => return Ok(NameOutcome::Blocked),
                QueryOutcome::Skipped => return Ok(NameOutcome::Skipped),
            }
        }

        if urls.is_empty() {
            debug!(worker, "    No URLs found from any search");
            return Ok(NameOutcome::NotFound);
        }

        let mut ranked = rank_by_priority_domain(&urls);
        ranked.truncate(self.max_urls);
        debug!(worker, "    Checking {} URLs", ranked.len());

        for (i, url) in ranked.iter().enumerate() {
            pause(self.pacing.url_delay).await;
            let host = display_host(url);

            let renderer = session.renderer().await?;
            let Some(text) = self.extractor.fetch_text(renderer, url).await else {
                debug!(worker, "      [{}] {}: failed to load", i + 1, host);
                continue;
            };
            if !address_matches(&text, record) {
                debug!(worker, "      [{}] {}: address mismatch", i + 1, host);
                continue;
            }
            if !mentions_service(&text) {
                debug!(worker, "      [{}] {}: address ok, no towing keywords", i + 1, host);
                continue;
            }

            debug!(worker, "      [{}] {}: match (address + towing)", i + 1, host);
            return Ok(NameOutcome::Found(url.clone()));
        }

        debug!(worker, "    No towing found in any of {} URLs", ranked.len());
        Ok(NameOutcome::NotFound)
    }

    /// Run `query`, recycling the session on engine errors until the budget runs out.
    async fn search_with_recycle(
        &self,
        session: &mut SessionManager,
        query: &str,
        budget: &mut RetryBudget,
    ) -> Result<QueryOutcome> {
        loop {
            let renderer = session.renderer().await?;
            match self.search.search(renderer, query).await {
                SearchOutcome::Success(urls) => return Ok(QueryOutcome::Urls(urls)),
                SearchOutcome::Blocked => {
                    debug!(worker = session.worker_id(), "    Engine blocked query: {}", query);
                    return Ok(QueryOutcome::Blocked);
                }
                SearchOutcome::EngineError => {
                    if !budget.spend() {
                        return Ok(QueryOutcome::Skipped);
                    }
                    warn!(
                        worker = session.worker_id(),
                        "  Engine error page, recycling session (attempt {}/{})",
                        budget.used(),
                        self.max_recycles
                    );
                    // The last recycle still counts, but nothing will use a
                    // fresh session for this record, so skip the cooldown and reopen.
                    if budget.exhausted() {
                        session.discard().await;
                        info!(worker = session.worker_id(), "  Recycle budget spent on: {}", query);
                        return Ok(QueryOutcome::Skipped);
                    }
                    session.recycle(self.pacing.engine_error_cooldown).await?;
                    pause(self.pacing.record_delay()).await;
                }
            }
        }
    }
}

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::config::{pause, Settings};
use crate::orchestrator::{Disposition, Orchestrator};
use crate::record::BusinessRecord;
use crate::renderer::RendererFactory;
use crate::session::SessionManager;
use crate::snapshot::SnapshotPaths;
use crate::store::{Progress, RunStore};

/// What one `run` accomplished.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub queued: usize,
    pub processed_this_run: usize,
    pub verified_this_run: usize,
    pub verified_total: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub requeued: usize,
}

struct WorkerContext {
    store: Arc<RunStore>,
    orchestrator: Arc<Orchestrator>,
    factory: Arc<dyn RendererFactory>,
    progress: ProgressBar,
    recycle_every: usize,
    blocked_cooldown: Duration,
}

/// Verify every record not already settled by an earlier run.
///
/// Resumes from the checkpoint and results files, fans the queue out to
/// `settings.workers` sessions, snapshots periodically and once more at the end.
pub async fn run(
    settings: &Settings,
    factory: Arc<dyn RendererFactory>,
    records: Vec<BusinessRecord>,
    limit: Option<usize>,
) -> Result<RunSummary> {
    let paths = SnapshotPaths::new(&settings.results_path, &settings.checkpoint_path);
    let processed = paths.load_checkpoint()?;
    let results = paths.load_results()?;
    info!(
        "Resuming: {} already processed, {} verified",
        processed.len(),
        results.len()
    );

    let settled: HashSet<u64> = processed.iter().chain(results.keys()).copied().collect();
    let total = records.len();
    let mut remaining: Vec<BusinessRecord> = records
        .into_iter()
        .filter(|r| !settled.contains(&r.dot_number))
        .collect();
    info!("{} of {} records remaining", remaining.len(), total);
    if let Some(n) = limit {
        remaining.truncate(n);
    }

    let store = Arc::new(RunStore::new(results, processed));
    let queued = store.enqueue(remaining);
    if queued == 0 {
        info!("Nothing to verify");
        return Ok(summarize(&store.progress(), 0));
    }

    let workers = settings.workers.max(1).min(queued);
    info!("Verifying {} records with {} workers", queued, workers);

    let pb = ProgressBar::new(queued as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} (eta {eta})")?
            .progress_chars("=> "),
    );

    let snapshots = tokio::spawn(periodic_snapshot(
        store.clone(),
        paths.clone(),
        settings.snapshot_interval(),
        queued,
    ));

    let ctx = Arc::new(WorkerContext {
        store: store.clone(),
        orchestrator: Arc::new(Orchestrator::from_settings(settings)),
        factory,
        progress: pb.clone(),
        recycle_every: settings.recycle_every,
        blocked_cooldown: settings.pacing().blocked_cooldown,
    });

    let handles: Vec<_> = (0..workers)
        .map(|id| tokio::spawn(worker(id, ctx.clone())))
        .collect();
    for (id, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            error!(worker = id, "Worker task failed: {}", e);
        }
    }

    snapshots.abort();
    let _ = snapshots.await;

    paths.write(&store.snapshot())?;
    pb.finish_and_clear();

    let progress = store.progress();
    log_progress(&progress, queued);
    let summary = summarize(&progress, queued);
    info!(
        "COMPLETE: {} verified companies ({} new this run)",
        summary.verified_total, summary.verified_this_run
    );
    Ok(summary)
}

async fn worker(id: usize, ctx: Arc<WorkerContext>) {
    let mut session = SessionManager::new(id, ctx.factory.clone(), ctx.recycle_every);

    while let Some(item) = ctx.store.pop() {
        let record = &item.record;
        let dot = record.dot_number;
        info!(worker = id, "[{}] {} (DOT: {})", item.position, record.legal_name, dot);

        let attempt = AssertUnwindSafe(ctx.orchestrator.verify(&mut session, record))
            .catch_unwind()
            .await;
        let disposition = match attempt {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => {
                error!(worker = id, "Error verifying DOT {}: {:#}", dot, e);
                ctx.progress.inc(1);
                continue;
            }
            Err(panic) => {
                error!(worker = id, "Panic verifying DOT {}: {}", dot, panic_message(&*panic));
                // whatever the session was doing is suspect now
                session.close().await;
                ctx.progress.inc(1);
                continue;
            }
        };

        match &disposition {
            Disposition::BlockedRetry => {
                warn!(worker = id, "Engine blocked, re-queuing DOT {}", dot);
                ctx.store.requeue(item);
                pause(ctx.blocked_cooldown).await;
                continue;
            }
            Disposition::Found { url } => {
                info!(worker = id, "  towing verified: {}", url);
            }
            Disposition::AutoApproved => {
                info!(worker = id, "  auto-approved: name mentions towing");
            }
            Disposition::NotFound => {
                info!(worker = id, "  no qualifying page");
            }
            Disposition::Skipped => {
                warn!(worker = id, "  engine errors persisted, skipping DOT {}", dot);
            }
        }

        ctx.store.complete(record, &disposition);
        ctx.progress.inc(1);
        if disposition != Disposition::AutoApproved {
            session.record_completed().await;
        }
    }

    info!(worker = id, "Worker finished ({} engine recycles)", session.recycles());
    session.close().await;
}

async fn periodic_snapshot(store: Arc<RunStore>, paths: SnapshotPaths, every: Duration, queued: usize) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snapshot = store.snapshot();
        if snapshot.is_empty() {
            continue;
        }
        if let Err(e) = paths.write(&snapshot) {
            error!("Periodic snapshot failed: {:#}", e);
            continue;
        }
        log_progress(&store.progress(), queued);
    }
}

fn log_progress(progress: &Progress, queued: usize) {
    let stats = &progress.stats;
    let done = stats.searched + stats.auto_approved;
    let per_minute = stats.per_minute();
    let eta_min = if per_minute > 0.0 {
        queued.saturating_sub(done) as f64 / per_minute
    } else {
        0.0
    };
    info!(
        "--- STATS: {} processed, {} towing total, {} queued ---",
        progress.processed, progress.verified_total, progress.queued
    );
    info!(
        "    Searched: {} | Found: {} ({:.1}%) | Speed: {:.1}/min | ETA: {:.0} min",
        stats.searched,
        stats.found,
        stats.found_rate(),
        per_minute,
        eta_min
    );
}

fn summarize(progress: &Progress, queued: usize) -> RunSummary {
    let stats = &progress.stats;
    RunSummary {
        queued,
        processed_this_run: stats.searched + stats.auto_approved,
        verified_this_run: stats.found + stats.auto_approved,
        verified_total: progress.verified_total,
        not_found: stats.not_found,
        skipped: stats.skipped,
        requeued: stats.requeued,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::record::AUTO_APPROVED;
    use crate::snapshot::{load_checkpoint, load_results};
    use crate::testing::{FakePage, FakeSearch, FakeWeb};

    fn settings(dir: &Path, workers: usize) -> Settings {
        Settings {
            workers,
            record_delay_ms: [0, 0],
            search_settle_ms: [0, 0],
            page_settle_ms: 0,
            url_delay_ms: 0,
            engine_error_cooldown_secs: 0,
            blocked_cooldown_secs: 0,
            page_load_timeout_ms: 1_000,
            results_wait_timeout_ms: 1_000,
            results_path: dir.join("verified.csv"),
            checkpoint_path: dir.join("processed.csv"),
            ..Settings::default()
        }
    }

    fn rec(dot: u64, name: &str) -> BusinessRecord {
        let mut r = BusinessRecord::new(dot, name);
        r.city = Some("Hartford".into());
        r.state = Some("CT".into());
        r.postal_code = Some("06103".into());
        r
    }

    #[tokio::test]
    async fn full_run_processes_each_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let web = FakeWeb::new();
        web.on_search(
            "\"Acme Recovery\" Hartford CT",
            vec![FakeSearch::results(&["https://acmerecovery.com"])],
        );
        web.page(
            "https://acmerecovery.com",
            FakePage::text("Acme Recovery, Hartford CT 06103. 24/7 towing and roadside assistance."),
        );
        // refused once, then answers
        web.on_search(
            "\"Moody Motors\" Hartford CT",
            vec![FakeSearch::Blank, FakeSearch::results(&[])],
        );

        let records = vec![
            rec(1001, "Acme Towing LLC"),
            rec(1002, "Acme Recovery Co"),
            rec(1003, "Moody Motors Inc"),
            rec(1004, "Quiet Haulers"),
            rec(1005, "Elm Street Garage"),
        ];

        let s = settings(dir.path(), 3);
        let summary = run(&s, web.factory(), records, None).await.unwrap();

        assert_eq!(summary.queued, 5);
        assert_eq!(summary.processed_this_run, 5);
        assert_eq!(summary.verified_this_run, 2);
        assert_eq!(summary.requeued, 1);

        let processed = load_checkpoint(&s.checkpoint_path).unwrap();
        assert_eq!(processed, (1001..=1005).collect());

        let results = load_results(&s.results_path).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[&1001].website_url, AUTO_APPROVED);
        assert_eq!(results[&1002].website_url, "https://acmerecovery.com");

        assert_eq!(web.opens(), web.closes());
    }

    #[tokio::test]
    async fn resume_skips_settled_records() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), 2);
        std::fs::write(&s.checkpoint_path, "DOT_NUMBER\n2001\n").unwrap();

        let web = FakeWeb::new();
        let records = vec![rec(2001, "Old Haulers"), rec(2002, "New Haulers")];
        let summary = run(&s, web.factory(), records, None).await.unwrap();

        assert_eq!(summary.queued, 1);
        assert!(web.queries().iter().all(|q| !q.contains("Old Haulers")));
        assert_eq!(
            load_checkpoint(&s.checkpoint_path).unwrap(),
            [2001, 2002].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn limit_caps_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), 2);
        let web = FakeWeb::new();
        let records = (3001..3010).map(|d| rec(d, "Some Haulers")).collect();

        let summary = run(&s, web.factory(), records, Some(3)).await.unwrap();
        assert_eq!(summary.processed_this_run, 3);
        assert_eq!(load_checkpoint(&s.checkpoint_path).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn nothing_to_do_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), 2);
        let web = FakeWeb::new();
        let summary = run(&s, web.factory(), Vec::new(), None).await.unwrap();
        assert_eq!(summary.queued, 0);
        assert!(!s.checkpoint_path.exists());
        assert_eq!(web.opens(), 0);
    }

    #[tokio::test]
    async fn session_failures_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), 1);
        let web = FakeWeb::new();
        web.refuse_sessions();

        let records = vec![rec(1001, "Acme Towing"), rec(1002, "Acme Recovery Co")];
        let summary = run(&s, web.factory(), records, None).await.unwrap();

        assert_eq!(summary.processed_this_run, 1);
        assert_eq!(load_checkpoint(&s.checkpoint_path).unwrap(), [1001].into_iter().collect());
        let results = load_results(&s.results_path).unwrap();
        assert!(results.contains_key(&1001));
        assert!(!results.contains_key(&1002));
        assert_eq!(web.opens(), web.closes());
    }

    #[tokio::test]
    async fn panicking_record_is_left_for_the_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), 1);
        let web = FakeWeb::new();
        web.on_search("\"Acme Recovery\" Hartford CT", vec![FakeSearch::Crash]);

        let records = vec![
            rec(1001, "Acme Towing"),
            rec(1002, "Acme Recovery Co"),
            rec(1003, "Quiet Haulers"),
        ];
        let summary = run(&s, web.factory(), records, None).await.unwrap();

        assert_eq!(summary.processed_this_run, 2);
        assert_eq!(
            load_checkpoint(&s.checkpoint_path).unwrap(),
            [1001, 1003].into_iter().collect()
        );
        // the crashed session is closed and a fresh one serves the next record
        assert_eq!(web.opens(), 2);
        assert_eq!(web.opens(), web.closes());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}

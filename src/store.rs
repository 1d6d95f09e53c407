use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::orchestrator::Disposition;
use crate::record::{BusinessRecord, VerificationResult};

/// A record waiting for a worker, with its 1-based position in this run.
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    pub position: usize,
    pub record: BusinessRecord,
}

/// Counters for this run only.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started: Instant,
    pub searched: usize,
    pub found: usize,
    pub auto_approved: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub requeued: usize,
}

impl RunStats {
    fn new() -> Self {
        RunStats {
            started: Instant::now(),
            searched: 0,
            found: 0,
            auto_approved: 0,
            not_found: 0,
            skipped: 0,
            requeued: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Share of searched records that turned up a qualifying page, in percent.
    pub fn found_rate(&self) -> f64 {
        if self.searched == 0 {
            0.0
        } else {
            self.found as f64 / self.searched as f64 * 100.0
        }
    }

    /// Completed records per minute.
    pub fn per_minute(&self) -> f64 {
        let minutes = self.elapsed().as_secs_f64() / 60.0;
        let done = self.searched + self.auto_approved;
        if minutes > 0.0 {
            done as f64 / minutes
        } else {
            0.0
        }
    }
}

/// Point-in-time copy of everything that gets persisted.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Sorted by DOT number.
    pub results: Vec<VerificationResult>,
    /// Sorted.
    pub processed: Vec<u64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.processed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Progress {
    pub processed: usize,
    pub verified_total: usize,
    pub queued: usize,
    pub stats: RunStats,
}

struct RunState {
    queue: VecDeque<QueuedRecord>,
    results: HashMap<u64, VerificationResult>,
    processed: HashSet<u64>,
    stats: RunStats,
}

/// Queue, results and processed set shared by the workers and the snapshot task.
///
/// One lock guards all of it, so a snapshot never sees a record in `processed`
/// without its result. The lock is never held across an await.
pub struct RunStore {
    state: Mutex<RunState>,
}

impl RunStore {
    /// Start from what earlier runs persisted.
    pub fn new(results: HashMap<u64, VerificationResult>, processed: HashSet<u64>) -> Self {
        RunStore {
            state: Mutex::new(RunState {
                queue: VecDeque::new(),
                results,
                processed,
                stats: RunStats::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append records in order; returns how many are now queued.
    pub fn enqueue(&self, records: impl IntoIterator<Item = BusinessRecord>) -> usize {
        let mut state = self.lock();
        let start = state.queue.len();
        for (i, record) in records.into_iter().enumerate() {
            state.queue.push_back(QueuedRecord {
                position: start + i + 1,
                record,
            });
        }
        state.queue.len()
    }

    pub fn pop(&self) -> Option<QueuedRecord> {
        self.lock().queue.pop_front()
    }

    /// Put a record back at the tail for a later attempt.
    pub fn requeue(&self, item: QueuedRecord) {
        let mut state = self.lock();
        state.stats.requeued += 1;
        state.queue.push_back(item);
    }

    /// Record a terminal disposition. Returns false if the record was already
    /// processed or the disposition is not terminal.
    pub fn complete(&self, record: &BusinessRecord, disposition: &Disposition) -> bool {
        let dot = record.dot_number;
        let mut state = self.lock();

        if matches!(disposition, Disposition::BlockedRetry) {
            warn!("DOT {} is not finished, requeue it instead", dot);
            return false;
        }
        if !state.processed.insert(dot) {
            warn!("DOT {} was already processed", dot);
            return false;
        }

        match disposition {
            Disposition::Found { url } => {
                state.stats.searched += 1;
                state.stats.found += 1;
                state
                    .results
                    .insert(dot, VerificationResult::found(record.clone(), url));
            }
            Disposition::AutoApproved => {
                state.stats.auto_approved += 1;
                state
                    .results
                    .insert(dot, VerificationResult::auto_approved(record.clone()));
            }
            Disposition::NotFound => {
                state.stats.searched += 1;
                state.stats.not_found += 1;
            }
            Disposition::Skipped => {
                state.stats.searched += 1;
                state.stats.skipped += 1;
            }
            Disposition::BlockedRetry => {}
        }
        true
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        let mut results: Vec<VerificationResult> = state.results.values().cloned().collect();
        let mut processed: Vec<u64> = state.processed.iter().copied().collect();
        drop(state);

        results.sort_by_key(|r| r.dot_number());
        processed.sort_unstable();
        Snapshot { results, processed }
    }

    pub fn progress(&self) -> Progress {
        let state = self.lock();
        Progress {
            processed: state.processed.len(),
            verified_total: state.results.len(),
            queued: state.queue.len(),
            stats: state.stats.clone(),
        }
    }
}

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vetbot_core::store::{self, JsonlStore};
use vetbot_core::{RepoId, WorkItem};

use crate::error::{SampleError, SamplerError};

/// How processing of a visited item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitOutcome {
    Completed,
    Failed,
}

/// One row of the visited table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedRecord {
    #[serde(flatten)]
    pub repo: RepoId,
    pub outcome: VisitOutcome,
    pub visited_at: DateTime<Utc>,
}

/// Per-item errors decide whether their item still counts as visited.
///
/// The default is yes: an item that failed is not retried on restart.
/// Errors that say nothing about the item itself (a revoked credential,
/// say) should return `false` so the next run picks it up again.
pub trait ItemError: std::error::Error + 'static {
    fn marks_visited(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleSummary {
    pub completed: usize,
    pub failed: usize,
    /// `keep_going` returned false before the backlog ran out.
    pub interrupted: bool,
}

/// Yields unvisited backlog items in order and records visits durably.
///
/// Holds the visited table open for appending. Call [`close`](Self::close)
/// on the way out to fsync it; dropping the sampler still flushes, so every
/// exit path leaves the table consistent.
#[derive(Debug)]
pub struct RepositorySampler {
    pending: VecDeque<WorkItem>,
    visited: HashSet<RepoId>,
    store: JsonlStore,
    backlog_len: usize,
    /// When false, visits are tracked in memory only and the table is left
    /// untouched.
    record: bool,
}

impl RepositorySampler {
    /// Open the backlog and the visited table and compute what is left to do:
    /// the backlog minus every repository already visited, in backlog order.
    ///
    /// Repositories listed more than once in the backlog are yielded once.
    pub fn open(backlog_path: impl AsRef<Path>, visited_path: impl AsRef<Path>) -> Result<Self, SamplerError> {
        let backlog: Vec<WorkItem> =
            store::read_all(backlog_path.as_ref()).map_err(SamplerError::Backlog)?;
        let (store, records) =
            JsonlStore::open::<VisitedRecord>(visited_path).map_err(SamplerError::Visited)?;

        let visited: HashSet<RepoId> = records.into_iter().map(|r| r.repo).collect();
        let backlog_len = backlog.len();

        let mut seen = HashSet::with_capacity(backlog_len);
        let mut duplicates = 0usize;
        let pending: VecDeque<WorkItem> = backlog
            .into_iter()
            .filter(|item| {
                if !seen.insert(item.repo.clone()) {
                    duplicates += 1;
                    return false;
                }
                !visited.contains(&item.repo)
            })
            .collect();

        if duplicates > 0 {
            warn!(duplicates, "backlog lists some repositories more than once");
        }
        info!(
            backlog = backlog_len,
            visited = visited.len(),
            remaining = pending.len(),
            "sampler opened"
        );

        Ok(Self {
            pending,
            visited,
            store,
            backlog_len,
            record: true,
        })
    }

    /// Stop writing visits to the table, for runs that must leave no trace.
    /// Items are still yielded once each.
    pub fn without_recording(mut self) -> Self {
        self.record = false;
        self
    }

    /// The next unvisited item, or `None` once the backlog is exhausted.
    pub fn next(&mut self) -> Option<WorkItem> {
        self.pending.pop_front()
    }

    /// Record `repo` as visited. Durable once this returns; a second call for
    /// the same repository is a no-op.
    pub fn mark_visited(&mut self, repo: &RepoId, outcome: VisitOutcome) -> Result<(), SamplerError> {
        if self.visited.contains(repo) {
            debug!(%repo, "already visited");
            return Ok(());
        }
        if self.record {
            let record = VisitedRecord {
                repo: repo.clone(),
                outcome,
                visited_at: Utc::now(),
            };
            self.store.append(&record).map_err(SamplerError::Visited)?;
        } else {
            debug!(%repo, ?outcome, "visit not recorded");
        }
        self.visited.insert(repo.clone());
        Ok(())
    }

    /// Drive `f` over every remaining item, marking each visited after `f`
    /// returns. Stops at the first error.
    pub async fn sample<F, Fut, E>(&mut self, f: F) -> Result<SampleSummary, SampleError<E>>
    where
        F: FnMut(WorkItem) -> Fut,
        Fut: Future<Output = Result<VisitOutcome, E>>,
        E: ItemError,
    {
        self.sample_while(|| true, f).await
    }

    /// Like [`sample`](Self::sample), but checks `keep_going` before taking
    /// each item. An item is never taken and then abandoned.
    pub async fn sample_while<C, F, Fut, E>(
        &mut self,
        mut keep_going: C,
        mut f: F,
    ) -> Result<SampleSummary, SampleError<E>>
    where
        C: FnMut() -> bool,
        F: FnMut(WorkItem) -> Fut,
        Fut: Future<Output = Result<VisitOutcome, E>>,
        E: ItemError,
    {
        let mut summary = SampleSummary::default();

        loop {
            if !keep_going() {
                summary.interrupted = true;
                return Ok(summary);
            }
            let Some(item) = self.next() else {
                return Ok(summary);
            };
            let repo = item.repo.clone();

            match f(item).await {
                Ok(outcome) => {
                    self.mark_visited(&repo, outcome)?;
                    match outcome {
                        VisitOutcome::Completed => summary.completed += 1,
                        VisitOutcome::Failed => summary.failed += 1,
                    }
                }
                Err(e) => {
                    if e.marks_visited() {
                        self.mark_visited(&repo, VisitOutcome::Failed)?;
                        summary.failed += 1;
                    }
                    return Err(SampleError::Item { repo, source: e });
                }
            }
        }
    }

    /// Items still to be yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog_len
    }

    pub fn is_visited(&self, repo: &RepoId) -> bool {
        self.visited.contains(repo)
    }

    /// Flush and fsync the visited table.
    pub fn close(mut self) -> Result<(), SamplerError> {
        self.store.sync().map_err(SamplerError::Visited)?;
        info!(
            visited = self.visited.len(),
            remaining = self.pending.len(),
            "sampler closed"
        );
        Ok(())
    }
}

//! Archive of submitted runs.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::{RunReport, RunStatus};

/// Default number of finished runs an archive retains.
pub const DEFAULT_MAX_FINISHED: usize = 10_000;

/// What the archive knows about one run.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveEntry {
    /// The run was started and has not finished.
    Running {
        /// When the run was submitted.
        started_at: DateTime<Utc>,
    },
    /// The run finished with this report.
    Finished(Box<RunReport>),
}

impl ArchiveEntry {
    /// Returns the run status this entry represents.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Running { .. } => RunStatus::Running,
            Self::Finished(report) => report.status,
        }
    }
}

/// Thread-safe archive of runs keyed by run id.
///
/// Each run is registered once on submission and finished once on
/// termination; a retained finished entry is never overwritten.
///
/// Running entries are always kept. Finished entries are bounded: once more
/// than `max_finished` runs have finished, the oldest are evicted. Callers
/// can also [`take`](Self::take) a report or prune by age.
#[derive(Debug)]
pub struct RunArchive {
    runs: DashMap<Uuid, ArchiveEntry>,
    finished: Mutex<VecDeque<Uuid>>,
    max_finished: usize,
}

impl Default for RunArchive {
    fn default() -> Self {
        Self::with_max_finished(DEFAULT_MAX_FINISHED)
    }
}

impl RunArchive {
    /// Creates an empty archive retaining [`DEFAULT_MAX_FINISHED`] finished runs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty archive retaining at most `max_finished` finished
    /// runs, and never fewer than one.
    #[must_use]
    pub fn with_max_finished(max_finished: usize) -> Self {
        Self {
            runs: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            max_finished: max_finished.max(1),
        }
    }

    /// Returns how many finished runs are retained.
    #[must_use]
    pub const fn max_finished(&self) -> usize {
        self.max_finished
    }

    /// Registers a run as running.
    pub fn register(&self, run_id: Uuid) {
        self.runs.entry(run_id).or_insert(ArchiveEntry::Running {
            started_at: Utc::now(),
        });
    }

    /// Stores the terminal report of a run, evicting the oldest finished
    /// runs beyond the retention limit.
    ///
    /// Returns false if the run had already finished.
    pub fn finish(&self, report: RunReport) -> bool {
        let run_id = report.run_id;
        {
            let mut entry = self.runs.entry(run_id).or_insert(ArchiveEntry::Running {
                started_at: report.started_at,
            });
            if matches!(*entry, ArchiveEntry::Finished(_)) {
                return false;
            }
            *entry = ArchiveEntry::Finished(Box::new(report));
        }

        // Ids already taken or pruned stay queued until popped, so the queue
        // length bounds the retained finished entries from above.
        let mut finished = self.finished.lock();
        finished.push_back(run_id);
        while finished.len() > self.max_finished {
            let Some(oldest) = finished.pop_front() else {
                break;
            };
            if self.remove_finished(oldest).is_some() {
                tracing::debug!(run_id = %oldest, "Evicted finished run from archive");
            }
        }
        true
    }

    /// Removes and returns the terminal report of a finished run.
    ///
    /// Running entries are left in place.
    pub fn take(&self, run_id: Uuid) -> Option<RunReport> {
        self.remove_finished(run_id)
    }

    /// Drops finished runs that ended before `cutoff`.
    ///
    /// Returns the number of runs removed.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.runs.retain(|_, entry| match entry {
            ArchiveEntry::Finished(report) if report.finished_at < cutoff => {
                removed += 1;
                false
            }
            _ => true,
        });
        removed
    }

    fn remove_finished(&self, run_id: Uuid) -> Option<RunReport> {
        self.runs
            .remove_if(&run_id, |_, entry| matches!(entry, ArchiveEntry::Finished(_)))
            .and_then(|(_, entry)| match entry {
                ArchiveEntry::Finished(report) => Some(*report),
                ArchiveEntry::Running { .. } => None,
            })
    }

    /// Returns the terminal report of a run.
    #[must_use]
    pub fn report(&self, run_id: Uuid) -> Option<RunReport> {
        self.runs.get(&run_id).and_then(|entry| match entry.value() {
            ArchiveEntry::Finished(report) => Some(report.as_ref().clone()),
            ArchiveEntry::Running { .. } => None,
        })
    }

    /// Returns the status of a run.
    #[must_use]
    pub fn status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.runs.get(&run_id).map(|entry| entry.status())
    }

    /// Returns the ids of runs that have not finished.
    #[must_use]
    pub fn running(&self) -> Vec<Uuid> {
        self.runs
            .iter()
            .filter(|entry| matches!(entry.value(), ArchiveEntry::Running { .. }))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Returns the number of archived runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no runs are archived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(run_id: Uuid, status: RunStatus) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id,
            submission_id: "s1".to_string(),
            pipeline: "ingest".to_string(),
            status,
            failed_stage: None,
            failed_stage_index: None,
            reason: None,
            error_kind: None,
            record_key: None,
            history: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_register_then_finish() {
        let archive = RunArchive::new();
        let run_id = Uuid::new_v4();

        archive.register(run_id);
        assert_eq!(archive.status(run_id), Some(RunStatus::Running));
        assert!(archive.report(run_id).is_none());
        assert_eq!(archive.running(), vec![run_id]);

        assert!(archive.finish(report(run_id, RunStatus::Accepted)));
        assert_eq!(archive.status(run_id), Some(RunStatus::Accepted));
        assert!(archive.report(run_id).unwrap().is_accepted());
        assert!(archive.running().is_empty());
    }

    #[test]
    fn test_finish_is_write_once() {
        let archive = RunArchive::new();
        let run_id = Uuid::new_v4();

        assert!(archive.finish(report(run_id, RunStatus::Rejected)));
        assert!(!archive.finish(report(run_id, RunStatus::Accepted)));
        assert_eq!(archive.status(run_id), Some(RunStatus::Rejected));
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_take_removes_finished_only() {
        let archive = RunArchive::new();
        let finished = Uuid::new_v4();
        let running = Uuid::new_v4();

        archive.finish(report(finished, RunStatus::Accepted));
        archive.register(running);

        assert!(archive.take(running).is_none());
        assert_eq!(archive.status(running), Some(RunStatus::Running));

        let taken = archive.take(finished).unwrap();
        assert_eq!(taken.run_id, finished);
        assert!(archive.status(finished).is_none());
        assert!(archive.take(finished).is_none());
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_finished_runs_are_bounded() {
        let archive = RunArchive::with_max_finished(3);
        let running = Uuid::new_v4();
        archive.register(running);

        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(archive.finish(report(*id, RunStatus::Accepted)));
        }

        assert_eq!(archive.len(), 4);
        assert_eq!(archive.status(running), Some(RunStatus::Running));
        for id in &ids[..7] {
            assert!(archive.status(*id).is_none());
        }
        for id in &ids[7..] {
            assert_eq!(archive.status(*id), Some(RunStatus::Accepted));
        }
    }

    #[test]
    fn test_taken_runs_free_retention_slots() {
        let archive = RunArchive::with_max_finished(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        archive.finish(report(a, RunStatus::Accepted));
        archive.take(a);
        archive.finish(report(b, RunStatus::Accepted));
        archive.finish(report(c, RunStatus::Rejected));

        assert_eq!(archive.status(b), Some(RunStatus::Accepted));
        assert_eq!(archive.status(c), Some(RunStatus::Rejected));
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn test_prune_finished_before() {
        let archive = RunArchive::new();
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let running = Uuid::new_v4();

        let mut stale = report(old, RunStatus::Accepted);
        stale.finished_at = Utc::now() - chrono::Duration::hours(2);
        archive.finish(stale);
        archive.finish(report(fresh, RunStatus::Rejected));
        archive.register(running);

        let removed = archive.prune_finished_before(Utc::now() - chrono::Duration::hours(1));

        assert_eq!(removed, 1);
        assert!(archive.status(old).is_none());
        assert_eq!(archive.status(fresh), Some(RunStatus::Rejected));
        assert_eq!(archive.status(running), Some(RunStatus::Running));
    }

    #[test]
    fn test_unknown_run() {
        let archive = RunArchive::new();
        assert!(archive.is_empty());
        assert!(archive.status(Uuid::new_v4()).is_none());
    }
}

//! Sync coordinator state machine.
//!
//! One call to [`SyncCoordinator::handle`] takes a notification through
//!
//! ```text
//! Idle → LeaseAcquiring → Diffing → Applying → Done
//!              │             │          │
//!              └──────┬──────┴────┬─────┘
//!                  Requeued    Aborted
//! ```
//!
//! Lease contention, storage timeouts and source outages requeue the
//! notification with a delay until the configured cap, then abort.
//! Structural errors abort at once. The lease is released on every exit
//! after it was acquired.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{EngineResult, ErrorKind, SyncError};
use crate::processor::{ApplyOutcome, ChangeProcessor, ChangeSet};
use crate::relinker::RelinkSummary;
use crate::source::SnapshotSource;
use coursesync_model::{diff, ChangeOperation, CourseId, CourseTree};
use coursesync_storage::{Clock, CourseStore, Deadline, Lease, LeaseService, SystemClock};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Phases of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing started yet.
    Idle,
    /// Trying to take the course lease.
    LeaseAcquiring,
    /// Fetching the snapshot and computing the change set.
    Diffing,
    /// Applying the change set.
    Applying,
    /// Finished successfully.
    Done,
    /// Handed back for a later attempt.
    Requeued,
    /// Given up.
    Aborted,
}

impl SyncPhase {
    /// Returns true if the run holds the course exclusively in this phase.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Diffing | SyncPhase::Applying)
    }

    /// Returns true if the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Requeued | SyncPhase::Aborted)
    }
}

/// A request to bring a course up to date with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The course that changed.
    pub course_id: CourseId,
    /// When the notification arrived.
    pub received_at: SystemTime,
    /// Requeues so far because of lease contention.
    pub lease_attempts: u32,
    /// Requeues so far because of transient failures.
    pub failure_attempts: u32,
}

impl Notification {
    /// Creates a fresh notification for a course.
    pub fn new(course_id: impl Into<CourseId>) -> Self {
        Self {
            course_id: course_id.into(),
            received_at: SystemTime::now(),
            lease_attempts: 0,
            failure_attempts: 0,
        }
    }
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// A non-empty change set was committed.
    Applied,
    /// The persisted hierarchy already matched the source.
    NoOp,
    /// The notification should be handled again after `retry_after`.
    Requeued,
    /// The run gave up; the last synced hierarchy stays in place.
    Aborted,
}

/// Report of one sync run.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// The course.
    pub course_id: CourseId,
    /// How the run ended.
    pub status: SyncStatus,
    /// Operations committed.
    pub applied_op_count: usize,
    /// Whether the stored course title changed.
    pub title_updated: bool,
    /// Why the run did not apply, if it did not.
    pub error_detail: Option<String>,
    /// Class of the failure, if any.
    pub error_kind: Option<ErrorKind>,
    /// Delay before the requeued notification should be handled.
    pub retry_after: Option<Duration>,
    /// The notification to handle again, for requeued runs.
    pub requeue: Option<Notification>,
    /// The computed change set.
    pub operations: Vec<ChangeOperation>,
    /// Mastery records touched.
    pub relink: RelinkSummary,
    /// Phases passed through, in order.
    pub phases: Vec<SyncPhase>,
}

impl SyncResult {
    fn new(course_id: &CourseId) -> Self {
        Self {
            course_id: course_id.clone(),
            status: SyncStatus::NoOp,
            applied_op_count: 0,
            title_updated: false,
            error_detail: None,
            error_kind: None,
            retry_after: None,
            requeue: None,
            operations: Vec::new(),
            relink: RelinkSummary::default(),
            phases: vec![SyncPhase::Idle],
        }
    }

    /// Returns true if the run ended in [`SyncStatus::Applied`] or
    /// [`SyncStatus::NoOp`].
    pub fn is_success(&self) -> bool {
        matches!(self.status, SyncStatus::Applied | SyncStatus::NoOp)
    }

    /// Returns true if the run reached `phase`.
    pub fn reached(&self, phase: SyncPhase) -> bool {
        self.phases.contains(&phase)
    }

    fn enter(&mut self, phase: SyncPhase) {
        self.phases.push(phase);
    }
}

/// Counters across all runs of a coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    /// Runs that committed a change set.
    pub runs_applied: u64,
    /// Runs that found nothing to do.
    pub runs_noop: u64,
    /// Runs requeued.
    pub runs_requeued: u64,
    /// Runs aborted.
    pub runs_aborted: u64,
    /// Operations committed.
    pub ops_applied: u64,
    /// Mastery records retired.
    pub masteries_retired: u64,
    /// Last failure message.
    pub last_error: Option<String>,
}

/// Entry point for course update notifications.
///
/// The coordinator holds no per-course state: exclusivity comes from the
/// [`LeaseService`], so any number of coordinators (in this process or
/// others) may share a store and lease service.
pub struct SyncCoordinator<S, L, F> {
    config: SyncConfig,
    store: Arc<S>,
    leases: Arc<L>,
    source: Arc<F>,
    processor: ChangeProcessor,
    stats: RwLock<CoordinatorStats>,
}

impl<S, L, F> SyncCoordinator<S, L, F>
where
    S: CourseStore,
    L: LeaseService,
    F: SnapshotSource,
{
    /// Creates a coordinator.
    pub fn new(config: SyncConfig, store: Arc<S>, leases: Arc<L>, source: Arc<F>) -> Self {
        Self::with_clock(config, store, leases, source, Arc::new(SystemClock))
    }

    /// Creates a coordinator that stamps archived records using `clock`.
    pub fn with_clock(
        config: SyncConfig,
        store: Arc<S>,
        leases: Arc<L>,
        source: Arc<F>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let processor = ChangeProcessor::with_clock(config.removal_policy, clock);
        Self {
            config,
            store,
            leases,
            source,
            processor,
            stats: RwLock::new(CoordinatorStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Gets the current stats.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    /// Runs one sync attempt for a notification.
    pub fn handle(&self, notification: &Notification) -> SyncResult {
        let course = &notification.course_id;
        let mut result = SyncResult::new(course);

        result.enter(SyncPhase::LeaseAcquiring);
        let lease = match self.leases.try_acquire(course, self.config.lease_ttl) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                let err = SyncError::LeaseContention {
                    course_id: course.clone(),
                };
                self.settle_failure(notification, err, &mut result);
                return result;
            }
            Err(e) => {
                self.settle_failure(notification, e.into(), &mut result);
                return result;
            }
        };
        debug!(course_id = %course, holder = %lease.holder_token, "lease acquired");

        let outcome = self.run_under_lease(course, &mut result);
        self.release(&lease);

        match outcome {
            Ok(()) => self.settle_success(&mut result),
            Err(e) => self.settle_failure(notification, e, &mut result),
        }
        result
    }

    /// Handles a notification until it is applied, found current or
    /// aborted, sleeping between requeues.
    pub fn run_until_settled(&self, notification: Notification) -> SyncResult {
        let mut notification = notification;
        loop {
            let result = self.handle(&notification);
            match (&result.status, &result.requeue) {
                (SyncStatus::Requeued, Some(next)) => {
                    let delay = result.retry_after.unwrap_or_default();
                    debug!(course_id = %next.course_id, ?delay, "waiting before retry");
                    std::thread::sleep(delay);
                    notification = next.clone();
                }
                _ => return result,
            }
        }
    }

    fn run_under_lease(&self, course: &CourseId, result: &mut SyncResult) -> EngineResult<()> {
        let deadline = Deadline::after(self.config.storage_timeout).at_most(self.config.lease_ttl);

        result.enter(SyncPhase::Diffing);
        let outline = self.source.fetch(course)?;
        let new = CourseTree::build(outline.nodes)?;
        let base_revision = self.store.revision(course)?;
        let old = self.store.load_tree(course, deadline)?;
        let ops = diff(&old, &new)?;
        debug!(course_id = %course, op_count = ops.len(), "change set computed");

        let mut change = ChangeSet::new(ops).based_on(base_revision);
        if let Some(title) = outline.title {
            if self.store.load_title(course, deadline)?.as_ref() != Some(&title) {
                change = change.with_title(title);
            }
        }
        if change.is_empty() {
            return Ok(());
        }

        result.enter(SyncPhase::Applying);
        let outcome = self
            .processor
            .apply_change_set(&*self.store, course, &change, deadline);
        result.operations = change.operations;
        match outcome {
            ApplyOutcome::Applied {
                op_count,
                relink,
                title_updated,
            } => {
                result.applied_op_count = op_count;
                result.relink = relink;
                result.title_updated = title_updated;
                Ok(())
            }
            ApplyOutcome::Failed { reason, .. } => Err(reason.into()),
        }
    }

    fn release(&self, lease: &Lease) {
        match self.leases.release(lease) {
            Ok(true) => debug!(course_id = %lease.course_id, "lease released"),
            Ok(false) => warn!(
                course_id = %lease.course_id,
                "lease expired and was taken over before release"
            ),
            Err(e) => warn!(course_id = %lease.course_id, error = %e, "lease release failed"),
        }
    }

    fn settle_success(&self, result: &mut SyncResult) {
        result.enter(SyncPhase::Done);
        let mut stats = self.stats.write();
        if result.applied_op_count > 0 || result.title_updated {
            result.status = SyncStatus::Applied;
            stats.runs_applied += 1;
            stats.ops_applied += result.applied_op_count as u64;
            stats.masteries_retired += result.relink.retired as u64;
            info!(
                course_id = %result.course_id,
                op_count = result.applied_op_count,
                title_updated = result.title_updated,
                "course synced"
            );
        } else {
            result.status = SyncStatus::NoOp;
            stats.runs_noop += 1;
            info!(course_id = %result.course_id, "course already current");
        }
    }

    fn settle_failure(&self, notification: &Notification, err: SyncError, result: &mut SyncResult) {
        let course = &notification.course_id;
        result.error_kind = Some(err.kind());
        result.applied_op_count = 0;
        result.title_updated = false;

        let (policy, attempts_made, next) = match err.kind() {
            ErrorKind::LeaseContention => {
                let attempts = notification.lease_attempts + 1;
                let next = Notification {
                    lease_attempts: attempts,
                    ..notification.clone()
                };
                (&self.config.lease_retry, attempts, next)
            }
            _ if err.is_retryable() => {
                let attempts = notification.failure_attempts + 1;
                let next = Notification {
                    failure_attempts: attempts,
                    ..notification.clone()
                };
                (&self.config.retry, attempts, next)
            }
            _ => {
                error!(course_id = %course, error = %err, "sync aborted");
                self.abort(result, err.to_string());
                return;
            }
        };

        if !policy.allows_another(attempts_made) {
            let err = SyncError::RetriesExhausted {
                course_id: course.clone(),
                attempts: attempts_made,
                last: err.to_string(),
            };
            error!(course_id = %course, error = %err, "sync aborted");
            result.error_kind = Some(err.kind());
            self.abort(result, err.to_string());
            return;
        }

        self.requeue(result, policy, attempts_made, next, err);
    }

    fn requeue(
        &self,
        result: &mut SyncResult,
        policy: &RetryConfig,
        attempts_made: u32,
        next: Notification,
        err: SyncError,
    ) {
        let delay = policy.delay_for_attempt(attempts_made);
        warn!(
            course_id = %result.course_id,
            attempt = attempts_made,
            ?delay,
            error = %err,
            "sync requeued"
        );
        result.enter(SyncPhase::Requeued);
        result.status = SyncStatus::Requeued;
        result.retry_after = Some(delay);
        result.requeue = Some(next);
        result.error_detail = Some(err.to_string());

        let mut stats = self.stats.write();
        stats.runs_requeued += 1;
        stats.last_error = Some(err.to_string());
    }

    fn abort(&self, result: &mut SyncResult, detail: String) {
        result.enter(SyncPhase::Aborted);
        result.status = SyncStatus::Aborted;
        result.error_detail = Some(detail.clone());

        let mut stats = self.stats.write();
        stats.runs_aborted += 1;
        stats.last_error = Some(detail);
    }
}

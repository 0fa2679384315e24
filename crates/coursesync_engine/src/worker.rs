//! A pool of async workers feeding notifications to a coordinator.
//!
//! Workers share one queue. Each run executes on the blocking thread pool,
//! since stores and lease services do synchronous I/O. A requeued
//! notification is put back on the queue after its delay by a timer task,
//! so a waiting notification never occupies a worker.

use crate::coordinator::{Notification, SyncCoordinator, SyncResult, SyncStatus};
use crate::error::{EngineResult, SyncError};
use crate::source::SnapshotSource;
use coursesync_storage::{CourseStore, LeaseService};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Runs notifications through a shared coordinator on tokio tasks.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Notification>,
    reports: mpsc::UnboundedReceiver<SyncResult>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` workers (at least one).
    pub fn spawn<S, L, F>(coordinator: Arc<SyncCoordinator<S, L, F>>, workers: usize) -> Self
    where
        S: CourseStore + 'static,
        L: LeaseService + 'static,
        F: SnapshotSource + 'static,
    {
        let (queue, receiver) = mpsc::unbounded_channel::<Notification>();
        let (report_tx, reports) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&coordinator),
                    Arc::clone(&receiver),
                    queue.downgrade(),
                    report_tx.clone(),
                ))
            })
            .collect();

        Self {
            queue,
            reports,
            workers,
        }
    }

    /// Queues a notification.
    pub fn submit(&self, notification: Notification) -> EngineResult<()> {
        self.queue
            .send(notification)
            .map_err(|_| SyncError::PoolClosed)
    }

    /// Waits for the next run report.
    ///
    /// Returns `None` once the pool has shut down and every report has been
    /// taken.
    pub async fn next_report(&mut self) -> Option<SyncResult> {
        self.reports.recv().await
    }

    /// Waits for reports until `count` notifications have settled, returning
    /// the settled reports in completion order.
    pub async fn settle(&mut self, count: usize) -> Vec<SyncResult> {
        let mut settled = Vec::with_capacity(count);
        while settled.len() < count {
            match self.next_report().await {
                Some(report) if report.status == SyncStatus::Requeued => {}
                Some(report) => settled.push(report),
                None => break,
            }
        }
        settled
    }

    /// Stops accepting notifications and waits for the workers to drain the
    /// queue, including requeues already scheduled.
    pub async fn shutdown(self) {
        let Self {
            queue,
            reports,
            workers,
        } = self;
        drop(queue);
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "worker panicked");
            }
        }
        drop(reports);
    }
}

async fn run_worker<S, L, F>(
    worker: usize,
    coordinator: Arc<SyncCoordinator<S, L, F>>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Notification>>>,
    queue: mpsc::WeakUnboundedSender<Notification>,
    reports: mpsc::UnboundedSender<SyncResult>,
) where
    S: CourseStore + 'static,
    L: LeaseService + 'static,
    F: SnapshotSource + 'static,
{
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(notification) = next else {
            break;
        };
        debug!(worker, course_id = %notification.course_id, "notification picked up");

        let run = Arc::clone(&coordinator);
        let result = match tokio::task::spawn_blocking(move || run.handle(&notification)).await {
            Ok(result) => result,
            Err(e) => {
                error!(worker, error = %e, "sync run panicked");
                continue;
            }
        };

        if let (SyncStatus::Requeued, Some(next)) = (result.status, result.requeue.clone()) {
            schedule_requeue(&queue, next, result.retry_after.unwrap_or_default());
        }

        if reports.send(result).is_err() {
            debug!(worker, "report receiver dropped");
        }
    }
    debug!(worker, "worker stopped");
}

fn schedule_requeue(
    queue: &mpsc::WeakUnboundedSender<Notification>,
    notification: Notification,
    delay: std::time::Duration,
) {
    let Some(queue) = queue.upgrade() else {
        warn!(course_id = %notification.course_id, "pool shut down, requeue dropped");
        return;
    };
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if queue.send(notification).is_err() {
            warn!("queue closed before requeue");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::source::MemorySource;
    use coursesync_model::{CourseId, TreeNode};
    use coursesync_storage::{MemoryCourseStore, MemoryLeaseService};
    use std::time::Duration;

    fn coordinator(
        source: Arc<MemorySource>,
    ) -> Arc<SyncCoordinator<MemoryCourseStore, MemoryLeaseService, MemorySource>> {
        let config = SyncConfig::new()
            .with_retry(RetryConfig::fixed(5, Duration::from_millis(5)))
            .with_lease_retry(RetryConfig::fixed(50, Duration::from_millis(5)));
        Arc::new(SyncCoordinator::new(
            config,
            Arc::new(MemoryCourseStore::new()),
            Arc::new(MemoryLeaseService::new()),
            source,
        ))
    }

    #[tokio::test]
    async fn pool_syncs_many_courses() {
        let source = Arc::new(MemorySource::new());
        for i in 0..4 {
            source.publish(
                &CourseId::new(format!("course-{i}")),
                vec![
                    TreeNode::category("C1", "Maths", 0),
                    TreeNode::topic("T1", "C1", "Algebra", 0),
                ],
            );
        }
        let mut pool = WorkerPool::spawn(coordinator(Arc::clone(&source)), 3);
        for i in 0..4 {
            pool.submit(Notification::new(format!("course-{i}").as_str()))
                .unwrap();
        }

        let settled = pool.settle(4).await;
        assert_eq!(settled.len(), 4);
        assert!(settled.iter().all(|r| r.status == SyncStatus::Applied));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn requeued_notifications_come_back() {
        let source = Arc::new(MemorySource::new());
        let course = CourseId::new("math-101");
        source.publish(&course, vec![TreeNode::category("C1", "Maths", 0)]);
        source.fail_next(&course, 2);

        let mut pool = WorkerPool::spawn(coordinator(Arc::clone(&source)), 2);
        pool.submit(Notification::new(course.clone())).unwrap();

        let settled = pool.settle(1).await;
        assert_eq!(settled[0].status, SyncStatus::Applied);
        assert_eq!(settled[0].applied_op_count, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn duplicates_settle_once_applied() {
        let source = Arc::new(MemorySource::new());
        let course = CourseId::new("math-101");
        source.publish(
            &course,
            vec![
                TreeNode::category("C1", "Maths", 0),
                TreeNode::topic("T1", "C1", "Algebra", 0),
            ],
        );
        let coordinator = coordinator(Arc::clone(&source));
        let mut pool = WorkerPool::spawn(Arc::clone(&coordinator), 4);
        for _ in 0..4 {
            pool.submit(Notification::new(course.clone())).unwrap();
        }

        let settled = pool.settle(4).await;
        let applied = settled
            .iter()
            .filter(|r| r.status == SyncStatus::Applied)
            .count();
        let noop = settled
            .iter()
            .filter(|r| r.status == SyncStatus::NoOp)
            .count();
        assert_eq!((applied, noop), (1, 3));
        assert_eq!(coordinator.stats().ops_applied, 2);
        pool.shutdown().await;
    }
}

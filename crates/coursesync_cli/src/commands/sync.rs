//! Sync command implementation.

use coursesync_engine::{
    DirectorySource, Notification, RetryConfig, SyncConfig, SyncCoordinator, SyncResult,
    SyncStatus, WorkerPool,
};
use coursesync_model::RemovalPolicy;
use coursesync_storage::{FileCourseStore, FileLeaseService};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Number of workers.
    pub workers: usize,
    /// What happens to progress on removed topics.
    pub removal_policy: RemovalPolicy,
    /// Lease time-to-live in seconds.
    pub lease_ttl: u64,
    /// Storage timeout in seconds.
    pub storage_timeout: u64,
    /// Attempts per notification.
    pub max_attempts: u32,
}

impl SyncOptions {
    /// Builds the engine configuration.
    pub fn config(&self) -> SyncConfig {
        SyncConfig::new()
            .with_lease_ttl(Duration::from_secs(self.lease_ttl))
            .with_storage_timeout(Duration::from_secs(self.storage_timeout))
            .with_retry(RetryConfig::new(self.max_attempts))
            .with_removal_policy(self.removal_policy)
    }
}

/// Runs the sync command, returning the number of courses that failed.
pub fn run(
    state: &Path,
    outlines: &Path,
    courses: &[String],
    options: &SyncOptions,
) -> Result<usize, Box<dyn std::error::Error>> {
    let coordinator = Arc::new(SyncCoordinator::new(
        options.config(),
        Arc::new(FileCourseStore::open(state)?),
        Arc::new(FileLeaseService::open(state)?),
        Arc::new(DirectorySource::new(outlines)),
    ));

    let runtime = tokio::runtime::Runtime::new()?;
    let reports = runtime.block_on(async {
        let mut pool = WorkerPool::spawn(coordinator, options.workers);
        for course in courses {
            pool.submit(Notification::new(course.as_str()))?;
        }
        let reports = pool.settle(courses.len()).await;
        pool.shutdown().await;
        Ok::<_, Box<dyn std::error::Error>>(reports)
    })?;

    for report in &reports {
        print_report(report);
    }
    Ok(reports.iter().filter(|r| !r.is_success()).count())
}

fn print_report(report: &SyncResult) {
    match report.status {
        SyncStatus::Applied => println!(
            "{}: applied {} operation(s), {} record(s) kept, {} retired",
            report.course_id,
            report.applied_op_count,
            report.relink.preserved + report.relink.kept_on_add,
            report.relink.retired
        ),
        SyncStatus::NoOp => println!("{}: already current", report.course_id),
        SyncStatus::Requeued | SyncStatus::Aborted => println!(
            "{}: failed: {}",
            report.course_id,
            report.error_detail.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursesync_model::CourseId;
    use coursesync_storage::{CourseStore, Deadline};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn options() -> SyncOptions {
        SyncOptions {
            workers: 2,
            removal_policy: RemovalPolicy::Archive,
            lease_ttl: 60,
            storage_timeout: 5,
            max_attempts: 1,
        }
    }

    #[test]
    fn syncs_outlines_into_state() {
        let dir = tempdir().unwrap();
        let outlines = dir.path().join("outlines");
        let state = dir.path().join("state");
        fs::create_dir_all(&outlines).unwrap();
        let doc = json!({
            "course_structure": {"child_info": {"children": [
                {"id": "C1", "display_name": "Mathematics"}
            ]}}
        });
        fs::write(outlines.join("math-101.json"), doc.to_string()).unwrap();

        let courses = vec!["math-101".to_string(), "math-102".to_string()];
        let failed = run(&state, &outlines, &courses, &options()).unwrap();
        // math-102 has no outline and is not retried.
        assert_eq!(failed, 1);

        let store = FileCourseStore::open(&state).unwrap();
        let deadline = Deadline::after(Duration::from_secs(5));
        let tree = store
            .load_tree(&CourseId::new("math-101"), deadline)
            .unwrap();
        assert_eq!(tree.len(), 1);
    }
}

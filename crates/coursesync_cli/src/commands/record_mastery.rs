//! Record-mastery command implementation.

use coursesync_model::{CourseId, ExternalId, MasteryStatus, TopicMastery};
use coursesync_storage::{CourseStore, FileCourseStore};
use std::path::Path;
use tracing::info;

/// Runs the record-mastery command.
///
/// The topic must exist in the course's synced hierarchy.
pub fn run(
    path: &Path,
    course: &str,
    user: &str,
    topic: &str,
    status: MasteryStatus,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileCourseStore::open(path)?;
    let course = CourseId::new(course);

    let tree = store.read_record(&course)?.tree()?;
    if !tree.contains(&ExternalId::new(topic)) {
        return Err(format!("topic {topic} is not part of course {course}").into());
    }

    store.record_mastery(&course, TopicMastery::new(user, topic, status))?;
    info!(course_id = %course, user, topic, %status, "mastery recorded");
    println!("Recorded {status} for {user} on {topic}");
    Ok(())
}

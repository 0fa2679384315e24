//! Source system adapters.
//!
//! A [`SnapshotSource`] returns the current outline of a course from the
//! source of truth. Any failure to reach or read the source is transient;
//! a snapshot that cannot be decoded is structural.

use coursesync_model::outline::outline_from_value;
use coursesync_model::{CourseId, CourseOutline, OutlineOptions, StructuralError, TreeNode};
use coursesync_storage::file_stem;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from a snapshot source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source has no outline for the course.
    #[error("course {0} not found at source")]
    NotFound(CourseId),

    /// The source could not be reached.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Reading the snapshot failed.
    #[error("I/O error reading snapshot: {0}")]
    Io(#[from] io::Error),

    /// The snapshot was read but cannot be decoded.
    #[error(transparent)]
    Malformed(#[from] StructuralError),
}

/// Provides course outline snapshots.
pub trait SnapshotSource: Send + Sync {
    /// Fetches the current outline of a course.
    fn fetch(&self, course: &CourseId) -> Result<CourseOutline, FetchError>;
}

/// An in-memory source for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySource {
    outlines: RwLock<HashMap<CourseId, CourseOutline>>,
    failures: RwLock<HashMap<CourseId, u32>>,
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new untitled outline for a course.
    pub fn publish(&self, course: &CourseId, nodes: Vec<TreeNode>) {
        self.publish_outline(course, CourseOutline { title: None, nodes });
    }

    /// Publishes a decoded outline for a course.
    pub fn publish_outline(&self, course: &CourseId, outline: CourseOutline) {
        self.outlines.write().insert(course.clone(), outline);
    }

    /// Makes the next `count` fetches of a course fail as unavailable.
    pub fn fail_next(&self, course: &CourseId, count: u32) {
        self.failures.write().insert(course.clone(), count);
    }
}

impl SnapshotSource for MemorySource {
    fn fetch(&self, course: &CourseId) -> Result<CourseOutline, FetchError> {
        if let Some(remaining) = self.failures.write().get_mut(course) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::Unavailable(format!(
                    "injected outage for course {course}"
                )));
            }
        }
        self.outlines
            .read()
            .get(course)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(course.clone()))
    }
}

/// Reads outline documents from `<dir>/<stem>.json`, where the stem is the
/// course ID encoded by [`file_stem`].
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    options: OutlineOptions,
}

impl DirectorySource {
    /// Creates a source reading from `dir`.
    pub fn new(dir: &Path) -> Self {
        Self::with_options(dir, OutlineOptions::default())
    }

    /// Creates a source with custom decoding options.
    pub fn with_options(dir: &Path, options: OutlineOptions) -> Self {
        Self {
            dir: dir.to_path_buf(),
            options,
        }
    }

    /// Returns the path of a course's outline document.
    pub fn outline_path(&self, course: &CourseId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(course)))
    }
}

impl SnapshotSource for DirectorySource {
    fn fetch(&self, course: &CourseId) -> Result<CourseOutline, FetchError> {
        let path = self.outline_path(course);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(course.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| StructuralError::MalformedOutline(format!("{}: {e}", path.display())))?;
        let outline = outline_from_value(value, &self.options)?;
        debug!(course_id = %course, nodes = outline.nodes.len(), "outline read");
        Ok(outline)
    }
}

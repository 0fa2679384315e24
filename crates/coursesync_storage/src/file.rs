//! File-backed course store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//! └─ courses/
//!    ├─ <course>.cbor       # Committed course record
//!    ├─ <course>.cbor.tmp   # Record being committed
//!    └─ <course>.lock       # Advisory writer lock
//! ```
//!
//! A commit writes the whole record to the temporary file, syncs it and
//! renames it over the committed file, so readers see either the previous
//! or the new record. Writers across processes are serialized by the lock
//! file.

use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};
use crate::record::{CourseRecord, RecordTransaction};
use crate::store::{CourseStore, CourseTransaction};
use coursesync_model::{ArchivedMastery, CourseId, CourseTree, ExternalId, TopicMastery};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const COURSES_DIR: &str = "courses";
const LOCK_POLL: Duration = Duration::from_millis(5);
const LEDGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Encodes a course ID as a file name stem.
///
/// Characters outside `[A-Za-z0-9._-]` are percent-encoded, so source IDs
/// like `course-v1:Org+MATH+2024` map to distinct, portable names. The stem
/// never contains a path separator and never starts with a dot.
#[must_use]
pub fn file_stem(course: &CourseId) -> String {
    let mut stem = String::with_capacity(course.as_str().len());
    for byte in course.as_str().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => stem.push(byte as char),
            // A leading dot would hide the file.
            b'.' if !stem.is_empty() => stem.push('.'),
            _ => stem.push_str(&format!("%{byte:02X}")),
        }
    }
    stem
}

/// Takes an exclusive advisory lock on `path`, polling until `deadline`.
pub(crate) fn lock_until(path: &Path, deadline: &Deadline) -> StoreResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    loop {
        if file.try_lock_exclusive().is_ok() {
            return Ok(file);
        }
        if deadline.is_expired() {
            return Err(StoreError::Contention(format!(
                "lock {} is held",
                path.display()
            )));
        }
        std::thread::sleep(LOCK_POLL.min(deadline.remaining()));
    }
}

/// Fsyncs a directory so renames inside it are durable.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> StoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> StoreResult<()> {
    Ok(())
}

/// A course store keeping one CBOR record file per course.
///
/// Multiple processes may share a root directory.
///
/// # Example
///
/// ```no_run
/// use coursesync_storage::{CourseStore, Deadline, FileCourseStore};
/// use coursesync_model::CourseId;
/// use std::path::Path;
/// use std::time::Duration;
///
/// let store = FileCourseStore::open(Path::new("state")).unwrap();
/// let tree = store
///     .load_tree(&CourseId::new("math-101"), Deadline::after(Duration::from_secs(5)))
///     .unwrap();
/// println!("{} nodes", tree.len());
/// ```
#[derive(Debug, Clone)]
pub struct FileCourseStore {
    root: PathBuf,
}

impl FileCourseStore {
    /// Opens a store rooted at `root`, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root.join(COURSES_DIR))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of a course's committed record.
    #[must_use]
    pub fn record_path(&self, course: &CourseId) -> PathBuf {
        self.courses_dir().join(format!("{}.cbor", file_stem(course)))
    }

    /// Lists the courses with a committed record, by file stem.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn course_files(&self) -> StoreResult<Vec<String>> {
        let mut stems = Vec::new();
        for entry in fs::read_dir(self.courses_dir())? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "cbor") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    stems.push(stem.to_string());
                }
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// Reads a course's committed record; a missing file is an empty course.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the file cannot be decoded.
    pub fn read_record(&self, course: &CourseId) -> StoreResult<CourseRecord> {
        let path = self.record_path(course);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CourseRecord::default())
            }
            Err(e) => return Err(e.into()),
        };
        ciborium::from_reader(BufReader::new(file))
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))
    }

    fn courses_dir(&self) -> PathBuf {
        self.root.join(COURSES_DIR)
    }

    fn lock_path(&self, course: &CourseId) -> PathBuf {
        self.courses_dir().join(format!("{}.lock", file_stem(course)))
    }

    fn write_record(&self, course: &CourseId, record: &CourseRecord) -> StoreResult<()> {
        let mut data = Vec::new();
        ciborium::into_writer(record, &mut data)
            .map_err(|e| StoreError::Corrupted(format!("encode course {course}: {e}")))?;

        let path = self.record_path(course);
        let temp_path = path.with_extension("cbor.tmp");

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        sync_directory(&self.courses_dir())
    }

    fn commit<T>(
        &self,
        course: &CourseId,
        deadline: Deadline,
        f: impl FnOnce(&mut RecordTransaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _lock = lock_until(&self.lock_path(course), &deadline)?;

        let working = self.read_record(course)?;
        let mut txn = RecordTransaction::new(course, working, deadline);

        let value = f(&mut txn)?;
        let record = txn.into_record()?;
        self.write_record(course, &record)?;

        debug!(course_id = %course, revision = record.revision, "file transaction committed");
        Ok(value)
    }
}

impl CourseStore for FileCourseStore {
    fn load_tree(&self, course: &CourseId, deadline: Deadline) -> StoreResult<CourseTree> {
        let record = self.read_record(course)?;
        deadline.check()?;
        record.tree()
    }

    fn load_title(&self, course: &CourseId, deadline: Deadline) -> StoreResult<Option<String>> {
        let record = self.read_record(course)?;
        deadline.check()?;
        Ok(record.title)
    }

    fn transaction<T, F>(&self, course: &CourseId, deadline: Deadline, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn CourseTransaction) -> StoreResult<T>,
    {
        self.commit(course, deadline, |txn| f(txn))
    }

    fn record_mastery(&self, course: &CourseId, record: TopicMastery) -> StoreResult<()> {
        self.commit(course, Deadline::after(LEDGER_TIMEOUT), |txn| {
            txn.upsert_mastery(record)
        })
    }

    fn masteries_for_topic(
        &self,
        course: &CourseId,
        topic: &ExternalId,
    ) -> StoreResult<Vec<TopicMastery>> {
        Ok(self.read_record(course)?.masteries_for_topic(topic))
    }

    fn archived_masteries(&self, course: &CourseId) -> StoreResult<Vec<ArchivedMastery>> {
        Ok(self.read_record(course)?.archived)
    }

    fn revision(&self, course: &CourseId) -> StoreResult<u64> {
        Ok(self.read_record(course)?.revision)
    }
}

//! Per-course leases.
//!
//! A lease gives one sync run exclusive use of a course until it is
//! released or its TTL passes. Acquisition never waits: a held lease is
//! reported as `None` and the caller decides what to do.

use crate::clock::{Clock, SystemClock};
use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};
use crate::file::{file_stem, lock_until};
use coursesync_model::CourseId;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

const LEASES_DIR: &str = "leases";
const RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

/// Exclusive, time-limited use of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The leased course.
    pub course_id: CourseId,
    /// Identifies the run holding the lease.
    pub holder_token: Uuid,
    /// The lease is void from this instant.
    pub expires_at: SystemTime,
}

impl Lease {
    fn grant(course_id: &CourseId, now: SystemTime, ttl: Duration) -> Self {
        Self {
            course_id: course_id.clone(),
            holder_token: Uuid::new_v4(),
            expires_at: now + ttl,
        }
    }

    /// Returns true if the lease is void at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Time left at `now`; zero once expired.
    #[must_use]
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.expires_at.duration_since(now).unwrap_or(Duration::ZERO)
    }
}

/// Grants and releases course leases.
pub trait LeaseService: Send + Sync {
    /// Acquires the course's lease for `ttl` without waiting.
    ///
    /// Returns `None` if an unexpired lease is held by someone else.
    fn try_acquire(&self, course: &CourseId, ttl: Duration) -> StoreResult<Option<Lease>>;

    /// Releases a lease.
    ///
    /// Returns false if the lease had already expired and been taken over,
    /// in which case nothing is changed.
    fn release(&self, lease: &Lease) -> StoreResult<bool>;
}

/// In-process lease service.
#[derive(Debug, Default)]
pub struct MemoryLeaseService<C: Clock = SystemClock> {
    clock: C,
    leases: Mutex<HashMap<CourseId, Lease>>,
}

impl MemoryLeaseService {
    /// Creates a service using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> MemoryLeaseService<C> {
    /// Creates a service reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the current lease of a course, expired or not.
    #[must_use]
    pub fn current(&self, course: &CourseId) -> Option<Lease> {
        self.leases.lock().get(course).cloned()
    }
}

impl<C: Clock> LeaseService for MemoryLeaseService<C> {
    fn try_acquire(&self, course: &CourseId, ttl: Duration) -> StoreResult<Option<Lease>> {
        let now = self.clock.now();
        let mut leases = self.leases.lock();
        if let Some(held) = leases.get(course) {
            if !held.is_expired_at(now) {
                debug!(course_id = %course, "lease held by another run");
                return Ok(None);
            }
            warn!(course_id = %course, holder = %held.holder_token, "taking over expired lease");
        }
        let lease = Lease::grant(course, now, ttl);
        leases.insert(course.clone(), lease.clone());
        debug!(course_id = %course, holder = %lease.holder_token, "lease acquired");
        Ok(Some(lease))
    }

    fn release(&self, lease: &Lease) -> StoreResult<bool> {
        let mut leases = self.leases.lock();
        match leases.get(&lease.course_id) {
            Some(held) if held.holder_token == lease.holder_token => {
                leases.remove(&lease.course_id);
                debug!(course_id = %lease.course_id, "lease released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Lease service backed by files, for runs in separate processes.
///
/// Each course has a `leases/<course>.lease` file holding the current
/// lease. The file is read and rewritten only under an exclusive advisory
/// lock on itself; if another process is mid-update the course is treated
/// as leased.
#[derive(Debug)]
pub struct FileLeaseService<C: Clock = SystemClock> {
    dir: PathBuf,
    clock: C,
}

impl FileLeaseService {
    /// Opens a service under `root`, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StoreResult<Self> {
        Self::with_clock(root, SystemClock)
    }
}

impl<C: Clock> FileLeaseService<C> {
    /// Opens a service reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_clock(root: &Path, clock: C) -> StoreResult<Self> {
        let dir = root.join(LEASES_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, clock })
    }

    /// Returns the current lease of a course, expired or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease file cannot be read or decoded.
    pub fn current(&self, course: &CourseId) -> StoreResult<Option<Lease>> {
        match File::open(self.lease_path(course)) {
            Ok(mut file) => read_lease(&mut file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn lease_path(&self, course: &CourseId) -> PathBuf {
        self.dir.join(format!("{}.lease", file_stem(course)))
    }

    fn open_lease_file(&self, course: &CourseId) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lease_path(course))?)
    }
}

fn read_lease(file: &mut File) -> StoreResult<Option<Lease>> {
    let mut data = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut data)?;
    if data.is_empty() {
        return Ok(None);
    }
    ciborium::from_reader(data.as_slice())
        .map(Some)
        .map_err(|e| StoreError::Corrupted(format!("lease file: {e}")))
}

fn write_lease(file: &mut File, lease: Option<&Lease>) -> StoreResult<()> {
    let mut data = Vec::new();
    if let Some(lease) = lease {
        ciborium::into_writer(lease, &mut data)
            .map_err(|e| StoreError::Corrupted(format!("encode lease: {e}")))?;
    }
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&data)?;
    file.sync_all()?;
    Ok(())
}

impl<C: Clock> LeaseService for FileLeaseService<C> {
    fn try_acquire(&self, course: &CourseId, ttl: Duration) -> StoreResult<Option<Lease>> {
        let mut file = self.open_lease_file(course)?;
        if file.try_lock_exclusive().is_err() {
            debug!(course_id = %course, "lease file busy");
            return Ok(None);
        }

        let now = self.clock.now();
        // A lease file that cannot be decoded cannot hold a valid lease.
        let held = read_lease(&mut file).unwrap_or_else(|e| {
            warn!(course_id = %course, error = %e, "discarding unreadable lease");
            None
        });
        if let Some(held) = held {
            if !held.is_expired_at(now) {
                debug!(course_id = %course, "lease held by another run");
                return Ok(None);
            }
            warn!(course_id = %course, holder = %held.holder_token, "taking over expired lease");
        }

        let lease = Lease::grant(course, now, ttl);
        write_lease(&mut file, Some(&lease))?;
        debug!(course_id = %course, holder = %lease.holder_token, "lease acquired");
        Ok(Some(lease))
    }

    fn release(&self, lease: &Lease) -> StoreResult<bool> {
        let path = self.lease_path(&lease.course_id);
        let mut file = lock_until(&path, &Deadline::after(RELEASE_TIMEOUT))?;
        match read_lease(&mut file)? {
            Some(held) if held.holder_token == lease.holder_token => {
                write_lease(&mut file, None)?;
                debug!(course_id = %lease.course_id, "lease released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn course() -> CourseId {
        CourseId::new("math-101")
    }

    const TTL: Duration = Duration::from_secs(120);

    #[test]
    fn second_acquire_is_refused() {
        let leases = MemoryLeaseService::new();
        let first = leases.try_acquire(&course(), TTL).unwrap();
        assert!(first.is_some());
        assert!(leases.try_acquire(&course(), TTL).unwrap().is_none());

        // Other courses are independent.
        assert!(leases
            .try_acquire(&CourseId::new("math-102"), TTL)
            .unwrap()
            .is_some());
    }

    #[test]
    fn release_frees_the_course() {
        let leases = MemoryLeaseService::new();
        let lease = leases.try_acquire(&course(), TTL).unwrap().unwrap();
        assert!(leases.release(&lease).unwrap());
        assert!(leases.current(&course()).is_none());
        assert!(leases.try_acquire(&course(), TTL).unwrap().is_some());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let clock = Arc::new(ManualClock::default());
        let leases = MemoryLeaseService::with_clock(Arc::clone(&clock));

        let stale = leases.try_acquire(&course(), TTL).unwrap().unwrap();
        assert_eq!(stale.remaining(clock.now()), TTL);

        clock.advance(TTL);
        assert!(stale.is_expired_at(clock.now()));
        let fresh = leases.try_acquire(&course(), TTL).unwrap().unwrap();
        assert_ne!(stale.holder_token, fresh.holder_token);

        // The stale holder cannot release the new lease.
        assert!(!leases.release(&stale).unwrap());
        assert_eq!(leases.current(&course()), Some(fresh));
    }

    #[test]
    fn file_leases_are_exclusive() {
        let dir = tempdir().unwrap();
        let leases = FileLeaseService::open(dir.path()).unwrap();
        let other = FileLeaseService::open(dir.path()).unwrap();

        let lease = leases.try_acquire(&course(), TTL).unwrap().unwrap();
        assert!(other.try_acquire(&course(), TTL).unwrap().is_none());
        assert_eq!(other.current(&course()).unwrap(), Some(lease.clone()));

        assert!(leases.release(&lease).unwrap());
        assert!(other.current(&course()).unwrap().is_none());
        assert!(other.try_acquire(&course(), TTL).unwrap().is_some());
    }

    #[test]
    fn file_lease_expires() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let leases = FileLeaseService::with_clock(dir.path(), Arc::clone(&clock)).unwrap();

        let stale = leases.try_acquire(&course(), TTL).unwrap().unwrap();
        clock.advance(TTL + Duration::from_secs(1));
        let fresh = leases.try_acquire(&course(), TTL).unwrap().unwrap();
        assert!(!leases.release(&stale).unwrap());
        assert!(leases.release(&fresh).unwrap());
    }

    #[test]
    fn busy_lease_file_is_refused() {
        let dir = tempdir().unwrap();
        let leases = FileLeaseService::open(dir.path()).unwrap();
        let guard = leases.open_lease_file(&course()).unwrap();
        guard.lock_exclusive().unwrap();

        assert!(leases.try_acquire(&course(), TTL).unwrap().is_none());
        drop(guard);
        assert!(leases.try_acquire(&course(), TTL).unwrap().is_some());
    }
}

//! Cross-process advisory locking for the database file.
//!
//! Exclusive locks serialize writers; shared locks let strict reads observe
//! a quiesced store. Hook invocations acquire with a zero timeout and treat
//! contention as normal flow control.

use crate::{Error, Result};
use fd_lock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Poll interval while waiting for a contended lock.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Advisory lock on a database file.
///
/// The lock file lives at `<db-dir>/.<db-file>.lock` next to the database.
/// Guards are RAII: release happens on drop on every exit path, including
/// panics.
#[derive(Debug)]
pub struct DbLock {
    inner: RwLock<File>,
    path: PathBuf,
}

impl DbLock {
    /// Creates (or opens) the lock file for `db_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the lock file cannot be created.
    pub fn new(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Storage {
                operation: "open_lock_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Ok(Self {
            inner: RwLock::new(file),
            path,
        })
    }

    /// Acquires the exclusive (writer) lock.
    ///
    /// A zero `timeout` makes a single non-blocking attempt; otherwise the
    /// lock is polled every 10 ms until the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when the lock is still held at the deadline.
    pub fn exclusive(
        &mut self,
        timeout: Duration,
        operation: &str,
    ) -> Result<RwLockWriteGuard<'_, File>> {
        // Probe in a loop without holding the guard (a guard returned from
        // inside the loop would pin the borrow), then take the real guard
        // once a probe lands.
        self.wait(timeout, operation, true)?;
        let (op, path) = (operation.to_string(), self.path.clone());
        self.inner.try_write().map_err(move |_| Error::Busy {
            operation: op,
            path,
        })
    }

    /// Acquires the shared (reader) lock. Same timeout semantics as
    /// [`DbLock::exclusive`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when a writer holds the lock at the deadline.
    pub fn shared(
        &mut self,
        timeout: Duration,
        operation: &str,
    ) -> Result<RwLockReadGuard<'_, File>> {
        self.wait(timeout, operation, false)?;
        let (op, path) = (operation.to_string(), self.path.clone());
        self.inner.try_read().map_err(move |_| Error::Busy {
            operation: op,
            path,
        })
    }

    /// Polls until a lock probe succeeds or the deadline passes. A zero
    /// timeout makes exactly one probe.
    fn wait(&mut self, timeout: Duration, operation: &str, exclusive: bool) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let free = if exclusive {
                self.inner.try_write().is_ok()
            } else {
                self.inner.try_read().is_ok()
            };
            if free {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let mode = if exclusive { "exclusive" } else { "shared" };
                tracing::debug!(operation, mode, path = %self.path.display(), "lock busy");
                return Err(self.busy(operation, mode));
            }
            std::thread::sleep(
                POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())),
            );
        }
    }

    fn busy(&self, operation: &str, mode: &'static str) -> Error {
        metrics::counter!("db_lock_busy_total", "mode" => mode).increment(1);
        Error::Busy {
            operation: operation.to_string(),
            path: self.path.clone(),
        }
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Computes the lock file path for a database path: `<dir>/.<file>.lock`.
#[must_use]
pub fn lock_path(db_path: &Path) -> PathBuf {
    let file_name = db_path
        .file_name()
        .map_or_else(|| "memories.db".to_string(), |n| n.to_string_lossy().into_owned());
    let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(".{file_name}.lock"))
}

//! # Singleton lock per scan directory.
//!
//! [`DirLock`] guarantees at most one live scanner per scan directory on the
//! host. The lock is a pid file in the temp directory whose name is a stable
//! hash of the canonical scan path; a file left behind by a dead process is
//! detected with a signal-0 liveness probe and taken over.
//!
//! Release is automatic: dropping the lock removes the file.

use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Cross-process exclusion keyed by a canonical directory path.
pub struct DirLock {
    file: PathBuf,
    held: bool,
}

impl DirLock {
    /// Creates an unheld lock for `dir`.
    ///
    /// The identity is derived from the canonical path, so two scanners
    /// pointed at the same tree through different spellings contend for the
    /// same lock.
    pub fn for_dir(dir: &Path) -> Self {
        let canonical = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        let file = std::env::temp_dir().join(format!("servitor-{:016x}.pid", hasher.finish()));
        Self { file, held: false }
    }

    /// Attempts to acquire the lock.
    ///
    /// Returns `true` only when this process created the pid file (or
    /// replaced a stale one). Not retried on contention; the caller surfaces
    /// an exit code.
    pub fn lock(&mut self) -> bool {
        if self.held {
            return true;
        }
        if self.try_create() {
            self.held = true;
            return true;
        }
        if holder_alive(&self.file) {
            return false;
        }
        // Stale pid file from a dead scanner; take it over.
        let _ = fs::remove_file(&self.file);
        if self.try_create() {
            self.held = true;
        }
        self.held
    }

    /// Returns whether this process currently owns the lock.
    pub fn has_lock(&self) -> bool {
        self.held
    }

    fn try_create(&self) -> bool {
        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.file);
        match created {
            Ok(mut f) => write!(f, "{}", std::process::id()).is_ok(),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => false,
            Err(_) => false,
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if self.held {
            let _ = fs::remove_file(&self.file);
        }
    }
}

/// Whether the pid recorded in the lock file refers to a live process.
///
/// A garbled file names no holder and counts as stale; an unreadable file is
/// treated as held, since the holder cannot be probed.
fn holder_alive(file: &Path) -> bool {
    let Ok(content) = fs::read_to_string(file) else {
        return true;
    };
    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => kill(Pid::from_raw(pid), None).is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_is_acquired_and_reported() {
        let dir = TempDir::new().unwrap();
        let mut lock = DirLock::for_dir(dir.path());
        assert!(!lock.has_lock());
        assert!(lock.lock());
        assert!(lock.has_lock());
        // Re-locking while held is a no-op.
        assert!(lock.lock());
    }

    #[test]
    fn second_locker_is_denied_while_holder_lives() {
        let dir = TempDir::new().unwrap();
        let mut first = DirLock::for_dir(dir.path());
        assert!(first.lock());

        let mut second = DirLock::for_dir(dir.path());
        assert!(!second.lock());
        assert!(!second.has_lock());
    }

    #[test]
    fn drop_releases_for_the_next_locker() {
        let dir = TempDir::new().unwrap();
        {
            let mut first = DirLock::for_dir(dir.path());
            assert!(first.lock());
        }
        let mut second = DirLock::for_dir(dir.path());
        assert!(second.lock());
    }

    #[test]
    fn stale_pid_file_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let probe = DirLock::for_dir(dir.path());
        // Forge a lock file naming a pid far beyond any real pid space.
        fs::write(&probe.file, i32::MAX.to_string()).unwrap();

        let mut lock = DirLock::for_dir(dir.path());
        assert!(lock.lock());
        assert!(lock.has_lock());
    }

    #[test]
    fn garbled_lock_file_is_treated_as_stale() {
        let dir = TempDir::new().unwrap();
        let probe = DirLock::for_dir(dir.path());
        fs::write(&probe.file, "not-a-pid").unwrap();

        let mut lock = DirLock::for_dir(dir.path());
        assert!(lock.lock());
    }
}

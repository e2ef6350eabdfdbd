//! File-backed registry of the running service.
//!
//! Two files, each a single decimal line:
//! - the marker names the pid of the current service instance;
//! - the reference count records how many client sessions depend on it.
//!
//! Reads never fail: a missing or unreadable file means "not running" or a
//! count of zero. Read-modify-write sequences are not locked across
//! processes. That is acceptable for a local single-user tool with a handful
//! of concurrent invocations; the worst case is a count that is off by one
//! until the next stop resets it.

use crate::error::ServiceError;
use hodos_config::HodosPaths;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    pid_file: PathBuf,
    reference_count_file: PathBuf,
}

impl ProcessRegistry {
    pub fn new(pid_file: impl Into<PathBuf>, reference_count_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            reference_count_file: reference_count_file.into(),
        }
    }

    pub fn from_paths(paths: &HodosPaths) -> Self {
        Self::new(paths.pid_file(), paths.reference_count_file())
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn reference_count_file(&self) -> &Path {
        &self.reference_count_file
    }

    /// Pid named by the marker, if the marker exists and parses.
    pub fn read_pid(&self) -> Option<u32> {
        read_number(&self.pid_file)
    }

    /// True iff the marker names a process that currently exists.
    pub fn is_running(&self) -> bool {
        self.read_pid().is_some_and(process_alive)
    }

    /// Record `pid` as the current service, replacing any stale marker.
    ///
    /// The write goes through a temp file and a rename, so concurrent
    /// writers never interleave and the last one to finish wins.
    pub fn save(&self, pid: u32) -> Result<(), ServiceError> {
        write_atomic(&self.pid_file, pid.to_string().as_bytes()).map_err(|source| {
            ServiceError::Registry {
                path: self.pid_file.clone(),
                source,
            }
        })?;
        tracing::debug!(pid, path = %self.pid_file.display(), "saved service marker");
        Ok(())
    }

    /// Remove the marker. Idempotent.
    pub fn cleanup(&self) {
        remove_if_present(&self.pid_file);
    }

    /// Remove the marker only if it still names `pid`.
    ///
    /// A duplicate service that lost the start race must not erase the
    /// winner's marker on its way out.
    pub fn release(&self, pid: u32) -> bool {
        if self.read_pid() == Some(pid) {
            self.cleanup();
            true
        } else {
            false
        }
    }

    pub fn reference_count(&self) -> u32 {
        read_number(&self.reference_count_file).unwrap_or(0)
    }

    pub fn increment_reference_count(&self) -> Result<u32, ServiceError> {
        let count = self.reference_count().saturating_add(1);
        self.write_reference_count(count)?;
        Ok(count)
    }

    /// Decrement, floored at zero.
    pub fn decrement_reference_count(&self) -> Result<u32, ServiceError> {
        let count = self.reference_count().saturating_sub(1);
        self.write_reference_count(count)?;
        Ok(count)
    }

    pub fn reset_reference_count(&self) {
        remove_if_present(&self.reference_count_file);
    }

    fn write_reference_count(&self, count: u32) -> Result<(), ServiceError> {
        write_atomic(&self.reference_count_file, count.to_string().as_bytes()).map_err(
            |source| ServiceError::Registry {
                path: self.reference_count_file.clone(),
                source,
            },
        )
    }
}

/// Owns the marker for the lifetime of a running service.
///
/// Dropping the guard releases the marker, so every exit path of the service
/// (graceful shutdown, error return, panic unwinding) clears it.
#[derive(Debug)]
pub struct MarkerGuard {
    registry: ProcessRegistry,
    pid: u32,
}

impl MarkerGuard {
    pub fn acquire(registry: ProcessRegistry, pid: u32) -> Result<Self, ServiceError> {
        registry.save(pid)?;
        Ok(Self { registry, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if self.registry.release(self.pid) {
            tracing::debug!(pid = self.pid, "released service marker");
        }
    }
}

/// Whether a process with this pid exists.
///
/// Existence only; the pid is not checked against the expected program.
/// Zombies count as gone on Linux.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    let exists = match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Owned by another user, but it exists.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    };

    exists && !is_zombie(pid)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    // No cheap liveness check here; trust the marker.
    true
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // Format: `pid (comm) state ...`; comm may contain spaces or parens.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

fn read_number(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "Path has no parent directory")
    })?;
    fs::create_dir_all(parent)?;

    // Temp name is per-process so concurrent writers never share it.
    let temp_path = path.with_file_name(format!(
        ".{}.tmp.{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)
}

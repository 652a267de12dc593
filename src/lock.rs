// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Named mutual exclusion.
//!
//! Independent processes updating the same kubeconfig document must take
//! turns. They do so by agreeing on a lock __name__ derived from the path of
//! the document and the operation being performed. The name says nothing
//! about how the lock is implemented, so the same [`MutexSpec`] can be handed
//! to any [`NamedMutex`] backend.
//!
//! # Backends
//!
//! - [`FileMutex`] locks a file in the temporary directory. Works across
//!   processes. Default backend.
//! - [`ProcessMutex`] keeps a registry of held names in memory. Only works
//!   within one process.
//!
//! # Timeouts
//!
//! Acquisition polls every [`MutexSpec::delay`] until [`MutexSpec::timeout`]
//! runs out. Waiting forever is never the default.

use sha2::{Digest, Sha256};
use std::{
    collections::HashSet,
    env,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, trace};

/// Default polling delay between acquisition attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Default time to wait for a busy lock before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const NAME_PREFIX: &str = "kubestitch-";
const NAME_DIGEST_LEN: usize = 40;

/// Specification of a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexSpec {
    /// Name every participant agrees on.
    pub name: String,

    /// Time to sleep between acquisition attempts.
    pub delay: Duration,

    /// Time to wait before giving up.
    pub timeout: Duration,
}

impl MutexSpec {
    /// Construct new lock specification for an operation on a path.
    ///
    /// Pure function of its inputs: the same path and tag always produce the
    /// same name, different paths produce different names. Relative paths are
    /// made absolute against the current directory first.
    pub fn for_operation(path: impl AsRef<Path>, tag: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let key = absolute.join(tag.as_ref());
        let digest = hex::encode(Sha256::digest(key.to_string_lossy().as_bytes()));

        Self {
            name: format!("{NAME_PREFIX}{}", &digest[..NAME_DIGEST_LEN]),
            delay: DEFAULT_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override polling delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Override acquisition timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Display for MutexSpec {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} (delay {:?}, timeout {:?})",
            self.name, self.delay, self.timeout
        )
    }
}

/// Handle to a held lock.
///
/// Releases the lock when dropped. Releasing more than once is a no-op.
pub struct Releaser {
    name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Releaser {
    /// Construct new releaser that runs `release` exactly once.
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Name of held lock.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!("released lock {}", self.name);
        }
    }
}

impl Drop for Releaser {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Releaser {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Releaser")
            .field("name", &self.name)
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Layer of indirection for named lock backends.
pub trait NamedMutex: Send + Sync {
    /// Attempt to acquire lock without waiting.
    ///
    /// Returns `None` if somebody else holds it.
    fn try_acquire(&self, spec: &MutexSpec) -> Result<Option<Releaser>>;

    /// Acquire lock, polling until the spec's timeout runs out.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Timeout`] if the lock stays busy too long.
    /// - Return [`LockError::Acquire`] if the backend itself fails.
    fn acquire(&self, spec: &MutexSpec) -> Result<Releaser> {
        let deadline = Instant::now() + spec.timeout;
        loop {
            if let Some(releaser) = self.try_acquire(spec)? {
                return Ok(releaser);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout { spec: spec.clone() });
            }

            trace!("lock {} busy, retry in {:?}", spec.name, spec.delay);
            thread::sleep(spec.delay.min(deadline - now));
        }
    }
}

/// Cross-process lock through advisory file locks.
///
/// Each name maps to `<dir>/<name>.lock`. Lock files are left in place after
/// release so later acquisitions can reuse them.
#[derive(Debug, Clone)]
pub struct FileMutex {
    dir: PathBuf,
}

impl FileMutex {
    /// Construct new file lock backend in the system temporary directory.
    pub fn new() -> Self {
        Self::in_dir(env::temp_dir())
    }

    /// Construct new file lock backend in target directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of lock file backing target spec.
    pub fn lock_path(&self, spec: &MutexSpec) -> PathBuf {
        self.dir.join(format!("{}.lock", spec.name))
    }
}

impl Default for FileMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl NamedMutex for FileMutex {
    fn try_acquire(&self, spec: &MutexSpec) -> Result<Option<Releaser>> {
        let acquire_error = |err: io::Error| LockError::Acquire {
            source: err,
            spec: spec.clone(),
        };

        fs::create_dir_all(&self.dir).map_err(acquire_error)?;
        try_lock_file(&self.lock_path(spec), &spec.name).map_err(acquire_error)
    }
}

#[cfg(unix)]
fn try_lock_file(path: &Path, name: &str) -> io::Result<Option<Releaser>> {
    use std::os::unix::io::AsRawFd;

    let file: File = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    // SAFETY: File descriptor stays open for as long as `file` lives.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
            _ => Err(err),
        };
    }

    Ok(Some(Releaser::new(name, move || {
        // SAFETY: Unlocking a descriptor we still own. Closing it would
        // release the lock anyway.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
        drop(file);
    })))
}

#[cfg(not(unix))]
fn try_lock_file(path: &Path, name: &str) -> io::Result<Option<Releaser>> {
    let file: File = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
        Err(err) => return Err(err),
    };

    let path = path.to_path_buf();
    Ok(Some(Releaser::new(name, move || {
        drop(file);
        let _ = fs::remove_file(path);
    })))
}

/// In-process lock through a shared registry of held names.
///
/// Clones share one registry.
#[derive(Debug, Clone, Default)]
pub struct ProcessMutex {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ProcessMutex {
    /// Construct new in-process lock backend with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NamedMutex for ProcessMutex {
    fn try_acquire(&self, spec: &MutexSpec) -> Result<Option<Releaser>> {
        // INVARIANT: Registry is only ever touched by whole insert/remove
        //   calls, so a poisoned guard still holds a consistent set.
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(spec.name.clone()) {
            return Ok(None);
        }

        let registry = Arc::clone(&self.held);
        let name = spec.name.clone();
        Ok(Some(Releaser::new(spec.name.clone(), move || {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&name);
        })))
    }
}

/// Named lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Lock stayed busy past the spec's timeout.
    #[error("timed out waiting for lock {spec}")]
    Timeout { spec: MutexSpec },

    /// Lock backend failed.
    #[error("failed to acquire lock {spec}")]
    Acquire {
        #[source]
        source: io::Error,
        spec: MutexSpec,
    },
}

impl LockError {
    /// Specification of the lock that could not be acquired.
    pub fn spec(&self) -> &MutexSpec {
        match self {
            Self::Timeout { spec } | Self::Acquire { spec, .. } => spec,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;

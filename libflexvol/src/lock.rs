//! Node-wide unmount serialization.
//!
//! Unmounts trigger device rescans that are expensive and unsafe to overlap,
//! and every driver invocation is its own process, so the gate is an advisory
//! `flock(2)` on a well-known file rather than an in-memory mutex. The lock is
//! tied to the open file description: it is released when the guard drops,
//! and by the kernel if the holder dies.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::error::{FlexError, FlexResult};

/// The single node-wide unmount lock.
#[derive(Debug, Clone)]
pub struct UnmountLock {
    path: PathBuf,
    retry_interval: Duration,
}

/// Held for the duration of one unmount sequence.
pub struct UnmountGuard {
    _lock: Flock<File>,
    path: PathBuf,
}

impl UnmountLock {
    pub fn new(path: impl Into<PathBuf>, retry_interval: Duration) -> Self {
        Self {
            path: path.into(),
            retry_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held, retrying every `retry_interval`.
    ///
    /// Errors opening or locking the file are retried like contention. There
    /// is no upper bound on the wait.
    pub async fn acquire(&self) -> UnmountGuard {
        loop {
            match self.try_acquire().await {
                Ok(Some(guard)) => {
                    debug!(path = %self.path.display(), "got unmount lock");
                    return guard;
                }
                Ok(None) => {
                    debug!(path = %self.path.display(), "unmount lock busy, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "failed to take unmount lock, retrying");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Take the lock if nobody holds it.
    pub async fn try_acquire(&self) -> FlexResult<Option<UnmountGuard>> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| FlexError::io("open unmount lock", &self.path, e))?
            .into_std()
            .await;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(UnmountGuard {
                _lock: lock,
                path: self.path.clone(),
            })),
            Err((_, Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(FlexError::io("flock", &self.path, errno)),
        }
    }
}

impl std::fmt::Debug for UnmountGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnmountGuard")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for UnmountGuard {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "released unmount lock");
    }
}

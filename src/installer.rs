//! Installer - moves a replacement binary into the active executable path
//!
//! With the versioned strategy every install lands on a fresh
//! `<original>-<counter>` path, so the rename never targets a file the exiting
//! child may still hold open. The previously active versioned file is removed
//! first.

use std::ffi::OsString;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use log::{Level, debug, info, log};

use crate::config::{InstallStrategy, RetryPolicy, SupervisorConfig};
use crate::error::{BinswapError, Result};

/// Filesystem operations the installer needs
#[async_trait]
pub trait SwapFs: Send + Sync {
    /// Whether something exists at `path` (symlinks are not followed)
    async fn exists(&self, path: &Path) -> bool;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`SwapFs`] backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

#[async_trait]
impl SwapFs for TokioFs {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::symlink_metadata(path).await.is_ok()
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }
}

/// Counts successful installs; the count names the next versioned path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapCounter(u64);

impl SwapCounter {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// `<original>-<counter>`
    pub fn versioned_path(&self, original: &Path) -> PathBuf {
        let mut path = OsString::from(original.as_os_str());
        path.push(format!("-{}", self.0));
        PathBuf::from(path)
    }

    fn advance(&mut self) {
        self.0 += 1;
    }
}

/// Installs replacement binaries
#[derive(Debug, Clone)]
pub struct Installer<F: SwapFs = TokioFs> {
    fs: F,
    strategy: InstallStrategy,
    remove_retry: RetryPolicy,
    rename_retry: RetryPolicy,
}

impl Installer<TokioFs> {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(TokioFs, config.strategy, config.remove_retry, config.rename_retry)
    }
}

impl<F: SwapFs> Installer<F> {
    pub fn new(fs: F, strategy: InstallStrategy, remove_retry: RetryPolicy, rename_retry: RetryPolicy) -> Self {
        Self {
            fs,
            strategy,
            remove_retry,
            rename_retry,
        }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Install `replacement` and return the new active executable path.
    ///
    /// The counter advances only when the install succeeds. On any error the
    /// caller keeps running `current`.
    pub async fn install(
        &self,
        replacement: &Path,
        current: &Path,
        original: &Path,
        counter: &mut SwapCounter,
    ) -> Result<PathBuf> {
        if !self.fs.exists(replacement).await {
            return Err(BinswapError::ReplacementMissing(replacement.to_path_buf()));
        }

        let target = match self.strategy {
            InstallStrategy::Versioned => {
                if current != original {
                    self.retire(current).await?;
                }
                counter.versioned_path(original)
            }
            InstallStrategy::InPlace => original.to_path_buf(),
        };

        self.rename_into_place(replacement, &target).await?;
        counter.advance();

        info!("Installed {} as {}", replacement.display(), target.display());
        Ok(target)
    }

    /// Remove the retired versioned executable. Already gone counts as done.
    async fn retire(&self, path: &Path) -> Result<()> {
        let mut retries = 0u32;
        let removed = (|| self.fs.remove_file(path))
            .retry(self.remove_retry.build_backoff())
            .when(|e: &io::Error| e.kind() != ErrorKind::NotFound)
            .notify(|e: &io::Error, _delay: Duration| {
                retries = retries.saturating_add(1);
                log!(
                    retry_log_level(retries),
                    "Failed to remove {} (attempt {}): {}",
                    path.display(),
                    retries,
                    e
                );
            })
            .await;

        match removed {
            Ok(()) => {
                debug!("Removed retired executable {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Retired executable {} already gone", path.display());
                Ok(())
            }
            Err(source) => Err(BinswapError::Remove {
                path: path.to_path_buf(),
                attempts: retries.saturating_add(1),
                source,
            }),
        }
    }

    async fn rename_into_place(&self, from: &Path, to: &Path) -> Result<()> {
        let mut retries = 0u32;
        let renamed = (|| self.fs.rename(from, to))
            .retry(self.rename_retry.build_backoff())
            .notify(|e: &io::Error, delay: Duration| {
                retries = retries.saturating_add(1);
                log!(
                    retry_log_level(retries),
                    "Failed to rename {} to {} (attempt {}): {}; retrying in {:?}",
                    from.display(),
                    to.display(),
                    retries,
                    e,
                    delay
                );
            })
            .await;

        renamed.map_err(|source| BinswapError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            attempts: retries.saturating_add(1),
            source,
        })
    }
}

/// Failed attempts between two warn-level retry lines; the rest log at trace.
const WARN_EVERY: u32 = 1000;

/// Unbounded zero-delay retries can fail millions of times, so only the first
/// failure and every [`WARN_EVERY`]th one are warnings.
fn retry_log_level(retries: u32) -> Level {
    if retries == 1 || retries % WARN_EVERY == 0 {
        Level::Warn
    } else {
        Level::Trace
    }
}

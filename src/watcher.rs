//! Replacement watcher - polls the replacement path for a newer binary
//!
//! On each tick the replacement path is stat'ed (lstat semantics). A
//! notification is sent whenever the modification time moves strictly past the
//! last value seen. An absent file reads as the Unix epoch and never notifies.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{StatErrorPolicy, SupervisorConfig};
use crate::error::{BinswapError, Result};

/// Modification time of `path`, or the Unix epoch if it does not exist.
pub async fn last_modified(path: &Path) -> Result<SystemTime> {
    let stat_error = |source| BinswapError::WatchStat {
        path: path.to_path_buf(),
        source,
    };

    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta.modified().map_err(stat_error),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(UNIX_EPOCH),
        Err(e) => Err(stat_error(e)),
    }
}

/// Tracks the newest modification time seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModTimeTracker {
    last_seen: SystemTime,
}

impl ModTimeTracker {
    /// Start tracking from a baseline observation; the baseline itself never notifies.
    pub fn new(baseline: SystemTime) -> Self {
        Self { last_seen: baseline }
    }

    pub fn last_seen(&self) -> SystemTime {
        self.last_seen
    }

    /// Record an observation. Returns true when it strictly advances past the last one seen.
    pub fn observe(&mut self, modified: SystemTime) -> bool {
        if modified > self.last_seen {
            self.last_seen = modified;
            true
        } else {
            false
        }
    }
}

/// Polls the replacement path and sends one `()` per detected update
#[derive(Debug, Clone)]
pub struct ReplacementWatcher {
    path: PathBuf,
    interval: Duration,
    on_stat_error: StatErrorPolicy,
}

impl ReplacementWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            on_stat_error: StatErrorPolicy::default(),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(&config.replacement_path, config.poll_interval).with_stat_error_policy(config.on_stat_error)
    }

    pub fn with_stat_error_policy(mut self, policy: StatErrorPolicy) -> Self {
        self.on_stat_error = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spawn the watcher task. Notifications go through a single-slot channel,
    /// so the watcher blocks rather than drops when nobody is receiving.
    pub fn spawn(self) -> (mpsc::Receiver<()>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    /// Poll until the receiver goes away, or until a stat error under [`StatErrorPolicy::Stop`].
    pub async fn run(self, swaps: mpsc::Sender<()>) {
        let mut tracker = match self.stat().await {
            Ok(baseline) => Some(ModTimeTracker::new(baseline)),
            Err(e) => {
                if !self.tolerate(&e) {
                    return;
                }
                None
            }
        };

        info!("Watching {} every {:?}", self.path.display(), self.interval);

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let modified = match self.stat().await {
                Ok(modified) => modified,
                Err(e) => {
                    if !self.tolerate(&e) {
                        return;
                    }
                    continue;
                }
            };

            if tracker.is_none() {
                // Baseline was never captured; this observation becomes it
                tracker = Some(ModTimeTracker::new(modified));
                continue;
            }

            if tracker.as_mut().is_some_and(|t| t.observe(modified)) {
                debug!("Replacement {} modified at {:?}", self.path.display(), modified);
                if swaps.send(()).await.is_err() {
                    debug!("No swap receivers left, watcher exiting");
                    return;
                }
            }
        }
    }

    async fn stat(&self) -> Result<SystemTime> {
        last_modified(&self.path).await
    }

    /// Log a stat failure and report whether watching should go on
    fn tolerate(&self, err: &BinswapError) -> bool {
        match self.on_stat_error {
            StatErrorPolicy::Continue => {
                warn!("{}; retrying next tick", err);
                true
            }
            StatErrorPolicy::Stop => {
                error!("{}; swap detection stopped", err);
                false
            }
        }
    }
}

//! Child process lifecycle - start, wait, kill
//!
//! A [`RunningChild`] owns exactly one OS process generation. Its
//! [`KillSwitch`] is handed to the reaper; firing it makes the pending
//! [`RunningChild::wait`] terminate the child unconditionally.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use log::{debug, warn};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::error::{BinswapError, Result};

/// How a generation ended. Informational only; never fatal to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Child exited on its own
    Exited(ExitStatus),
    /// Child was terminated by its reaper
    Killed(Option<ExitStatus>),
    /// Waiting on the child failed
    Unknown,
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }

    pub fn was_killed(&self) -> bool {
        matches!(self, Self::Killed(_))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(status) => write!(f, "exited ({})", status),
            Self::Killed(Some(status)) => write!(f, "killed ({})", status),
            Self::Killed(None) => write!(f, "killed"),
            Self::Unknown => write!(f, "exit status unknown"),
        }
    }
}

/// Launches child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Start `executable` with `arguments`.
    ///
    /// The child inherits the supervisor's environment and its stdio streams.
    pub fn start(&self, executable: &Path, arguments: &[String]) -> Result<RunningChild> {
        let mut cmd = Command::new(executable);
        cmd.args(arguments)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| BinswapError::Start {
            path: executable.to_path_buf(),
            source,
        })?;

        debug!("Started {} (pid {:?})", executable.display(), child.id());
        Ok(RunningChild::new(executable.to_path_buf(), child))
    }
}

/// Exclusive handle to one running child process
pub struct RunningChild {
    executable: PathBuf,
    pid: Option<u32>,
    child: Child,
    kill_rx: oneshot::Receiver<()>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl RunningChild {
    fn new(executable: PathBuf, child: Child) -> Self {
        let (kill_tx, kill_rx) = oneshot::channel();
        Self {
            executable,
            pid: child.id(),
            child,
            kill_rx,
            kill_tx: Some(kill_tx),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Take the kill switch for this generation. There is only one.
    pub fn kill_switch(&mut self) -> Option<KillSwitch> {
        self.kill_tx.take().map(|tx| KillSwitch { pid: self.pid, tx })
    }

    /// Block until the child exits, killing it first if the kill switch fires.
    pub async fn wait(mut self) -> ExitOutcome {
        tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) => ExitOutcome::Exited(status),
                Err(e) => {
                    warn!("Failed to wait on {}: {}", self.executable.display(), e);
                    ExitOutcome::Unknown
                }
            },
            Ok(()) = &mut self.kill_rx => self.kill().await,
        }
    }

    async fn kill(&mut self) -> ExitOutcome {
        if let Err(e) = self.child.start_kill() {
            let err = BinswapError::Kill(format!("pid {:?}: {}", self.pid, e));
            warn!("{}", err);
        }
        match self.child.wait().await {
            Ok(status) => ExitOutcome::Killed(Some(status)),
            Err(e) => {
                warn!("Failed to reap killed {}: {}", self.executable.display(), e);
                ExitOutcome::Killed(None)
            }
        }
    }
}

impl fmt::Debug for RunningChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningChild")
            .field("executable", &self.executable)
            .field("pid", &self.pid)
            .finish()
    }
}

/// Terminates one generation's child on demand
#[derive(Debug)]
pub struct KillSwitch {
    pid: Option<u32>,
    tx: oneshot::Sender<()>,
}

impl KillSwitch {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination. Fails with [`BinswapError::Kill`] once the
    /// generation has already ended.
    pub fn kill(self) -> Result<()> {
        self.tx
            .send(())
            .map_err(|_| BinswapError::Kill(format!("pid {:?} already exited", self.pid)))
    }

    /// Resolves once the generation ends, whether or not kill was requested.
    pub async fn ended(&mut self) {
        self.tx.closed().await
    }

    pub fn is_ended(&self) -> bool {
        self.tx.is_closed()
    }
}

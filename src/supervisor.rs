//! Supervisor loop - start, reap, wait, swap, repeat
//!
//! Each generation moves through:
//! - Starting: launch the current executable, retrying with a fixed backoff
//! - Running: bind a reaper to the child and wait for it to exit
//! - Exited: log how the child ended
//! - Swapping: install a replacement if one is present
//!
//! The active executable path and the swap counter live in [`SupervisorState`]
//! and are only touched between generations.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::SupervisorConfig;
use crate::error::BinswapError;
use crate::installer::{Installer, SwapCounter, SwapFs, TokioFs};
use crate::process::{ExitOutcome, ProcessRunner};
use crate::reaper::{self, ReapOutcome};

/// Where the supervisor is within a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Exited,
    Swapping,
}

/// Mutable supervisor state, owned by the loop
#[derive(Debug, Clone)]
pub struct SupervisorState {
    /// Executable launched by the next generation
    pub target: PathBuf,
    pub counter: SwapCounter,
    /// Generations started so far
    pub generation: u64,
    pub phase: Phase,
}

impl SupervisorState {
    pub fn new(original: impl Into<PathBuf>) -> Self {
        Self {
            target: original.into(),
            counter: SwapCounter::new(),
            generation: 0,
            phase: Phase::Starting,
        }
    }
}

/// Result of the swapping phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapResult {
    /// Replacement installed at this path
    Installed(PathBuf),
    /// Nothing to install; relaunching the same executable
    NoReplacement,
    /// Install failed; relaunching the same executable
    Failed(String),
}

/// What happened during one generation
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub generation: u64,
    pub executable: PathBuf,
    pub exit: ExitOutcome,
    pub reaped: Option<ReapOutcome>,
    pub swap: SwapResult,
}

pub struct Supervisor<F: SwapFs = TokioFs> {
    config: SupervisorConfig,
    runner: ProcessRunner,
    installer: Installer<F>,
    swaps: Option<mpsc::Receiver<()>>,
    state: SupervisorState,
}

impl Supervisor<TokioFs> {
    /// Create a supervisor fed by a watcher's notification receiver
    pub fn new(config: SupervisorConfig, swaps: mpsc::Receiver<()>) -> Self {
        let installer = Installer::from_config(&config);
        Self::with_installer(config, installer, swaps)
    }
}

impl<F: SwapFs> Supervisor<F> {
    pub fn with_installer(config: SupervisorConfig, installer: Installer<F>, swaps: mpsc::Receiver<()>) -> Self {
        let state = SupervisorState::new(&config.original_executable);
        Self {
            config,
            runner: ProcessRunner::new(),
            installer,
            swaps: Some(swaps),
            state,
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run generations forever
    pub async fn run(mut self) -> Infallible {
        info!(
            "Supervising {} (replacement path {})",
            self.config.original_executable.display(),
            self.config.replacement_path.display()
        );
        loop {
            let report = self.run_generation().await;
            debug!("Generation report: {:?}", report);
        }
    }

    /// Run one generation through all four phases
    pub async fn run_generation(&mut self) -> GenerationReport {
        self.enter(Phase::Starting);
        self.state.generation += 1;
        let generation = self.state.generation;
        let executable = self.state.target.clone();

        let mut child = loop {
            match self.runner.start(&executable, &self.config.arguments) {
                Ok(child) => break child,
                Err(e) => {
                    error!("{}; retrying in {:?}", e, self.config.start_backoff);
                    tokio::time::sleep(self.config.start_backoff).await;
                }
            }
        };

        self.enter(Phase::Running);
        info!(
            "Generation {} running {} (pid {:?})",
            generation,
            executable.display(),
            child.pid()
        );

        let reaper = match (self.swaps.take(), child.kill_switch()) {
            (Some(swaps), Some(switch)) => Some(reaper::spawn(swaps, switch)),
            (swaps, _) => {
                self.swaps = swaps;
                None
            }
        };

        let exit = child.wait().await;

        self.enter(Phase::Exited);
        if exit.is_success() {
            info!("{} {}", executable.display(), exit);
        } else {
            warn!("{} {}", executable.display(), exit);
        }

        let reaped = match reaper {
            Some(handle) => match handle.await {
                Ok((swaps, outcome)) => {
                    self.swaps = Some(swaps);
                    Some(outcome)
                }
                Err(e) => {
                    error!("Reaper task failed: {}; swap detection disabled", e);
                    None
                }
            },
            None => None,
        };

        self.enter(Phase::Swapping);
        let swap = self.swap().await;

        GenerationReport {
            generation,
            executable,
            exit,
            reaped,
            swap,
        }
    }

    async fn swap(&mut self) -> SwapResult {
        let installed = self
            .installer
            .install(
                &self.config.replacement_path,
                &self.state.target,
                &self.config.original_executable,
                &mut self.state.counter,
            )
            .await;

        let result = match installed {
            Ok(path) => {
                self.state.target = path.clone();
                return SwapResult::Installed(path);
            }
            Err(BinswapError::ReplacementMissing(path)) => {
                info!("No replacement at {}", path.display());
                SwapResult::NoReplacement
            }
            Err(e) => {
                error!("Swap failed: {}", e);
                SwapResult::Failed(e.to_string())
            }
        };

        info!(
            "Relaunching {} in {:?}",
            self.state.target.display(),
            self.config.swap_backoff
        );
        tokio::time::sleep(self.config.swap_backoff).await;
        result
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.state.phase, phase);
        self.state.phase = phase;
    }

    /// Path the next generation will launch
    pub fn target(&self) -> &Path {
        &self.state.target
    }
}

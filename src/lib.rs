//! Binswap - live binary hot-swap supervisor
//!
//! Runs a target executable as a child process, polls a well-known path for a
//! replacement binary, and when one appears kills the child, installs the
//! replacement and relaunches.

pub mod config;
pub mod error;
pub mod installer;
pub mod process;
pub mod reaper;
pub mod supervisor;
pub mod watcher;

pub use error::{BinswapError, Result};

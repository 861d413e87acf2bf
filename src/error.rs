//! Error types for Binswap
//!
//! Centralized error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

/// All error types that can occur while supervising and swapping
#[derive(Debug, Error)]
pub enum BinswapError {
    /// Child process failed to launch
    #[error("Failed to start {}: {source}", .path.display())]
    Start {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stat of the replacement path failed for a reason other than absence
    #[error("Failed to stat replacement {}: {source}", .path.display())]
    WatchStat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No replacement artifact present at swap time
    #[error("Replacement missing: {}", .0.display())]
    ReplacementMissing(PathBuf),

    /// Retiring the previous versioned executable failed
    #[error("Failed to remove {} after {attempts} attempt(s): {source}", .path.display())]
    Remove {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// Renaming the replacement into place failed
    #[error("Failed to rename {} to {} after {attempts} attempt(s): {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// Terminating a child failed (commonly because it already exited)
    #[error("Kill error: {0}")]
    Kill(String),

    /// Invalid startup configuration
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Binswap operations
pub type Result<T> = std::result::Result<T, BinswapError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_start_error() {
        let err = BinswapError::Start {
            path: PathBuf::from("/opt/app"),
            source: Error::new(ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.to_string(), "Failed to start /opt/app: no such file");
    }

    #[test]
    fn test_replacement_missing_error() {
        let err = BinswapError::ReplacementMissing(PathBuf::from("/tmp/binswap"));
        assert_eq!(err.to_string(), "Replacement missing: /tmp/binswap");
    }

    #[test]
    fn test_rename_error_mentions_attempts() {
        let err = BinswapError::Rename {
            from: PathBuf::from("/tmp/binswap"),
            to: PathBuf::from("/opt/app-3"),
            attempts: 4,
            source: Error::new(ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to rename /tmp/binswap to /opt/app-3 after 4 attempt(s): denied"
        );
    }

    #[test]
    fn test_kill_error() {
        let err = BinswapError::Kill("child already exited".to_string());
        assert_eq!(err.to_string(), "Kill error: child already exited");
    }

    #[test]
    fn test_config_error() {
        let err = BinswapError::Config("poll interval must be non-zero".to_string());
        assert_eq!(err.to_string(), "Config error: poll interval must be non-zero");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = Error::new(ErrorKind::NotFound, "file not found");
        let err: BinswapError = io_err.into();
        assert!(matches!(err, BinswapError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;
        let err = BinswapError::WatchStat {
            path: PathBuf::from("/tmp/binswap"),
            source: Error::new(ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.source().is_some());
    }
}

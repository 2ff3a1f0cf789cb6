//! Internal error types.
//!
//! None of these reach callers of the executor directly: the pipeline turns
//! them into an `InternalError` outcome.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to set up or tear down a request workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure to drive a child process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to {action} child process: {source}")]
    Io {
        action: &'static str,
        source: std::io::Error,
    },
}

/// Anything that aborts a request before the guest's own outcome is known.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("toolchain '{0}' has an empty command template")]
    EmptyCommand(String),

    #[error("compiler succeeded but produced no artifact at {0}")]
    MissingArtifact(PathBuf),
}

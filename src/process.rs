//! Process runner capability.
//!
//! The pipeline never spawns processes itself; it describes each compile or
//! run step as an [`Invocation`] and hands it to a [`ProcessRunner`]. The host
//! implementation spawns real children; tests substitute a scripted fake.

mod host;

pub use host::HostProcessRunner;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::governor::ResourceLimits;

/// One process to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Text written to the child's stdin. Stdin is null when `None`.
    pub stdin: Option<String>,
    /// Governance for this process. `None` runs it ungoverned.
    pub limits: Option<ResourceLimits>,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The process exited by itself (signals map to `128 + signal`).
    Exited(i32),
    /// The wall-clock limit was hit and the process was killed.
    TimedOut,
}

/// Captured result of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub const fn success(&self) -> bool {
        matches!(self.exit, ExitKind::Exited(0))
    }
}

/// Capability to run a process to completion and capture its output.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `invocation`, waiting until it exits or its timeout fires.
    ///
    /// Errors are reserved for failures of the runner itself (spawn, pipe
    /// I/O); a guest exiting non-zero is a normal [`ProcessOutput`].
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

//! Resource governance for guest processes.
//!
//! Two independent limits: a wall-clock timeout, enforced by the process
//! runner killing the child, and a virtual-memory ceiling (`RLIMIT_AS`) set in
//! the child after fork and before exec. Exceeding the memory ceiling shows up
//! as the guest's own allocation failure; nothing here classifies it.
//!
//! This is not an isolation boundary: there is no namespace, filesystem or
//! network confinement.

use std::time::Duration;

use tokio::process::Command;

use crate::toolchain::ToolchainDescriptor;

/// Limits applied to a single governed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock limit; the child is killed when it is exceeded.
    pub timeout: Duration,
    /// Address-space ceiling in bytes. `None` leaves the inherited limit.
    pub memory_bytes: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_bytes: Some(512 * 1024 * 1024),
        }
    }
}

impl ResourceLimits {
    pub const fn new(timeout: Duration, memory_mb: Option<u64>) -> Self {
        Self {
            timeout,
            memory_bytes: match memory_mb {
                Some(mb) => Some(mb.saturating_mul(1024 * 1024)),
                None => None,
            },
        }
    }

    /// Limits for a toolchain's run stage: its own overrides, else `self`.
    pub fn for_toolchain(&self, descriptor: &ToolchainDescriptor) -> Self {
        let mut limits = *self;
        if let Some(secs) = descriptor.timeout_seconds {
            limits.timeout = Duration::from_secs(secs);
        }
        if let Some(mb) = descriptor.memory_mb {
            limits.memory_bytes = Some(mb.saturating_mul(1024 * 1024));
        }
        limits
    }
}

/// Install the memory ceiling on `cmd` so it takes effect before the guest
/// program starts executing.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn apply_memory_ceiling(cmd: &mut Command, bytes: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    // SAFETY: the hook runs between fork and exec; it only calls setrlimit,
    // which is async-signal-safe, and does not allocate.
    unsafe {
        cmd.pre_exec(move || {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(unix))]
pub fn apply_memory_ceiling(_cmd: &mut Command, bytes: u64) {
    tracing::warn!(bytes, "Memory ceiling is not supported on this platform");
}

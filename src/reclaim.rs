//! Memory-reclaim daemon hook (spec §1, §4.2, §5): an optional external
//! collaborator that can take idle buffers' backing memory away and give it
//! back later. The real system resolves this via `dlopen`, once per process,
//! recorded in a static atomic flag; we model the dlopen boundary as a trait
//! so tests don't need a real reclaim daemon.

use crate::error::SurfaceError;
use lazy_static::lazy_static;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait ReclaimDaemon: Send + Sync {
    fn reclaim(&self, fd: RawFd) -> Result<(), SurfaceError>;
    fn resume(&self, fd: RawFd) -> Result<(), SurfaceError>;
}

/// Used when no reclaim daemon is configured; every call fails with
/// `NotSupported`, which callers are expected to treat as best-effort
/// per spec §7.
pub struct NullReclaimDaemon;

impl ReclaimDaemon for NullReclaimDaemon {
    fn reclaim(&self, _fd: RawFd) -> Result<(), SurfaceError> {
        Ok(())
    }
    fn resume(&self, _fd: RawFd) -> Result<(), SurfaceError> {
        Ok(())
    }
}

lazy_static! {
    /// Set once, the first time any process-wide code resolves the reclaim
    /// daemon symbols, matching spec §5's "dlopen'd once per process,
    /// recorded in a static atomic flag".
    static ref RECLAIM_RESOLVED: AtomicBool = AtomicBool::new(false);
}

/// Mark the reclaim daemon as resolved (or not) for this process. Idempotent;
/// only the first call's outcome is recorded on a successful resolve.
pub fn mark_resolved(success: bool) {
    if success {
        RECLAIM_RESOLVED.store(true, Ordering::Release);
    }
}

pub fn is_resolved() -> bool {
    RECLAIM_RESOLVED.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// `RECLAIM_RESOLVED` is a process-wide static; run serially so this
    /// doesn't race a test in another module that also touches it.
    #[test]
    #[serial]
    fn resolved_flag_latches_true() {
        mark_resolved(true);
        assert!(is_resolved());
        mark_resolved(false);
        assert!(is_resolved());
    }
}

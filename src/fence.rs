//! Sync fence (spec §4.1): a file-descriptor handle to a future GPU completion
//! signal. Waiting and waking go through [`crate::futex`], since the kernel
//! sync-fence driver itself is an external collaborator (spec §1) that we
//! model rather than reimplement.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::SurfaceError;

/// Result of [`SyncFence::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Ok,
    Timeout,
    Error,
}

/// Current state of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Active,
    Signaled,
    Error,
}

/// Sentinel meaning "signal timestamp not yet available".
pub const SIGNAL_TIME_PENDING: i64 = i64::MIN;

struct Inner {
    fd: Option<RawFd>,
    /// Futex-style word: 0 while active, 1 once signaled. Waiters block on it
    /// the same way `Core::futex::futex_wait` blocks producers/consumers.
    signal_word: AtomicU32,
    signal_time_ns: AtomicI64,
    name: String,
}

/// A fence guarding a buffer's readiness. Cloning shares the same underlying
/// signal (it is reference-counted), matching the original's fd-duplication
/// semantics for `Dup()`.
#[derive(Clone)]
pub struct SyncFence {
    inner: std::sync::Arc<Inner>,
}

impl SyncFence {
    /// The distinguished invalid fence: no fd, compares equal to itself, and
    /// is always reported as already signaled so callers don't block on it.
    pub fn invalid() -> Self {
        let inner = Inner {
            fd: None,
            signal_word: AtomicU32::new(1),
            signal_time_ns: AtomicI64::new(SIGNAL_TIME_PENDING),
            name: "invalid".to_string(),
        };
        Self {
            inner: std::sync::Arc::new(inner),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.fd.is_some()
    }

    /// Construct a fence around a real fd that some external collaborator
    /// (allocator or kernel driver) produced. It starts unsignaled.
    pub fn from_fd(name: impl Into<String>, fd: RawFd) -> Self {
        let inner = Inner {
            fd: Some(fd),
            signal_word: AtomicU32::new(0),
            signal_time_ns: AtomicI64::new(SIGNAL_TIME_PENDING),
            name: name.into(),
        };
        Self {
            inner: std::sync::Arc::new(inner),
        }
    }

    /// Used by test/mock allocators and by [`merge`](Self::merge) to produce
    /// an already-resolved fence without a backing fd.
    pub fn signaled(name: impl Into<String>) -> Self {
        let fence = Self::from_fd(name, -1);
        fence.signal();
        fence
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn signal(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        self.inner.signal_time_ns.store(now, Ordering::Release);
        self.inner.signal_word.store(1, Ordering::Release);
        crate::futex::futex_wake(&self.inner.signal_word);
    }

    pub fn status(&self) -> FenceStatus {
        if !self.is_valid() {
            return FenceStatus::Signaled;
        }
        if self.inner.signal_word.load(Ordering::Acquire) == 1 {
            FenceStatus::Signaled
        } else {
            FenceStatus::Active
        }
    }

    /// Block for up to `timeout_ms` for the fence to signal. `0` polls once
    /// without blocking, matching spec §5's "Request with timeout=0 ... returns
    /// immediately" style semantics reused for fence waits.
    pub fn wait(&self, timeout_ms: i64) -> WaitResult {
        if self.status() == FenceStatus::Signaled {
            return WaitResult::Ok;
        }
        if !self.is_valid() {
            return WaitResult::Error;
        }
        if timeout_ms == 0 {
            return WaitResult::Timeout;
        }

        let deadline = if timeout_ms < 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        };

        loop {
            if self.inner.signal_word.load(Ordering::Acquire) == 1 {
                return WaitResult::Ok;
            }
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return if self.inner.signal_word.load(Ordering::Acquire) == 1 {
                        WaitResult::Ok
                    } else {
                        WaitResult::Timeout
                    };
                }
                let remaining_ms = (deadline - now).as_millis() as u64;
                crate::futex::futex_wait_timeout(&self.inner.signal_word, 0, remaining_ms);
            } else {
                crate::futex::futex_wait(&self.inner.signal_word, 0);
            }
        }
    }

    /// Nanosecond signal timestamp, or `None` while pending.
    pub fn signal_timestamp(&self) -> Option<i64> {
        let t = self.inner.signal_time_ns.load(Ordering::Acquire);
        if t == SIGNAL_TIME_PENDING {
            None
        } else {
            Some(t)
        }
    }

    /// Returns a fence referring to the same signal; conceptually a `dup()`
    /// of the underlying fd (the fd itself is owned by the allocator/driver
    /// that created it in the real system, so here it is a shared handle).
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Merge two fences into one that signals only once both have.
    /// A merge with one invalid operand degrades to the valid one, since an
    /// invalid fence is already considered signaled.
    pub fn merge(name: impl Into<String>, a: &SyncFence, b: &SyncFence) -> Self {
        if !a.is_valid() {
            return b.clone();
        }
        if !b.is_valid() {
            return a.clone();
        }
        let merged = Self::from_fd(name, -1);
        let (a, b, m) = (a.clone(), b.clone(), merged.clone());
        std::thread::spawn(move || {
            a.wait(-1);
            b.wait(-1);
            m.signal();
        });
        merged
    }
}

impl PartialEq for SyncFence {
    fn eq(&self, other: &Self) -> bool {
        if !self.is_valid() && !other.is_valid() {
            return true;
        }
        std::sync::Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for SyncFence {}

impl std::fmt::Debug for SyncFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncFence")
            .field("name", &self.inner.name)
            .field("valid", &self.is_valid())
            .field("status", &self.status())
            .finish()
    }
}

impl Default for SyncFence {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Serialized form: a validity flag plus, when valid, a duplicated fd.
/// Mirrors `SurfaceBuffer::WriteToMessageParcel`'s fd-passing discipline —
/// the sender keeps its fd and transfers a dup, the receiver owns the dup and
/// must close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WireFence {
    pub valid: bool,
    pub fd: RawFd,
}

/// Records a named fence's wait duration at `debug` level. The surviving
/// piece of the original engine's trace-sink integration for fences; full
/// trace-sink output is out of scope, so this just goes through `log`.
pub struct FenceTracker;

impl FenceTracker {
    pub fn wait(fence: &SyncFence, timeout_ms: i64) -> WaitResult {
        let start = Instant::now();
        let result = fence.wait(timeout_ms);
        log::debug!(
            "fence '{}' wait({timeout_ms}ms) took {:?} -> {:?}",
            fence.name(),
            start.elapsed(),
            result
        );
        result
    }
}

impl SyncFence {
    pub fn to_wire(&self) -> WireFence {
        match self.inner.fd {
            Some(fd) if self.is_valid() => WireFence { valid: true, fd },
            _ => WireFence {
                valid: false,
                fd: -1,
            },
        }
    }

    pub fn from_wire(name: impl Into<String>, wire: WireFence) -> Result<Self, SurfaceError> {
        if !wire.valid {
            return Ok(Self::invalid());
        }
        Ok(Self::from_fd(name, wire.fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_fence_is_already_signaled() {
        let fence = SyncFence::invalid();
        assert_eq!(fence.status(), FenceStatus::Signaled);
        assert_eq!(fence.wait(0), WaitResult::Ok);
    }

    #[test]
    fn merge_signals_once_both_operands_do() {
        let a = SyncFence::signaled("a");
        let b = SyncFence::signaled("b");
        let merged = SyncFence::merge("merged", &a, &b);
        assert_eq!(merged.wait(1000), WaitResult::Ok);
    }

    #[test]
    fn merge_with_one_invalid_operand_degrades_to_the_other() {
        let valid = SyncFence::signaled("valid");
        let merged = SyncFence::merge("merged", &valid, &SyncFence::invalid());
        assert_eq!(merged, valid);
    }

    #[test]
    fn wire_round_trip_preserves_validity() {
        let fence = SyncFence::invalid();
        let wire = fence.to_wire();
        let restored = SyncFence::from_wire("restored", wire).unwrap();
        assert!(!restored.is_valid());
    }

    #[test]
    fn tracker_reports_the_same_result_as_a_plain_wait() {
        let fence = SyncFence::signaled("tracked");
        assert_eq!(FenceTracker::wait(&fence, 0), WaitResult::Ok);
    }

    #[test]
    fn signal_timestamp_is_none_until_signaled() {
        let pending = SyncFence::from_fd("pending", -1);
        assert!(pending.signal_timestamp().is_none());
        let signaled = SyncFence::signaled("signaled");
        assert!(signaled.signal_timestamp().is_some());
    }

    #[test]
    fn dup_shares_the_same_signal_as_the_original() {
        let fence = SyncFence::signaled("original");
        let dupped = fence.dup();
        assert_eq!(dupped.status(), FenceStatus::Signaled);
        assert_eq!(dupped.signal_timestamp(), fence.signal_timestamp());
    }
}

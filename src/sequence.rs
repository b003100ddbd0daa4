//! Sequence-number and unique-queue-id generators (spec §3).
//!
//! Both are process-wide singletons: a single atomic counter behind a
//! `lazy_static`, never relying on static-destructor ordering for teardown
//! since there is nothing to tear down.

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Per-process identifier baked into the high bits of every sequence number
/// this process generates, so sequences never collide across processes that
/// happen to share a queue id space.
fn process_unique_id() -> u32 {
    lazy_static! {
        static ref PID_TAG: u32 = std::process::id();
    }
    *PID_TAG
}

/// Low 16 bits are a per-process counter that wraps; the high bits identify
/// the generating process. Matches spec §3's "Sequence number generator".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SequenceNumber(pub u32);

impl SequenceNumber {
    pub fn counter_bits(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn process_bits(self) -> u16 {
        ((self.0 >> 16) & 0xFFFF) as u16
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

struct SequenceGenerator {
    counter: AtomicU32,
    in_use: Mutex<std::collections::HashSet<u32>>,
}

lazy_static! {
    static ref SEQUENCE_GEN: SequenceGenerator = SequenceGenerator {
        counter: AtomicU32::new(0),
        in_use: Mutex::new(std::collections::HashSet::new()),
    };
}

/// Generate the next sequence number for a freshly constructed `SurfaceBuffer`.
pub fn next_sequence() -> SequenceNumber {
    let low = (SEQUENCE_GEN.counter.fetch_add(1, Ordering::Relaxed) & 0xFFFF) as u32;
    let seq = (process_unique_id() << 16) | low;
    SEQUENCE_GEN.in_use.lock().unwrap().insert(seq);
    SequenceNumber(seq)
}

/// Whether a sequence number is currently tracked as live by this process.
pub fn is_in_use(seq: SequenceNumber) -> bool {
    SEQUENCE_GEN.in_use.lock().unwrap().contains(&seq.0)
}

/// Release a sequence number back to the generator once its slot is destroyed.
pub fn release(seq: SequenceNumber) {
    SEQUENCE_GEN.in_use.lock().unwrap().remove(&seq.0);
}

/// 64-bit unique id: high 32 bits are the owning process id, low 32 bits are
/// a per-process queue counter (spec §3 "Unique queue id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct UniqueQueueId(pub u64);

impl std::fmt::Display for UniqueQueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

lazy_static! {
    static ref QUEUE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Generate the next unique queue id for a newly constructed `BufferQueue`.
pub fn next_queue_id() -> UniqueQueueId {
    let pid = std::process::id() as u64;
    let counter = QUEUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    UniqueQueueId((pid << 32) | (counter & 0xFFFF_FFFF))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic_in_low_bits() {
        let a = next_sequence();
        let b = next_sequence();
        assert_eq!(a.process_bits(), b.process_bits());
        assert_eq!(b.counter_bits().wrapping_sub(a.counter_bits()), 1);
    }

    #[test]
    fn in_use_tracks_release() {
        let seq = next_sequence();
        assert!(is_in_use(seq));
        release(seq);
        assert!(!is_in_use(seq));
    }

    #[test]
    fn queue_ids_embed_pid_in_high_bits() {
        let id = next_queue_id();
        assert_eq!((id.0 >> 32) as u32, std::process::id());
    }
}

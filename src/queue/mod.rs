//! `BufferQueue` (spec §4.3): the authoritative per-queue state and its
//! four-state slot machine.

pub mod listeners;

use crate::buffer::allocator::{BufferAllocator, RequestConfig};
use crate::buffer::SurfaceBuffer;
use crate::config::EngineConfig;
use crate::error::SurfaceError;
use crate::fence::SyncFence;
use crate::metadata::BufferExtraData;
use crate::sequence::{next_queue_id, SequenceNumber, UniqueQueueId};
use crate::transform::{Rect, ScalingMode, Transform};
use listeners::ListenerRegistries;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Released,
    Requested,
    Flushed,
    Acquired,
    Attached,
}

/// Damage/flush bookkeeping recorded by `FlushBuffer`.
#[derive(Debug, Clone)]
pub struct FlushRecord {
    pub timestamp: i64,
    pub damages: Vec<Rect>,
    pub acquire_fence: SyncFence,
    pub desired_present_timestamp: Option<i64>,
}

struct Slot {
    buffer: SurfaceBuffer,
    state: SlotState,
    last_fence: SyncFence,
    flush: Option<FlushRecord>,
    is_deleting: bool,
}

/// Everything protected by the queue's primary mutex (spec §5).
struct Inner {
    slots: HashMap<u32, Slot>,
    free_list: VecDeque<u32>,
    dirty_list: VecDeque<u32>,
    deleting_list: Vec<SequenceNumber>,
    producer_cache_clean_list: Vec<SequenceNumber>,
    queue_size: u32,
    default_width: u32,
    default_height: u32,
    default_usage: u64,
    transform: Transform,
    transform_hint: Transform,
    status_valid: bool,
    is_connected: bool,
    strict_disconnected: bool,
    last_flushed_seq: Option<u32>,
}

/// The authoritative per-queue state machine. Cloning a `BufferQueue` shares
/// the same underlying state (it is an `Arc` handle), the way a producer and
/// a consumer façade each hold a reference to one queue.
#[derive(Clone)]
pub struct BufferQueue {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    unique_id: UniqueQueueId,
    is_shared: bool,
    allocator: Arc<dyn BufferAllocator>,
    config: EngineConfig,
    inner: Mutex<Inner>,
    wait_req: Condvar,
    wait_attach: Condvar,
    listeners: ListenerRegistries,
}

impl BufferQueue {
    pub fn new(name: impl Into<String>, allocator: Arc<dyn BufferAllocator>, config: EngineConfig) -> Self {
        Self::new_internal(name, allocator, config, false)
    }

    /// A shared queue's `queueSize` is pinned to 1 (spec §3, §4.3
    /// `SetQueueSize`).
    pub fn new_shared(name: impl Into<String>, allocator: Arc<dyn BufferAllocator>, config: EngineConfig) -> Self {
        Self::new_internal(name, allocator, config, true)
    }

    fn new_internal(
        name: impl Into<String>,
        allocator: Arc<dyn BufferAllocator>,
        config: EngineConfig,
        is_shared: bool,
    ) -> Self {
        let queue_size = if is_shared { 1 } else { config.default_queue_size };
        let inner = Inner {
            slots: HashMap::new(),
            free_list: VecDeque::new(),
            dirty_list: VecDeque::new(),
            deleting_list: Vec::new(),
            producer_cache_clean_list: Vec::new(),
            queue_size,
            default_width: 0,
            default_height: 0,
            default_usage: 0,
            transform: Transform::NONE,
            transform_hint: Transform::NONE,
            status_valid: true,
            is_connected: false,
            strict_disconnected: false,
            last_flushed_seq: None,
        };
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                unique_id: next_queue_id(),
                is_shared,
                allocator,
                config,
                inner: Mutex::new(inner),
                wait_req: Condvar::new(),
                wait_attach: Condvar::new(),
                listeners: ListenerRegistries::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn unique_id(&self) -> UniqueQueueId {
        self.shared.unique_id
    }

    pub fn listeners(&self) -> &ListenerRegistries {
        &self.shared.listeners
    }

    pub fn connect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.is_connected = true;
        inner.strict_disconnected = false;
    }

    pub fn disconnect(&self) {
        self.shared.inner.lock().is_connected = false;
    }

    /// `CONNECT_STRICTLY` (spec §6, §8 scenario 6).
    pub fn connect_strictly(&self) {
        let mut inner = self.shared.inner.lock();
        inner.is_connected = true;
        inner.strict_disconnected = false;
    }

    /// `DISCONNECT_STRICTLY`: every subsequent producer request fails with
    /// `CONSUMER_DISCONNECTED` until a matching `connect_strictly`.
    pub fn disconnect_strictly(&self) {
        let mut inner = self.shared.inner.lock();
        inner.strict_disconnected = true;
        self.shared.wait_req.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().is_connected
    }

    /// `SetStatus(false)`: invalidates the queue and wakes every waiter so
    /// they observe `NO_CONSUMER` (spec §5 "Cancellation").
    pub fn set_status(&self, valid: bool) {
        let mut inner = self.shared.inner.lock();
        inner.status_valid = valid;
        self.shared.wait_req.notify_all();
        self.shared.wait_attach.notify_all();
    }

    pub fn queue_size(&self) -> u32 {
        self.shared.inner.lock().queue_size
    }

    pub fn default_usage(&self) -> u64 {
        self.shared.inner.lock().default_usage
    }

    pub fn set_default_usage(&self, usage: u64) {
        self.shared.inner.lock().default_usage = usage;
    }

    pub fn set_transform(&self, transform: Transform) -> Result<(), SurfaceError> {
        if !transform.is_valid() {
            return Err(SurfaceError::InvalidArguments);
        }
        self.shared.inner.lock().transform = transform;
        Ok(())
    }

    pub fn transform(&self) -> Transform {
        self.shared.inner.lock().transform
    }

    pub fn set_transform_hint(&self, transform: Transform) -> Result<(), SurfaceError> {
        if !transform.is_valid() {
            return Err(SurfaceError::InvalidArguments);
        }
        self.shared.inner.lock().transform_hint = transform;
        Ok(())
    }

    pub fn transform_hint(&self) -> Transform {
        self.shared.inner.lock().transform_hint
    }

    /// `SetQueueSize(n)` (spec §4.3, §8 boundary behaviours and scenario 3).
    pub fn set_queue_size(&self, n: u32) -> Result<(), SurfaceError> {
        if n == 0 || n > self.shared.config.max_queue_size {
            return Err(SurfaceError::InvalidArguments);
        }
        let n = if self.shared.is_shared { 1 } else { n };

        let mut inner = self.shared.inner.lock();
        let current = inner.queue_size;
        inner.queue_size = n;
        if n < current {
            let diff = (current - n) as usize;
            delete_buffers_locked(&mut inner, &self.shared.listeners, diff);
        } else if n > current {
            self.shared.wait_req.notify_all();
        }
        Ok(())
    }

    /// `RequestBuffer` (spec §4.3).
    pub fn request_buffer(
        &self,
        config: RequestConfig,
    ) -> Result<(SequenceNumber, SyncFence, Vec<SequenceNumber>), SurfaceError> {
        config.validate()?;

        let mut inner = self.shared.inner.lock();
        if !inner.status_valid || !self.shared.listeners.has_consumer_listener() {
            return Err(SurfaceError::NoConsumer);
        }
        if inner.strict_disconnected {
            return Err(SurfaceError::ConsumerDisconnected);
        }

        let deadline = if config.timeout_ms < 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(config.timeout_ms as u64))
        };

        loop {
            if self.shared.is_shared {
                if let Some(&seq) = inner.free_list.front() {
                    inner.free_list.pop_front();
                    return self.reuse_locked(&mut inner, seq, config);
                }
            } else if let Some(pos) = inner
                .free_list
                .iter()
                .position(|seq| inner.slots[seq].buffer.request_config == config)
            {
                let seq = inner.free_list.remove(pos).unwrap();
                return self.reuse_locked(&mut inner, seq, config);
            }

            if (inner.slots.len() as u32) < inner.queue_size {
                return self.alloc_locked(&mut inner, config);
            }

            if let Some(&seq) = inner.free_list.front() {
                inner.free_list.pop_front();
                return self.reuse_locked(&mut inner, seq, config);
            }

            if !inner.status_valid {
                return Err(SurfaceError::NoConsumer);
            }

            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(SurfaceError::NoBuffer);
                    }
                    let timed_out = self
                        .shared
                        .wait_req
                        .wait_for(&mut inner, d - now)
                        .timed_out();
                    if timed_out && inner.free_list.is_empty() && (inner.slots.len() as u32) >= inner.queue_size {
                        return Err(SurfaceError::NoBuffer);
                    }
                }
                None => {
                    self.shared.wait_req.wait(&mut inner);
                }
            }
        }
    }

    fn alloc_locked(
        &self,
        inner: &mut Inner,
        config: RequestConfig,
    ) -> Result<(SequenceNumber, SyncFence, Vec<SequenceNumber>), SurfaceError> {
        let buffer = SurfaceBuffer::alloc(self.shared.allocator.as_ref(), config, None)?;
        let sequence = buffer.sequence;
        inner.slots.insert(
            sequence.0,
            Slot {
                buffer,
                state: SlotState::Requested,
                last_fence: SyncFence::invalid(),
                flush: None,
                is_deleting: false,
            },
        );
        let deleting = std::mem::take(&mut inner.deleting_list);
        Ok((sequence, SyncFence::invalid(), deleting))
    }

    fn reuse_locked(
        &self,
        inner: &mut Inner,
        seq: u32,
        config: RequestConfig,
    ) -> Result<(SequenceNumber, SyncFence, Vec<SequenceNumber>), SurfaceError> {
        let needs_realloc = inner.slots[&seq].buffer.request_config != config;
        if needs_realloc {
            let previous = &inner.slots[&seq].buffer;
            let mut new_buffer =
                SurfaceBuffer::alloc(self.shared.allocator.as_ref(), config, Some(previous))?;
            new_buffer.set_fence(inner.slots[&seq].last_fence.clone());
            let sequence = new_buffer.sequence;
            delete_slot_locked(inner, &self.shared.listeners, seq);
            inner.slots.insert(
                sequence.0,
                Slot {
                    buffer: new_buffer,
                    state: SlotState::Requested,
                    last_fence: SyncFence::invalid(),
                    flush: None,
                    is_deleting: false,
                },
            );
            let deleting = std::mem::take(&mut inner.deleting_list);
            return Ok((sequence, SyncFence::invalid(), deleting));
        }

        let slot = inner.slots.get_mut(&seq).unwrap();
        slot.buffer.color_gamut = config.color_gamut;
        slot.buffer.transform = config.transform;
        slot.state = SlotState::Requested;
        let release_fence = slot.last_fence.clone();
        let sequence = slot.buffer.sequence;
        let deleting = std::mem::take(&mut inner.deleting_list);
        Ok((sequence, release_fence, deleting))
    }

    /// `FlushBuffer` (spec §4.3).
    pub fn flush_buffer(
        &self,
        seq: SequenceNumber,
        extra_data: BufferExtraData,
        acquire_fence: SyncFence,
        damages: Vec<Rect>,
        timestamp: i64,
        desired_present_timestamp: Option<i64>,
    ) -> Result<(), SurfaceError> {
        if damages.iter().any(|r| !r.is_valid()) {
            return Err(SurfaceError::InvalidArguments);
        }

        let mut inner = self.shared.inner.lock();
        if !inner.status_valid {
            return Err(SurfaceError::NoConsumer);
        }
        let slot = inner.slots.get_mut(&seq.0).ok_or(SurfaceError::NoEntry)?;
        if !matches!(slot.state, SlotState::Requested | SlotState::Attached) {
            return Err(SurfaceError::NoEntry);
        }

        if slot.is_deleting {
            delete_slot_locked(&mut inner, &self.shared.listeners, seq.0);
            return Ok(());
        }

        let slot = inner.slots.get_mut(&seq.0).unwrap();
        slot.buffer.extra_data = extra_data;
        slot.state = SlotState::Flushed;
        let needs_flush_cache = slot.buffer.handle().usage & crate::buffer::allocator::usage::CPU_WRITE != 0;
        let (width, height) = (slot.buffer.handle().width, slot.buffer.handle().height);
        slot.flush = Some(FlushRecord {
            timestamp,
            damages,
            acquire_fence: acquire_fence.clone(),
            desired_present_timestamp,
        });
        if needs_flush_cache {
            let _ = slot.buffer.flush_cache(self.shared.allocator.as_ref());
        }

        inner.dirty_list.push_back(seq.0);
        inner.last_flushed_seq = Some(seq.0);

        drop(inner);
        self.shared.listeners.fire_fence_submit(&acquire_fence);
        self.shared.listeners.fire_buffer_available();

        if let Some(dir) = std::path::Path::new(&self.shared.config.dump_sentinel_path).parent() {
            if let Err(e) = crate::dump::maybe_dump_to_file(self, &self.shared.config, dir, width, height) {
                log::warn!("dump-to-file failed for '{}': {e}", self.name());
            }
        }
        Ok(())
    }

    /// Basic `AcquireBuffer`: pop the dirty-list head.
    pub fn acquire_buffer(&self) -> Result<(SequenceNumber, SyncFence, i64, Vec<Rect>), SurfaceError> {
        self.acquire_buffer_impl(None)
    }

    /// Timestamp-aware `AcquireBuffer` (spec §4.3, drop-old-frames policy).
    pub fn acquire_buffer_with_present_timestamp(
        &self,
        expect_present_ts: i64,
    ) -> Result<(SequenceNumber, SyncFence, i64, Vec<Rect>), SurfaceError> {
        self.acquire_buffer_impl(Some(expect_present_ts))
    }

    fn acquire_buffer_impl(
        &self,
        expect_present_ts: Option<i64>,
    ) -> Result<(SequenceNumber, SyncFence, i64, Vec<Rect>), SurfaceError> {
        const ONE_SECOND_NS: i64 = 1_000_000_000;
        let mut inner = self.shared.inner.lock();

        loop {
            let Some(&seq) = inner.dirty_list.front() else {
                return Err(SurfaceError::NoBuffer);
            };

            if let Some(expect_ts) = expect_present_ts {
                let desired = inner.slots[&seq].flush.as_ref().and_then(|f| f.desired_present_timestamp);
                if let Some(desired) = desired {
                    if desired.saturating_add(ONE_SECOND_NS) < expect_ts {
                        // Too old: drop it, releasing with the acquire fence as the release fence.
                        inner.dirty_list.pop_front();
                        let acquire_fence = inner.slots[&seq].flush.as_ref().unwrap().acquire_fence.clone();
                        release_dropped_locked(&mut inner, &self.shared.listeners, seq, acquire_fence);
                        continue;
                    }
                    if desired > expect_ts {
                        return Err(SurfaceError::NoBuffer);
                    }
                }
            }

            inner.dirty_list.pop_front();
            let slot = inner.slots.get_mut(&seq).unwrap();
            slot.state = SlotState::Acquired;
            let flush = slot.flush.clone_for_acquire();
            return Ok((slot.buffer.sequence, flush.0, flush.1, flush.2));
        }
    }

    /// `ReleaseBuffer` (spec §4.3).
    pub fn release_buffer(&self, seq: SequenceNumber, release_fence: SyncFence) -> Result<(), SurfaceError> {
        let mut inner = self.shared.inner.lock();
        let slot = inner.slots.get_mut(&seq.0).ok_or(SurfaceError::NoEntry)?;
        if !matches!(slot.state, SlotState::Acquired | SlotState::Attached) {
            return Err(SurfaceError::InvalidOperating);
        }
        slot.state = SlotState::Released;
        slot.last_fence = release_fence.clone();

        // Fired while still under the lock, like `delete_slot_locked`'s
        // `fire_buffer_deleted`: the listener needs a `&SurfaceBuffer` and
        // the slot (hence the buffer) isn't owned outside it.
        self.shared.listeners.fire_buffer_released(&slot.buffer, &release_fence);

        let is_deleting = slot.is_deleting;
        if is_deleting {
            delete_slot_locked(&mut inner, &self.shared.listeners, seq.0);
        } else {
            inner.free_list.push_back(seq.0);
        }
        drop(inner);

        self.shared.wait_req.notify_all();
        Ok(())
    }

    /// `AttachBuffer` (spec §4.3).
    pub fn attach_buffer(
        &self,
        incoming: SurfaceBuffer,
        timeout_ms: i64,
    ) -> Result<SequenceNumber, SurfaceError> {
        let mut inner = self.shared.inner.lock();
        let seq = incoming.sequence;

        if inner.slots.contains_key(&seq.0) {
            let deadline = if timeout_ms < 0 {
                None
            } else {
                Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
            };
            loop {
                if inner.slots[&seq.0].state == SlotState::Released {
                    break;
                }
                match deadline {
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            return Err(SurfaceError::InvalidOperating);
                        }
                        self.shared.wait_attach.wait_for(&mut inner, d - now);
                    }
                    None => self.shared.wait_attach.wait(&mut inner),
                }
            }
            inner.free_list.retain(|&s| s != seq.0);
            inner.slots.get_mut(&seq.0).unwrap().state = SlotState::Attached;
            return Ok(seq);
        }

        if inner.slots.len() as u32 + 1 > inner.queue_size {
            let room = (inner.free_list.len() + inner.dirty_list.len()) as u32;
            let needed = inner.slots.len() as u32 + 1 - inner.queue_size;
            if room < needed {
                return Err(SurfaceError::OutOfRange);
            }
            delete_buffers_locked(&mut inner, &self.shared.listeners, needed as usize);
        }

        inner.slots.insert(
            seq.0,
            Slot {
                buffer: incoming,
                state: SlotState::Attached,
                last_fence: SyncFence::invalid(),
                flush: None,
                is_deleting: false,
            },
        );
        Ok(seq)
    }

    /// `DetachBuffer`.
    pub fn detach_buffer(&self, seq: SequenceNumber, from_producer: bool) -> Result<(), SurfaceError> {
        let mut inner = self.shared.inner.lock();
        let expected = if from_producer {
            SlotState::Requested
        } else {
            SlotState::Acquired
        };
        let slot = inner.slots.get(&seq.0).ok_or(SurfaceError::NoEntry)?;
        if slot.state != expected {
            return Err(SurfaceError::InvalidOperating);
        }

        inner.slots.remove(&seq.0);
        inner.deleting_list.push(seq);
        drop(inner);
        self.shared.listeners.fire_buffer_deleted(seq);
        Ok(())
    }

    /// `CancelBuffer`.
    pub fn cancel_buffer(&self, seq: SequenceNumber) -> Result<(), SurfaceError> {
        let mut inner = self.shared.inner.lock();
        let slot = inner.slots.get_mut(&seq.0).ok_or(SurfaceError::NoEntry)?;
        if !matches!(slot.state, SlotState::Requested | SlotState::Attached) {
            return Err(SurfaceError::InvalidOperating);
        }
        slot.state = SlotState::Released;
        inner.free_list.push_back(seq.0);
        drop(inner);
        self.shared.wait_req.notify_all();
        Ok(())
    }

    /// `CleanCache` / `GoBackground` / `OnConsumerDied` share the same
    /// "clear everything" behaviour; the enum selects which consumer event
    /// fires afterward (spec §4.3).
    pub fn clean_cache(&self) {
        self.clear_all();
        self.shared.listeners.fire_clean_cache();
    }

    pub fn go_background(&self) {
        self.clear_all();
        self.shared.listeners.fire_go_background();
    }

    pub fn on_consumer_died(&self) {
        self.clear_all();
    }

    fn clear_all(&self) {
        let mut inner = self.shared.inner.lock();
        let sequences: Vec<u32> = inner.slots.keys().copied().collect();
        for seq in sequences {
            inner.slots.remove(&seq);
        }
        inner.free_list.clear();
        inner.dirty_list.clear();
        inner.deleting_list.clear();
        inner.producer_cache_clean_list.clear();
        inner.last_flushed_seq = None;
        drop(inner);
        self.shared.wait_req.notify_all();
        self.shared.wait_attach.notify_all();
    }

    /// Snapshot of a slot's buffer state needed to serialize it onto the wire
    /// (spec §4.4/§4.5): the server sends the full buffer only the first time
    /// a producer connection sees a given sequence.
    pub fn buffer_snapshot(
        &self,
        seq: SequenceNumber,
    ) -> Option<(
        crate::buffer::allocator::BufferHandle,
        crate::metadata::MetadataMap,
        BufferExtraData,
        RequestConfig,
    )> {
        let inner = self.shared.inner.lock();
        let slot = inner.slots.get(&seq.0)?;
        Some((
            *slot.buffer.handle(),
            slot.buffer.metadata().clone(),
            slot.buffer.extra_data.clone(),
            slot.buffer.request_config,
        ))
    }

    /// `GetLastFlushedBuffer` (spec §4.3). Refuses `PROTECTED` buffers.
    pub fn get_last_flushed_buffer_sequence(&self) -> Result<(SequenceNumber, SyncFence), SurfaceError> {
        let inner = self.shared.inner.lock();
        let seq = inner.last_flushed_seq.ok_or(SurfaceError::NoBuffer)?;
        let slot = inner.slots.get(&seq).ok_or(SurfaceError::NoEntry)?;
        if slot.buffer.handle().usage & crate::buffer::allocator::usage::PROTECTED != 0 {
            return Err(SurfaceError::NoPermission);
        }
        let fence = slot
            .flush
            .as_ref()
            .map(|f| f.acquire_fence.clone())
            .unwrap_or_else(SyncFence::invalid);
        Ok((slot.buffer.sequence, fence))
    }

    pub fn set_scaling_mode(&self, mode: ScalingMode) {
        // Queue-wide default scaling mode (SET_SCALING_MODE); applied to
        // every future slot at allocation time via the caller-supplied config
        // in practice. Stored per-slot below for SET_SCALING_MODE_V2.
        let mut inner = self.shared.inner.lock();
        for slot in inner.slots.values_mut() {
            slot.buffer.scaling_mode = mode;
        }
    }

    pub fn set_scaling_mode_for_sequence(&self, seq: SequenceNumber, mode: ScalingMode) -> Result<(), SurfaceError> {
        let mut inner = self.shared.inner.lock();
        let slot = inner.slots.get_mut(&seq.0).ok_or(SurfaceError::NoEntry)?;
        slot.buffer.scaling_mode = mode;
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.shared.inner.lock().slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.shared.inner.lock().free_list.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.shared.inner.lock().dirty_list.len()
    }

    /// Native dump (spec §6): a multi-line textual summary.
    pub fn dump(&self) -> String {
        let inner = self.shared.inner.lock();
        let mut out = format!(
            "BufferQueue {{ name: {}, id: {}, default: {}x{}, queue_size: {}, used: {}, free: {}, dirty: {} }}\n",
            self.shared.name,
            self.shared.unique_id,
            inner.default_width,
            inner.default_height,
            inner.queue_size,
            inner.slots.len(),
            inner.free_list.len(),
            inner.dirty_list.len(),
        );
        let mut total_kib = 0u64;
        for (seq, slot) in inner.slots.iter() {
            let kib = slot.buffer.handle().size_bytes / 1024;
            total_kib += kib;
            out.push_str(&format!(
                "  slot {seq:#010x}: state={:?} size={}x{} {}KiB\n",
                slot.state,
                slot.buffer.width(),
                slot.buffer.height(),
                kib,
            ));
        }
        out.push_str(&format!("  total: {total_kib}KiB\n"));
        out
    }
}

/// Returned by `FlushRecord` when acquiring; bundles fence/timestamp/damages.
trait CloneForAcquire {
    fn clone_for_acquire(&self) -> (SyncFence, i64, Vec<Rect>);
}

impl CloneForAcquire for Option<FlushRecord> {
    fn clone_for_acquire(&self) -> (SyncFence, i64, Vec<Rect>) {
        match self {
            Some(f) => (f.acquire_fence.clone(), f.timestamp, f.damages.clone()),
            None => (SyncFence::invalid(), 0, Vec::new()),
        }
    }
}

fn delete_slot_locked(inner: &mut Inner, listeners: &ListenerRegistries, seq: u32) {
    inner.slots.remove(&seq);
    inner.free_list.retain(|&s| s != seq);
    inner.dirty_list.retain(|&s| s != seq);
    inner.deleting_list.push(SequenceNumber(seq));
    listeners.fire_buffer_deleted(SequenceNumber(seq));
}

fn release_dropped_locked(
    inner: &mut Inner,
    listeners: &ListenerRegistries,
    seq: u32,
    release_fence: SyncFence,
) {
    if let Some(slot) = inner.slots.get_mut(&seq) {
        slot.state = SlotState::Released;
        slot.last_fence = release_fence.clone();
        listeners.fire_buffer_released(&slot.buffer, &release_fence);
        let is_deleting = slot.is_deleting;
        if is_deleting {
            delete_slot_locked(inner, listeners, seq);
        } else {
            inner.free_list.push_back(seq);
        }
    }
}

/// `SetQueueSize` shrink / `AttachBuffer` room-making path (spec §4.3):
/// prefer free-list heads, then dirty-list heads, then mark still-held slots
/// `isDeleting=true`.
fn delete_buffers_locked(inner: &mut Inner, listeners: &ListenerRegistries, mut count: usize) {
    while count > 0 {
        if let Some(seq) = inner.free_list.pop_front() {
            delete_slot_locked(inner, listeners, seq);
            count -= 1;
            continue;
        }
        if let Some(seq) = inner.dirty_list.pop_front() {
            delete_slot_locked(inner, listeners, seq);
            count -= 1;
            continue;
        }
        // Nothing free to delete outright: mark the oldest still-held slot
        // for deletion on its next release/flush.
        let candidate = inner
            .slots
            .iter()
            .find(|(_, s)| !s.is_deleting)
            .map(|(seq, _)| *seq);
        match candidate {
            Some(seq) => {
                inner.slots.get_mut(&seq).unwrap().is_deleting = true;
                count -= 1;
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::{usage, MockAllocator};
    use listeners::ConsumerListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(Arc<AtomicUsize>);
    impl ConsumerListener for CountingListener {
        fn on_buffer_available(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue_with_listener() -> (BufferQueue, Arc<AtomicUsize>) {
        let queue = BufferQueue::new("test", Arc::new(MockAllocator::new()), EngineConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));
        queue
            .listeners()
            .register_consumer_listener(Arc::new(CountingListener(counter.clone())));
        (queue, counter)
    }

    fn cfg() -> RequestConfig {
        RequestConfig {
            width: 256,
            height: 256,
            format: 1,
            usage: usage::CPU_WRITE,
            ..Default::default()
        }
    }

    #[test]
    fn basic_round_trip() {
        // spec §8 scenario 1
        let (queue, available) = queue_with_listener();
        queue.set_queue_size(3).unwrap();

        let (seq1, _, _) = queue.request_buffer(cfg()).unwrap();
        queue
            .flush_buffer(
                seq1,
                BufferExtraData::new(),
                SyncFence::invalid(),
                vec![Rect { x: 0, y: 0, w: 256, h: 256 }],
                1000,
                None,
            )
            .unwrap();
        assert_eq!(available.load(Ordering::SeqCst), 1);

        let (acquired, _, ts, _) = queue.acquire_buffer().unwrap();
        assert_eq!(acquired, seq1);
        assert_eq!(ts, 1000);

        queue.release_buffer(acquired, SyncFence::invalid()).unwrap();
        let (seq2, _, _) = queue.request_buffer(cfg()).unwrap();
        assert_eq!(seq1, seq2, "freed slot should be reused for an identical config");
    }

    #[test]
    fn no_consumer_without_listener() {
        let queue = BufferQueue::new("test", Arc::new(MockAllocator::new()), EngineConfig::default());
        assert_eq!(queue.request_buffer(cfg()).unwrap_err(), SurfaceError::NoConsumer);
    }

    #[test]
    fn request_with_zero_timeout_when_full_returns_no_buffer() {
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(1).unwrap();
        let _ = queue.request_buffer(cfg()).unwrap();
        let mut full_cfg = cfg();
        full_cfg.width = 512; // force a cache miss on config match
        full_cfg.timeout_ms = 0;
        assert_eq!(
            queue.request_buffer(full_cfg).unwrap_err(),
            SurfaceError::NoBuffer
        );
    }

    #[test]
    fn acquire_on_empty_dirty_list_is_no_buffer() {
        let (queue, _) = queue_with_listener();
        assert_eq!(queue.acquire_buffer().unwrap_err(), SurfaceError::NoBuffer);
    }

    #[test]
    fn drop_old_frames_policy() {
        // spec §8 scenario 2
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(3).unwrap();

        const ONE_SEC: i64 = 1_000_000_000;
        let t = 10 * ONE_SEC;
        let present_times = [t - 2 * ONE_SEC, t - (3 * ONE_SEC) / 2, t];

        let mut seqs = Vec::new();
        for (i, &pts) in present_times.iter().enumerate() {
            let (seq, _, _) = queue.request_buffer(cfg()).unwrap();
            queue
                .flush_buffer(
                    seq,
                    BufferExtraData::new(),
                    SyncFence::invalid(),
                    vec![],
                    1000 + i as i64,
                    Some(pts),
                )
                .unwrap();
            seqs.push(seq);
        }

        let (acquired, _, _, _) = queue.acquire_buffer_with_present_timestamp(t).unwrap();
        assert_eq!(acquired, seqs[2]);

        assert_eq!(
            queue.acquire_buffer_with_present_timestamp(t).unwrap_err(),
            SurfaceError::NoBuffer
        );
    }

    #[test]
    fn queue_shrink_deletes_held_slots() {
        // spec §8 scenario 3
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(3).unwrap();

        let mut seqs = Vec::new();
        for i in 0..3 {
            let (seq, _, _) = queue.request_buffer(cfg()).unwrap();
            queue
                .flush_buffer(seq, BufferExtraData::new(), SyncFence::invalid(), vec![], i, None)
                .unwrap();
            let (acquired, _, _, _) = queue.acquire_buffer().unwrap();
            assert_eq!(acquired, seq);
            seqs.push(seq);
        }

        queue.set_queue_size(1).unwrap();

        for seq in &seqs {
            let _ = queue.release_buffer(*seq, SyncFence::invalid());
        }
        assert!(queue.slot_count() <= 1);
    }

    #[test]
    fn set_queue_size_bounds() {
        let (queue, _) = queue_with_listener();
        assert_eq!(queue.set_queue_size(0).unwrap_err(), SurfaceError::InvalidArguments);
        assert_eq!(
            queue
                .set_queue_size(crate::config::SURFACE_MAX_QUEUE_SIZE + 1)
                .unwrap_err(),
            SurfaceError::InvalidArguments
        );
        assert!(queue.set_queue_size(1).is_ok());
    }

    #[test]
    fn cancel_buffer_twice_fails_second_time() {
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(3).unwrap();
        let (seq, _, _) = queue.request_buffer(cfg()).unwrap();
        queue.cancel_buffer(seq).unwrap();
        // The slot is now RELEASED and sitting in the free list, so a second
        // cancel on the same sequence must fail (spec §8 idempotence law);
        // reusing it via RequestBuffer first makes the contract explicit.
        let (seq2, _, _) = queue.request_buffer(cfg()).unwrap();
        assert_eq!(seq, seq2);
        queue.cancel_buffer(seq2).unwrap();
        assert_eq!(
            queue.cancel_buffer(seq2).unwrap_err(),
            SurfaceError::InvalidOperating
        );
    }

    #[test]
    fn strict_disconnect_blocks_requests() {
        // spec §8 scenario 6
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(1).unwrap();
        queue.disconnect_strictly();
        assert_eq!(
            queue.request_buffer(cfg()).unwrap_err(),
            SurfaceError::ConsumerDisconnected
        );
        queue.connect_strictly();
        assert!(queue.request_buffer(cfg()).is_ok());
    }

    #[test]
    fn set_status_false_makes_the_queue_report_no_consumer() {
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(1).unwrap();
        let (seq, ..) = queue.request_buffer(cfg()).unwrap();
        queue.cancel_buffer(seq).unwrap();

        queue.set_status(false);
        assert_eq!(queue.request_buffer(cfg()).unwrap_err(), SurfaceError::NoConsumer);

        queue.set_status(true);
        assert!(queue.request_buffer(cfg()).is_ok());
    }

    #[test]
    fn dirty_count_tracks_flushed_but_unacquired_buffers() {
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(1).unwrap();
        assert_eq!(queue.dirty_count(), 0);
        let (seq, ..) = queue.request_buffer(cfg()).unwrap();
        queue
            .flush_buffer(seq, BufferExtraData::new(), SyncFence::invalid(), vec![], 1, None)
            .unwrap();
        assert_eq!(queue.dirty_count(), 1);
        queue.acquire_buffer().unwrap();
        assert_eq!(queue.dirty_count(), 0);
    }

    #[test]
    fn release_buffer_fires_the_producer_release_listener() {
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(1).unwrap();
        let (seq, ..) = queue.request_buffer(cfg()).unwrap();
        queue
            .flush_buffer(seq, BufferExtraData::new(), SyncFence::invalid(), vec![], 1, None)
            .unwrap();
        let (acquired, fence, ..) = queue.acquire_buffer().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        queue
            .listeners()
            .add_producer_release_listener(listeners::ProducerReleaseListener::WithFence(Arc::new(
                move |_buffer, _fence| {
                    counted.fetch_add(1, Ordering::SeqCst);
                },
            )));

        queue.release_buffer(acquired, fence).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn protected_buffer_refused_from_get_last_flushed() {
        let (queue, _) = queue_with_listener();
        queue.set_queue_size(1).unwrap();
        let mut protected_cfg = cfg();
        protected_cfg.usage |= usage::PROTECTED;
        let (seq, _, _) = queue.request_buffer(protected_cfg).unwrap();
        queue
            .flush_buffer(seq, BufferExtraData::new(), SyncFence::invalid(), vec![], 1, None)
            .unwrap();
        assert_eq!(
            queue.get_last_flushed_buffer_sequence().unwrap_err(),
            SurfaceError::NoPermission
        );
    }
}

//! `ProducerSurface` (spec §4.5): the producer-side façade over a
//! [`BufferClientProducer`]. Holds the remote connection plus a local
//! `slotCache: seq -> SurfaceBuffer` so a buffer handle only crosses the wire
//! once per slot lifetime.

use crate::buffer::allocator::RequestConfig;
use crate::buffer::parcel::TrustingFdReader;
use crate::buffer::SurfaceBuffer;
use crate::error::SurfaceError;
use crate::fence::SyncFence;
use crate::producer::ipc::BufferClientProducer;
use crate::sequence::SequenceNumber;
use crate::transform::{ColorGamut, Rect, ScalingMode, Transform};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Window-config overrides a caller can stage before `RequestBuffer`
/// (spec §4.5: "window-config overrides (width/height/stride/format/usage/
/// timeout/colorGamut/transform)").
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub stride_alignment: u32,
    pub format: u32,
    pub usage: u64,
    pub timeout_ms: i64,
    pub color_gamut: ColorGamut,
    pub transform: Transform,
}

impl Default for WindowConfig {
    fn default() -> Self {
        let cfg = RequestConfig::default();
        Self {
            width: cfg.width,
            height: cfg.height,
            stride_alignment: cfg.stride_alignment,
            format: cfg.format,
            usage: cfg.usage,
            timeout_ms: cfg.timeout_ms,
            color_gamut: cfg.color_gamut,
            transform: cfg.transform,
        }
    }
}

impl WindowConfig {
    fn to_request_config(self, size_override: Option<(u32, u32)>) -> RequestConfig {
        let (width, height) = size_override.unwrap_or((self.width, self.height));
        RequestConfig {
            width,
            height,
            format: self.format,
            usage: self.usage,
            stride_alignment: self.stride_alignment,
            timeout_ms: self.timeout_ms,
            color_gamut: self.color_gamut,
            transform: self.transform,
        }
    }
}

pub type UserDataListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Producer-side façade (spec §4.5). Not `Clone`: a `NativeWindow` wraps one
/// in an `Arc` and hands out a non-owning back-pointer rather than cloning it
/// (spec §4.4 "Cyclic references").
pub struct ProducerSurface {
    client: Arc<BufferClientProducer>,
    slot_cache: Mutex<HashMap<u32, SurfaceBuffer>>,
    window_config: Mutex<WindowConfig>,
    request_size_override: Mutex<Option<(u32, u32)>>,
    transform_hint: Mutex<Transform>,
    is_disconnected: AtomicBool,
    user_data: Mutex<HashMap<String, String>>,
    user_data_listeners: Mutex<HashMap<String, UserDataListener>>,
}

impl ProducerSurface {
    pub fn new(client: Arc<BufferClientProducer>) -> Self {
        Self {
            client,
            slot_cache: Mutex::new(HashMap::new()),
            window_config: Mutex::new(WindowConfig::default()),
            request_size_override: Mutex::new(None),
            transform_hint: Mutex::new(Transform::NONE),
            is_disconnected: AtomicBool::new(true),
            user_data: Mutex::new(HashMap::new()),
            user_data_listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_window_config(&self, config: WindowConfig) {
        *self.window_config.lock() = config;
    }

    /// Client-side stretch hint applied on top of the window config for the
    /// next `RequestBuffer` only (spec §4.5 "request width/height overrides").
    pub fn set_request_size(&self, width: u32, height: u32) {
        *self.request_size_override.lock() = Some((width, height));
    }

    pub fn clear_request_size(&self) {
        *self.request_size_override.lock() = None;
    }

    fn effective_config(&self) -> RequestConfig {
        let size = *self.request_size_override.lock();
        self.window_config.lock().to_request_config(size)
    }

    fn evict(&self, sequences: &[SequenceNumber]) {
        let mut cache = self.slot_cache.lock();
        for seq in sequences {
            cache.remove(&seq.0);
        }
    }

    /// `RequestBuffer` (spec §4.5). On the first request for a slot the
    /// remote ships the full buffer and it is cached here; on a later
    /// request for the same slot the remote answers `buffer=null` and the
    /// cached copy is reused. Returns the requested sequence, the release
    /// fence for whatever buffer previously occupied that slot, and whether
    /// the queue is still connected.
    pub fn request_buffer(&self) -> Result<(SequenceNumber, SyncFence, bool), SurfaceError> {
        if self.is_disconnected.load(Ordering::Acquire) {
            return Err(SurfaceError::ConsumerDisconnected);
        }
        let config = self.effective_config();
        let (sequence, wire_buffer, release_fence, deleting, is_connected) =
            self.client.request_buffer(config)?;

        self.evict(&deleting);

        let mut cache = self.slot_cache.lock();
        match wire_buffer {
            Some(wire) => {
                let (seq, handle, metadata, extra_data, cfg) =
                    crate::buffer::parcel::read_from_parcel(&wire, &TrustingFdReader)?
                        .ok_or(SurfaceError::InvalidArguments)?;
                cache.insert(
                    seq.0,
                    SurfaceBuffer::from_wire_parts(seq, handle, metadata, extra_data, cfg),
                );
            }
            None if !cache.contains_key(&sequence.0) => {
                // The remote says we already hold this slot's buffer, but we
                // don't: either a cache-eviction race or a protocol bug on
                // the remote side (spec §4.5's reuse contract assumes the two
                // sides never disagree about the cache's contents).
                return Err(SurfaceError::NoEntry);
            }
            None => {}
        }
        drop(cache);

        Ok((sequence, release_fence, is_connected))
    }

    /// Run `f` against the cached buffer for `sequence`, typically to write
    /// pixels or attach metadata before `FlushBuffer`.
    pub fn with_buffer<R>(
        &self,
        sequence: SequenceNumber,
        f: impl FnOnce(&mut SurfaceBuffer) -> R,
    ) -> Result<R, SurfaceError> {
        let mut cache = self.slot_cache.lock();
        let buffer = cache.get_mut(&sequence.0).ok_or(SurfaceError::NoEntry)?;
        Ok(f(buffer))
    }

    /// `FlushBuffer`. `extra_data` is read from the cached buffer so callers
    /// don't have to keep a second copy around.
    pub fn flush_buffer(
        &self,
        sequence: SequenceNumber,
        acquire_fence: &SyncFence,
        damages: Vec<Rect>,
        timestamp: i64,
        desired_present_timestamp: Option<i64>,
    ) -> Result<(), SurfaceError> {
        let extra_data = {
            let cache = self.slot_cache.lock();
            cache
                .get(&sequence.0)
                .ok_or(SurfaceError::NoEntry)?
                .extra_data
                .clone()
        };
        self.client.flush_buffer(
            sequence,
            extra_data,
            acquire_fence,
            damages,
            timestamp,
            desired_present_timestamp,
        )
    }

    pub fn cancel_buffer(&self, sequence: SequenceNumber) -> Result<(), SurfaceError> {
        self.client.cancel_buffer(sequence)
    }

    /// `AttachBuffer`: hands the remote a buffer this surface already owns
    /// (e.g. migrated from another producer) and caches it under the
    /// sequence the remote assigns.
    pub fn attach_buffer(&self, buffer: SurfaceBuffer, timeout_ms: i64) -> Result<SequenceNumber, SurfaceError> {
        let sequence = self.client.attach_buffer(&buffer, timeout_ms)?;
        self.slot_cache.lock().insert(sequence.0, buffer);
        Ok(sequence)
    }

    pub fn detach_buffer(&self, sequence: SequenceNumber) -> Result<SurfaceBuffer, SurfaceError> {
        self.client.detach_buffer(sequence, true)?;
        self.slot_cache
            .lock()
            .remove(&sequence.0)
            .ok_or(SurfaceError::NoEntry)
    }

    pub fn connect(&self) -> Result<(), SurfaceError> {
        self.client.connect()?;
        self.is_disconnected.store(false, Ordering::Release);
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), SurfaceError> {
        self.client.disconnect()?;
        self.is_disconnected.store(true, Ordering::Release);
        self.slot_cache.lock().clear();
        Ok(())
    }

    pub fn connect_strictly(&self) -> Result<(), SurfaceError> {
        self.client.connect_strictly()?;
        self.is_disconnected.store(false, Ordering::Release);
        Ok(())
    }

    pub fn disconnect_strictly(&self) -> Result<(), SurfaceError> {
        self.client.disconnect_strictly()?;
        self.is_disconnected.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_disconnected(&self) -> bool {
        self.is_disconnected.load(Ordering::Acquire)
    }

    pub fn set_transform(&self, transform: Transform) -> Result<(), SurfaceError> {
        self.client.set_transform(transform)
    }

    pub fn set_transform_hint(&self, hint: Transform) {
        *self.transform_hint.lock() = hint;
    }

    pub fn transform_hint(&self) -> Transform {
        *self.transform_hint.lock()
    }

    pub fn set_scaling_mode(&self, sequence: Option<SequenceNumber>, mode: ScalingMode) -> Result<(), SurfaceError> {
        self.client.set_scaling_mode(sequence, mode)
    }

    pub fn set_queue_size(&self, n: u32) -> Result<(), SurfaceError> {
        self.client.set_queue_size(n)
    }

    pub fn get_queue_size(&self) -> Result<u32, SurfaceError> {
        self.client.get_queue_size()
    }

    pub fn get_last_flushed_buffer(
        &self,
    ) -> Result<(SequenceNumber, SyncFence, crate::transform::Matrix4), SurfaceError> {
        self.client.get_last_flushed_buffer()
    }

    pub fn cached_slot_count(&self) -> usize {
        self.slot_cache.lock().len()
    }

    /// `SetUserData` / user-data change notifications (spec §4.5's listener
    /// map). Local-only: there is no wire opcode for it (spec §6's table
    /// lists `SET_METADATA`/`SET_METADATA_SET` for buffer metadata, not
    /// surface-level user data).
    pub fn set_user_data(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.user_data.lock().insert(key.clone(), value.clone());
        let snapshot: Vec<_> = self.user_data_listeners.lock().values().cloned().collect();
        for listener in snapshot {
            listener(&key, &value);
        }
    }

    pub fn get_user_data(&self, key: &str) -> Option<String> {
        self.user_data.lock().get(key).cloned()
    }

    pub fn register_user_data_listener(&self, name: impl Into<String>, listener: UserDataListener) {
        self.user_data_listeners.lock().insert(name.into(), listener);
    }

    pub fn unregister_user_data_listener(&self, name: &str) {
        self.user_data_listeners.lock().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::{usage, MockAllocator};
    use crate::config::EngineConfig;
    use crate::fence::SyncFence;
    use crate::producer::ipc::{BufferQueueProducer, LoopbackTransport};
    use crate::queue::listeners::ConsumerListener;
    use crate::queue::BufferQueue;

    struct NullConsumerListener;
    impl ConsumerListener for NullConsumerListener {}

    fn surface() -> ProducerSurface {
        let queue = BufferQueue::new("producer-surface-test", Arc::new(MockAllocator::new()), EngineConfig::default());
        queue.listeners().register_consumer_listener(Arc::new(NullConsumerListener));
        let producer = Arc::new(BufferQueueProducer::new(queue));
        let client = Arc::new(BufferClientProducer::new(Arc::new(LoopbackTransport::new(producer))));
        let surface = ProducerSurface::new(client);
        surface.set_window_config(WindowConfig {
            width: 64,
            height: 64,
            format: 1,
            usage: usage::CPU_WRITE,
            ..WindowConfig::default()
        });
        surface.connect().unwrap();
        surface
    }

    #[test]
    fn first_request_caches_the_buffer() {
        let surface = surface();
        let (seq, ..) = surface.request_buffer().unwrap();
        assert_eq!(surface.cached_slot_count(), 1);
        surface
            .flush_buffer(seq, &SyncFence::invalid(), vec![], 0, None)
            .unwrap();
    }

    #[test]
    fn with_buffer_mutates_cached_entry() {
        let surface = surface();
        let (seq, ..) = surface.request_buffer().unwrap();
        surface
            .with_buffer(seq, |buf| {
                buf.set_metadata(1, vec![9, 9], false).unwrap();
            })
            .unwrap();
        surface
            .with_buffer(seq, |buf| assert_eq!(buf.get_metadata(1), Some(&[9, 9][..])))
            .unwrap();
    }

    #[test]
    fn cancel_does_not_evict_cache_since_slot_is_still_reusable() {
        let surface = surface();
        let (seq, ..) = surface.request_buffer().unwrap();
        surface.cancel_buffer(seq).unwrap();
        // the remote put the slot back on the free list but never told us to
        // evict it; a subsequent request for the same slot would come back
        // as buffer=null and the entry is still here to serve it.
        assert_eq!(surface.cached_slot_count(), 1);
    }

    #[test]
    fn deleting_list_evicts_cache_entries() {
        // fill the default-size-3 queue, then return every slot to the free
        // list so the next request has to reuse (and, on a config change,
        // reallocate) one of them instead of growing the queue.
        let surface = surface();
        let mut sequences = Vec::new();
        for _ in 0..3 {
            let (seq, ..) = surface.request_buffer().unwrap();
            sequences.push(seq);
        }
        for seq in &sequences {
            surface.cancel_buffer(*seq).unwrap();
        }
        assert_eq!(surface.cached_slot_count(), 3);

        surface.set_window_config(WindowConfig {
            width: 128,
            height: 128,
            format: 1,
            usage: usage::CPU_WRITE,
            ..WindowConfig::default()
        });
        let (new_seq, ..) = surface.request_buffer().unwrap();

        assert_eq!(surface.cached_slot_count(), 3);
        assert_eq!(
            surface.with_buffer(sequences[0], |_| ()).unwrap_err(),
            SurfaceError::NoEntry
        );
        surface.with_buffer(new_seq, |_| ()).unwrap();
    }

    #[test]
    fn request_size_override_applies_only_until_cleared() {
        let surface = surface();
        surface.set_window_config(WindowConfig {
            width: 32,
            height: 32,
            format: 1,
            usage: usage::CPU_WRITE,
            ..WindowConfig::default()
        });

        surface.set_request_size(64, 48);
        let (seq, ..) = surface.request_buffer().unwrap();
        surface
            .with_buffer(seq, |buf| {
                assert_eq!((buf.handle().width, buf.handle().height), (64, 48));
            })
            .unwrap();
        surface.cancel_buffer(seq).unwrap();

        surface.clear_request_size();
        let (seq2, ..) = surface.request_buffer().unwrap();
        surface
            .with_buffer(seq2, |buf| {
                assert_eq!((buf.handle().width, buf.handle().height), (32, 32));
            })
            .unwrap();
    }

    #[test]
    fn unregister_user_data_listener_stops_future_notifications() {
        let surface = surface();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        surface.register_user_data_listener(
            "watcher",
            Arc::new(move |k, v| *seen2.lock() = Some((k.to_string(), v.to_string()))),
        );
        surface.set_user_data("title", "hello");
        assert!(seen.lock().is_some());

        *seen.lock() = None;
        surface.unregister_user_data_listener("watcher");
        surface.set_user_data("title", "goodbye");
        assert!(seen.lock().is_none());
    }

    #[test]
    fn disconnect_refuses_further_requests() {
        let surface = surface();
        surface.disconnect().unwrap();
        assert!(surface.is_disconnected());
        assert_eq!(
            surface.request_buffer().unwrap_err(),
            SurfaceError::ConsumerDisconnected
        );
    }

    #[test]
    fn user_data_listener_observes_changes() {
        let surface = surface();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        surface.register_user_data_listener(
            "watcher",
            Arc::new(move |k, v| *seen2.lock() = Some((k.to_string(), v.to_string()))),
        );
        surface.set_user_data("title", "hello");
        assert_eq!(surface.get_user_data("title"), Some("hello".to_string()));
        assert_eq!(*seen.lock(), Some(("title".to_string(), "hello".to_string())));
    }
}

//! `ConsumerSurface` (spec §4.6): wraps a local `BufferQueue` and forwards
//! acquire/release/attach/detach plus registration calls. Exposes the same
//! queue's `IBufferProducer` side so a peer (in-process or, via a real
//! transport, cross-process) can drive it.

use crate::buffer::allocator::BufferAllocator;
use crate::buffer::SurfaceBuffer;
use crate::config::EngineConfig;
use crate::error::SurfaceError;
use crate::fence::SyncFence;
use crate::producer::ipc::BufferQueueProducer;
use crate::queue::listeners::{
    ConsumerListener, DeleteBufferFn, FenceSubmitFn, ProducerReleaseListener, UserDataChangeFn,
};
use crate::queue::BufferQueue;
use crate::sequence::SequenceNumber;
use crate::transform::Rect;
use std::sync::Arc;

/// Consumer-side façade (spec §4.6). Owns the queue and the one
/// `BufferQueueProducer` that demuxes whatever producer connects to it.
pub struct ConsumerSurface {
    queue: BufferQueue,
    producer: Arc<BufferQueueProducer>,
}

impl ConsumerSurface {
    pub fn new(name: impl Into<String>, allocator: Arc<dyn BufferAllocator>, config: EngineConfig) -> Self {
        let queue = BufferQueue::new(name, allocator, config);
        Self {
            producer: Arc::new(BufferQueueProducer::new(queue.clone())),
            queue,
        }
    }

    /// A single-slot consumer surface (spec §3 "a shared queue's queueSize is
    /// pinned to 1").
    pub fn new_shared(name: impl Into<String>, allocator: Arc<dyn BufferAllocator>, config: EngineConfig) -> Self {
        let queue = BufferQueue::new_shared(name, allocator, config);
        Self {
            producer: Arc::new(BufferQueueProducer::new(queue.clone())),
            queue,
        }
    }

    /// `IBufferProducer`: the object a peer connects to in order to drive
    /// this consumer's queue, shareable across IPC (spec §4.6).
    pub fn producer(&self) -> Arc<BufferQueueProducer> {
        self.producer.clone()
    }

    pub fn queue(&self) -> &BufferQueue {
        &self.queue
    }

    pub fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) {
        self.queue.listeners().register_consumer_listener(listener);
    }

    pub fn unregister_consumer_listener(&self) {
        self.queue.listeners().unregister_consumer_listener();
    }

    pub fn register_release_listener(&self, listener: ProducerReleaseListener) {
        self.queue.listeners().add_producer_release_listener(listener);
    }

    pub fn register_delete_buffer_listener(&self, on_hardware_thread: bool, listener: DeleteBufferFn) {
        self.queue
            .listeners()
            .add_delete_buffer_listener(on_hardware_thread, listener);
    }

    pub fn set_user_data_listener(&self, name: impl Into<String>, listener: UserDataChangeFn) {
        self.queue.listeners().set_user_data_listener(name, listener);
    }

    pub fn register_fence_submit_listener(&self, listener: FenceSubmitFn) {
        self.queue.listeners().add_fence_submit_listener(listener);
    }

    pub fn acquire_buffer(&self) -> Result<(SequenceNumber, SyncFence, i64, Vec<Rect>), SurfaceError> {
        self.queue.acquire_buffer()
    }

    pub fn acquire_buffer_with_present_timestamp(
        &self,
        expect_present_ts: i64,
    ) -> Result<(SequenceNumber, SyncFence, i64, Vec<Rect>), SurfaceError> {
        self.queue.acquire_buffer_with_present_timestamp(expect_present_ts)
    }

    pub fn release_buffer(&self, sequence: SequenceNumber, release_fence: SyncFence) -> Result<(), SurfaceError> {
        self.queue.release_buffer(sequence, release_fence)
    }

    pub fn attach_buffer(&self, buffer: SurfaceBuffer, timeout_ms: i64) -> Result<SequenceNumber, SurfaceError> {
        self.queue.attach_buffer(buffer, timeout_ms)
    }

    pub fn detach_buffer(&self, sequence: SequenceNumber) -> Result<(), SurfaceError> {
        self.queue.detach_buffer(sequence, false)
    }

    pub fn get_last_flushed_buffer_sequence(&self) -> Result<(SequenceNumber, SyncFence), SurfaceError> {
        self.queue.get_last_flushed_buffer_sequence()
    }

    pub fn clean_cache(&self) {
        self.queue.clean_cache();
    }

    pub fn go_background(&self) {
        self.queue.go_background();
    }

    pub fn on_consumer_died(&self) {
        self.queue.on_consumer_died();
    }

    pub fn dump(&self) -> String {
        self.queue.dump()
    }

    /// Publishes a weak reference to this surface under its queue's unique id
    /// in the process-wide registry (spec §4.8), so another component holding
    /// only the id can look the surface back up.
    pub fn register_in_global_registry(self: &Arc<Self>) {
        crate::registry::global().add_surface(self.queue.unique_id().0, self);
    }

    pub fn unregister_from_global_registry(&self) {
        crate::registry::global().remove_surface(self.queue.unique_id().0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::{usage, MockAllocator, RequestConfig};
    use crate::producer::ipc::{BufferClientProducer, LoopbackTransport};

    struct NullConsumerListener;
    impl ConsumerListener for NullConsumerListener {}

    #[test]
    fn round_trips_through_the_exposed_producer() {
        let consumer = ConsumerSurface::new("consumer-surface-test", Arc::new(MockAllocator::new()), EngineConfig::default());
        consumer.register_consumer_listener(Arc::new(NullConsumerListener));

        let client = BufferClientProducer::new(Arc::new(LoopbackTransport::new(consumer.producer())));
        let config = RequestConfig {
            width: 32,
            height: 32,
            format: 1,
            usage: usage::CPU_WRITE,
            ..Default::default()
        };
        let (sequence, ..) = client.request_buffer(config).unwrap();
        client
            .flush_buffer(sequence, Default::default(), &SyncFence::invalid(), vec![], 0, None)
            .unwrap();

        let (acquired, fence, _, _) = consumer.acquire_buffer().unwrap();
        assert_eq!(acquired, sequence);
        consumer.release_buffer(acquired, fence).unwrap();
    }

    #[test]
    fn detach_requires_attached_state() {
        let consumer = ConsumerSurface::new("consumer-surface-test-2", Arc::new(MockAllocator::new()), EngineConfig::default());
        consumer.register_consumer_listener(Arc::new(NullConsumerListener));
        assert_eq!(
            consumer.detach_buffer(SequenceNumber(0)).unwrap_err(),
            SurfaceError::NoEntry
        );
    }

    #[test]
    fn release_delete_and_fence_submit_listeners_all_fire() {
        let consumer = ConsumerSurface::new("consumer-surface-test-listeners", Arc::new(MockAllocator::new()), EngineConfig::default());
        consumer.register_consumer_listener(Arc::new(NullConsumerListener));

        let released = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = released.clone();
        consumer.register_release_listener(ProducerReleaseListener::WithFence(Arc::new(
            move |_buffer, _fence| {
                counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            },
        )));

        let deleted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = deleted.clone();
        consumer.register_delete_buffer_listener(
            false,
            Arc::new(move |_seq| {
                counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );

        let fence_submits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = fence_submits.clone();
        consumer.register_fence_submit_listener(Arc::new(move |_fence| {
            counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        let client = BufferClientProducer::new(Arc::new(LoopbackTransport::new(consumer.producer())));
        let config = RequestConfig {
            width: 16,
            height: 16,
            format: 1,
            usage: usage::CPU_WRITE,
            ..Default::default()
        };
        let (sequence, ..) = client.request_buffer(config).unwrap();
        client
            .flush_buffer(sequence, Default::default(), &SyncFence::invalid(), vec![], 0, None)
            .unwrap();
        assert_eq!(fence_submits.load(std::sync::atomic::Ordering::SeqCst), 1);

        let (acquired, fence, _, _) = consumer.acquire_buffer().unwrap();
        consumer.release_buffer(acquired, fence).unwrap();
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);

        consumer.queue().set_queue_size(1).unwrap();
        assert_eq!(deleted.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_round_trip_finds_the_surface_by_unique_id() {
        let consumer = Arc::new(ConsumerSurface::new(
            "consumer-surface-test-registry",
            Arc::new(MockAllocator::new()),
            EngineConfig::default(),
        ));
        let unique_id = consumer.queue().unique_id().0;
        consumer.register_in_global_registry();

        let found = crate::registry::global()
            .get_surface(unique_id)
            .expect("surface should be registered");
        assert!(Arc::ptr_eq(&found, &consumer));

        consumer.unregister_from_global_registry();
        assert!(crate::registry::global().get_surface(unique_id).is_none());
    }
}

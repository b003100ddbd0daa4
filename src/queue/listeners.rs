//! The four listener registries (spec §4.3 "Listener registries", §5, §9
//! "never invoke user-supplied callbacks under the primary queue lock").
//!
//! Each registry is guarded by its own `parking_lot::Mutex` so firing a
//! listener can never deadlock against a caller already holding the queue's
//! primary lock: callers snapshot the registered handles under the
//! registry's own lock, drop that lock, then invoke.

use crate::buffer::SurfaceBuffer;
use crate::fence::SyncFence;
use crate::sequence::SequenceNumber;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub trait ConsumerListener: Send + Sync {
    fn on_buffer_available(&self) {}
    fn on_go_background(&self) {}
    fn on_clean_cache(&self) {}
}

pub enum ProducerReleaseListener {
    Legacy(Arc<dyn Fn() + Send + Sync>),
    WithFence(Arc<dyn Fn(&SurfaceBuffer, &SyncFence) + Send + Sync>),
    BackupWithFence(Arc<dyn Fn(&SurfaceBuffer, &SyncFence) + Send + Sync>),
}

pub type DeleteBufferFn = Arc<dyn Fn(SequenceNumber) + Send + Sync>;
pub type UserDataChangeFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type FenceSubmitFn = Arc<dyn Fn(&SyncFence) + Send + Sync>;

#[derive(Default)]
pub struct ListenerRegistries {
    consumer_available: Mutex<Option<Arc<dyn ConsumerListener>>>,
    producer_release: Mutex<Vec<ProducerReleaseListener>>,
    delete_buffer_main: Mutex<Vec<DeleteBufferFn>>,
    delete_buffer_hardware: Mutex<Vec<DeleteBufferFn>>,
    user_data_change: Mutex<HashMap<String, UserDataChangeFn>>,
    /// Supplementary hook from `original_source/sync_fence/src/frame_sched.cpp`
    /// (see SPEC_FULL.md §2): lets an external scheduler observe freshly
    /// flushed acquire fences without the queue depending on one.
    fence_submit: Mutex<Vec<FenceSubmitFn>>,
}

impl ListenerRegistries {
    pub fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) {
        *self.consumer_available.lock() = Some(listener);
    }

    pub fn unregister_consumer_listener(&self) {
        *self.consumer_available.lock() = None;
    }

    pub fn has_consumer_listener(&self) -> bool {
        self.consumer_available.lock().is_some()
    }

    pub fn fire_buffer_available(&self) {
        let snapshot = self.consumer_available.lock().clone();
        if let Some(listener) = snapshot {
            listener.on_buffer_available();
        }
    }

    pub fn fire_go_background(&self) {
        let snapshot = self.consumer_available.lock().clone();
        if let Some(listener) = snapshot {
            listener.on_go_background();
        }
    }

    pub fn fire_clean_cache(&self) {
        let snapshot = self.consumer_available.lock().clone();
        if let Some(listener) = snapshot {
            listener.on_clean_cache();
        }
    }

    pub fn add_producer_release_listener(&self, listener: ProducerReleaseListener) {
        self.producer_release.lock().push(listener);
    }

    pub fn clear_producer_release_listeners(&self) {
        self.producer_release.lock().clear();
    }

    /// §7 "Listener invocations never propagate exceptions to the queue; a
    /// listener failure is logged and otherwise ignored" — there is no
    /// fallible listener API here (closures can't "fail"), but panics inside
    /// a listener are still caught and logged so one broken callback can't
    /// take down the acquire/release sequence.
    pub fn fire_buffer_released(&self, buffer: &SurfaceBuffer, fence: &SyncFence) {
        let snapshot: Vec<_> = self
            .producer_release
            .lock()
            .iter()
            .map(|l| match l {
                ProducerReleaseListener::Legacy(f) => ProducerReleaseListener::Legacy(f.clone()),
                ProducerReleaseListener::WithFence(f) => {
                    ProducerReleaseListener::WithFence(f.clone())
                }
                ProducerReleaseListener::BackupWithFence(f) => {
                    ProducerReleaseListener::BackupWithFence(f.clone())
                }
            })
            .collect();

        for listener in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match &listener {
                ProducerReleaseListener::Legacy(f) => f(),
                ProducerReleaseListener::WithFence(f) => f(buffer, fence),
                ProducerReleaseListener::BackupWithFence(f) => f(buffer, fence),
            }));
            if result.is_err() {
                log::warn!("producer-release listener panicked; ignoring (spec §7)");
            }
        }
    }

    pub fn add_delete_buffer_listener(&self, on_hardware_thread: bool, listener: DeleteBufferFn) {
        if on_hardware_thread {
            self.delete_buffer_hardware.lock().push(listener);
        } else {
            self.delete_buffer_main.lock().push(listener);
        }
    }

    pub fn fire_buffer_deleted(&self, sequence: SequenceNumber) {
        let main_snapshot: Vec<_> = self.delete_buffer_main.lock().clone();
        let hw_snapshot: Vec<_> = self.delete_buffer_hardware.lock().clone();
        for listener in main_snapshot.into_iter().chain(hw_snapshot) {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(sequence))).is_err() {
                log::warn!("delete-buffer listener panicked for {sequence}; ignoring");
            }
        }
    }

    pub fn set_user_data_listener(&self, name: impl Into<String>, listener: UserDataChangeFn) {
        self.user_data_change.lock().insert(name.into(), listener);
    }

    pub fn remove_user_data_listener(&self, name: &str) {
        self.user_data_change.lock().remove(name);
    }

    pub fn fire_user_data_change(&self, key: &str, value: &str) {
        let snapshot: Vec<_> = self.user_data_change.lock().values().cloned().collect();
        for listener in snapshot {
            listener(key, value);
        }
    }

    pub fn add_fence_submit_listener(&self, listener: FenceSubmitFn) {
        self.fence_submit.lock().push(listener);
    }

    pub fn fire_fence_submit(&self, fence: &SyncFence) {
        let snapshot: Vec<_> = self.fence_submit.lock().clone();
        for listener in snapshot {
            listener(fence);
        }
    }
}

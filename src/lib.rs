//! A producer/consumer buffer-queue engine mediating the exchange of
//! graphics surface buffers between a producer and a consumer, in-process or
//! (modeled, not transported) across a process boundary.
//!
//! Modules are flat and named for what they do rather than nested under a
//! namespacing umbrella: [`queue`] holds the authoritative per-queue slot
//! state machine, [`producer`]/[`consumer`] are the two sides of the wire
//! protocol, [`window`] and [`ffi`] are the C-ABI-facing handles built on top
//! of the producer side, and [`registry`] is the process-wide id table tying
//! a [`consumer::ConsumerSurface`] to a [`window::NativeWindow`].

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod dump;
pub mod error;
pub mod fence;
pub mod ffi;
pub mod futex;
pub mod metadata;
pub mod producer;
pub mod queue;
pub mod reclaim;
pub mod registry;
pub mod sequence;
pub mod transform;
pub mod window;

pub use buffer::allocator::{BufferAllocator, BufferHandle, RequestConfig};
pub use buffer::SurfaceBuffer;
pub use config::{init_logging, EngineConfig};
pub use consumer::ConsumerSurface;
pub use error::{ComposedError, SurfaceError};
pub use fence::SyncFence;
pub use producer::{BufferClientProducer, BufferQueueProducer, ProducerSurface};
pub use queue::BufferQueue;
pub use registry::{global as global_registry, MatrixVariant};
pub use sequence::SequenceNumber;
pub use transform::{ColorGamut, Matrix4, Rect, ScalingMode, SourceType, Transform};
pub use window::NativeWindow;

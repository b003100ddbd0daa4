//! Producer IPC surface (spec §4.4, §6): a stable opcode table plus the two
//! halves that sit on either side of it. The transport itself is an external
//! collaborator (spec §1), modeled as a trait with one real implementation
//! elsewhere and an in-process loopback here for tests and for same-process
//! producer/consumer pairs.

use crate::buffer::allocator::RequestConfig;
use crate::buffer::parcel::WireSurfaceBuffer;
use crate::buffer::SurfaceBuffer;
use crate::error::SurfaceError;
use crate::fence::SyncFence;
use crate::metadata::BufferExtraData;
use crate::queue::BufferQueue;
use crate::sequence::SequenceNumber;
use crate::transform::{Rect, ScalingMode, Transform};
use std::sync::Arc;

/// Stable opcode table (spec §6). Only the subset this crate implements end
/// to end carries a variant; the rest of the original table
/// (`REQUEST_BUFFERS`, `FLUSH_BUFFERS`, `PRE_ALLOC_BUFFERS`, the `_V2` and
/// `_BACKUP` variants, `SET_TUNNEL_HANDLE`, `GET_PRESENT_TIMESTAMP`,
/// `REQUEST_AND_DETACH_BUFFER`, `ATTACH_AND_FLUSH_BUFFER`) is named here for
/// completeness but dispatches to `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    RequestBuffer = 1,
    CancelBuffer,
    FlushBuffer,
    AttachBuffer,
    DetachBuffer,
    SetQueueSize,
    GetQueueSize,
    GetNameAndUniqueId,
    GetDefaultUsage,
    SetDefaultUsage,
    CleanCache,
    GoBackground,
    Connect,
    Disconnect,
    ConnectStrictly,
    DisconnectStrictly,
    SetTransform,
    GetTransform,
    SetTransformHint,
    GetTransformHint,
    SetScalingMode,
    RegisterReleaseListener,
    UnregisterReleaseListener,
    GetLastFlushedBuffer,
    NotSupported,
}

/// Typed request/response pair for one opcode. Marshalling uses the wire
/// types from `buffer::parcel` so fd-passing semantics stay explicit even
/// across the in-process `LoopbackTransport`.
#[derive(Debug, Clone)]
pub enum Request {
    RequestBuffer { config: RequestConfig },
    CancelBuffer { sequence: SequenceNumber },
    FlushBuffer {
        sequence: SequenceNumber,
        extra_data: BufferExtraData,
        acquire_fence: crate::fence::WireFence,
        damages: Vec<Rect>,
        timestamp: i64,
        desired_present_timestamp: Option<i64>,
    },
    AttachBuffer { buffer: WireSurfaceBuffer, timeout_ms: i64 },
    DetachBuffer { sequence: SequenceNumber, from_producer: bool },
    SetQueueSize { n: u32 },
    GetQueueSize,
    GetNameAndUniqueId,
    GetDefaultUsage,
    SetDefaultUsage { usage: u64 },
    CleanCache,
    GoBackground,
    Connect,
    Disconnect,
    ConnectStrictly,
    DisconnectStrictly,
    SetTransform { transform: Transform },
    GetTransform,
    SetTransformHint { transform: Transform },
    GetTransformHint,
    SetScalingMode { sequence: Option<SequenceNumber>, mode: ScalingMode },
    GetLastFlushedBuffer,
}

#[derive(Debug, Clone)]
pub enum Response {
    RequestBuffer {
        sequence: SequenceNumber,
        buffer: Option<WireSurfaceBuffer>,
        release_fence: crate::fence::WireFence,
        deleting: Vec<SequenceNumber>,
        is_connected: bool,
    },
    Status,
    FlushBuffer,
    AttachBuffer { sequence: SequenceNumber },
    QueueSize(u32),
    NameAndUniqueId(String, u64),
    Usage(u64),
    Transform(Transform),
    LastFlushedBuffer {
        sequence: SequenceNumber,
        fence: crate::fence::WireFence,
        matrix: crate::transform::Matrix4,
    },
}

/// The IPC transport (spec §1 "delivers typed requests with file-descriptor
/// passing"): an external collaborator we model as a trait so the producer/
/// consumer logic is testable without a real binder/socket transport.
pub trait Transport: Send + Sync {
    fn call(&self, opcode: Opcode, request: Request) -> Result<Response, SurfaceError>;
}

/// Server-side dispatcher (spec §4.4 `BufferQueueProducer`): demuxes opcodes
/// onto one `BufferQueue`.
///
/// Tracks which sequences this connection has already shipped the full
/// buffer for (spec §4.5 `ProducerSurface`'s slot cache): a slot's buffer
/// crosses the wire once per connection, afterwards only its sequence does,
/// and the client is expected to keep its own copy.
pub struct BufferQueueProducer {
    queue: BufferQueue,
    sent: parking_lot::Mutex<std::collections::HashSet<u32>>,
}

impl BufferQueueProducer {
    pub fn new(queue: BufferQueue) -> Self {
        Self { queue, sent: parking_lot::Mutex::new(std::collections::HashSet::new()) }
    }

    pub fn dispatch(&self, opcode: Opcode, request: Request) -> Result<Response, SurfaceError> {
        match (opcode, request) {
            (Opcode::RequestBuffer, Request::RequestBuffer { config }) => {
                let (sequence, release_fence, deleting) = self.queue.request_buffer(config)?;
                for deleted in &deleting {
                    self.sent.lock().remove(&deleted.0);
                }
                let mut sent = self.sent.lock();
                let buffer = if sent.insert(sequence.0) {
                    self.queue.buffer_snapshot(sequence).map(|(handle, metadata, extra_data, cfg)| {
                        crate::buffer::parcel::write_to_parcel(
                            Some(sequence),
                            Some(&handle),
                            &metadata,
                            &extra_data,
                            &cfg,
                        )
                    })
                } else {
                    None
                };
                drop(sent);
                Ok(Response::RequestBuffer {
                    sequence,
                    buffer,
                    release_fence: release_fence.to_wire(),
                    deleting,
                    is_connected: self.queue.is_connected(),
                })
            }
            (Opcode::CancelBuffer, Request::CancelBuffer { sequence }) => {
                self.queue.cancel_buffer(sequence)?;
                Ok(Response::Status)
            }
            (
                Opcode::FlushBuffer,
                Request::FlushBuffer {
                    sequence,
                    extra_data,
                    acquire_fence,
                    damages,
                    timestamp,
                    desired_present_timestamp,
                },
            ) => {
                let fence = SyncFence::from_wire("acquire", acquire_fence)?;
                self.queue
                    .flush_buffer(sequence, extra_data, fence, damages, timestamp, desired_present_timestamp)?;
                Ok(Response::FlushBuffer)
            }
            (Opcode::AttachBuffer, Request::AttachBuffer { buffer, timeout_ms }) => {
                let parts = crate::buffer::parcel::read_from_parcel(
                    &buffer,
                    &crate::buffer::parcel::TrustingFdReader,
                )?
                .ok_or(SurfaceError::InvalidArguments)?;
                let (sequence, handle, metadata, extra_data, config) = parts;
                let surface_buffer =
                    SurfaceBuffer::from_wire_parts(sequence, handle, metadata, extra_data, config);
                let sequence = self.queue.attach_buffer(surface_buffer, timeout_ms)?;
                Ok(Response::AttachBuffer { sequence })
            }
            (Opcode::DetachBuffer, Request::DetachBuffer { sequence, from_producer }) => {
                self.queue.detach_buffer(sequence, from_producer)?;
                Ok(Response::Status)
            }
            (Opcode::SetQueueSize, Request::SetQueueSize { n }) => {
                self.queue.set_queue_size(n)?;
                Ok(Response::Status)
            }
            (Opcode::GetQueueSize, Request::GetQueueSize) => {
                Ok(Response::QueueSize(self.queue.queue_size()))
            }
            (Opcode::GetNameAndUniqueId, Request::GetNameAndUniqueId) => Ok(
                Response::NameAndUniqueId(self.queue.name().to_string(), self.queue.unique_id().0),
            ),
            (Opcode::GetDefaultUsage, Request::GetDefaultUsage) => {
                Ok(Response::Usage(self.queue.default_usage()))
            }
            (Opcode::SetDefaultUsage, Request::SetDefaultUsage { usage }) => {
                self.queue.set_default_usage(usage);
                Ok(Response::Status)
            }
            (Opcode::CleanCache, Request::CleanCache) => {
                self.queue.clean_cache();
                Ok(Response::Status)
            }
            (Opcode::GoBackground, Request::GoBackground) => {
                self.queue.go_background();
                Ok(Response::Status)
            }
            (Opcode::Connect, Request::Connect) => {
                self.queue.connect();
                Ok(Response::Status)
            }
            (Opcode::Disconnect, Request::Disconnect) => {
                self.queue.disconnect();
                Ok(Response::Status)
            }
            (Opcode::ConnectStrictly, Request::ConnectStrictly) => {
                self.queue.connect_strictly();
                Ok(Response::Status)
            }
            (Opcode::DisconnectStrictly, Request::DisconnectStrictly) => {
                self.queue.disconnect_strictly();
                Ok(Response::Status)
            }
            (Opcode::SetTransform, Request::SetTransform { transform }) => {
                self.queue.set_transform(transform)?;
                Ok(Response::Status)
            }
            (Opcode::GetTransform, Request::GetTransform) => {
                Ok(Response::Transform(self.queue.transform()))
            }
            (Opcode::SetTransformHint, Request::SetTransformHint { transform }) => {
                self.queue.set_transform_hint(transform)?;
                Ok(Response::Status)
            }
            (Opcode::GetTransformHint, Request::GetTransformHint) => {
                Ok(Response::Transform(self.queue.transform_hint()))
            }
            (Opcode::SetScalingMode, Request::SetScalingMode { sequence, mode }) => {
                match sequence {
                    Some(seq) => self.queue.set_scaling_mode_for_sequence(seq, mode)?,
                    None => self.queue.set_scaling_mode(mode),
                }
                Ok(Response::Status)
            }
            (Opcode::GetLastFlushedBuffer, Request::GetLastFlushedBuffer) => {
                let (sequence, fence) = self.queue.get_last_flushed_buffer_sequence()?;
                Ok(Response::LastFlushedBuffer {
                    sequence,
                    fence: fence.to_wire(),
                    matrix: crate::transform::Matrix4::identity(),
                })
            }
            _ => Err(SurfaceError::NotSupported),
        }
    }
}

impl Transport for BufferQueueProducer {
    fn call(&self, opcode: Opcode, request: Request) -> Result<Response, SurfaceError> {
        self.dispatch(opcode, request)
    }
}

/// Client-side proxy (spec §4.4 `BufferClientProducer`): marshals calls onto
/// a [`Transport`] and unmarshals the typed response.
pub struct BufferClientProducer {
    transport: Arc<dyn Transport>,
}

impl BufferClientProducer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn request_buffer(
        &self,
        config: RequestConfig,
    ) -> Result<(SequenceNumber, Option<WireSurfaceBuffer>, SyncFence, Vec<SequenceNumber>, bool), SurfaceError> {
        match self
            .transport
            .call(Opcode::RequestBuffer, Request::RequestBuffer { config })?
        {
            Response::RequestBuffer {
                sequence,
                buffer,
                release_fence,
                deleting,
                is_connected,
            } => {
                let fence = SyncFence::from_wire("release", release_fence)?;
                Ok((sequence, buffer, fence, deleting, is_connected))
            }
            _ => Err(SurfaceError::Internal),
        }
    }

    pub fn cancel_buffer(&self, sequence: SequenceNumber) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::CancelBuffer, Request::CancelBuffer { sequence })
            .map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn flush_buffer(
        &self,
        sequence: SequenceNumber,
        extra_data: BufferExtraData,
        acquire_fence: &SyncFence,
        damages: Vec<Rect>,
        timestamp: i64,
        desired_present_timestamp: Option<i64>,
    ) -> Result<(), SurfaceError> {
        self.transport
            .call(
                Opcode::FlushBuffer,
                Request::FlushBuffer {
                    sequence,
                    extra_data,
                    acquire_fence: acquire_fence.to_wire(),
                    damages,
                    timestamp,
                    desired_present_timestamp,
                },
            )
            .map(|_| ())
    }

    pub fn attach_buffer(&self, buffer: &SurfaceBuffer, timeout_ms: i64) -> Result<SequenceNumber, SurfaceError> {
        let wire = crate::buffer::parcel::write_to_parcel(
            Some(buffer.sequence),
            Some(buffer.handle()),
            buffer.metadata(),
            &buffer.extra_data,
            &buffer.request_config,
        );
        match self
            .transport
            .call(Opcode::AttachBuffer, Request::AttachBuffer { buffer: wire, timeout_ms })?
        {
            Response::AttachBuffer { sequence } => Ok(sequence),
            _ => Err(SurfaceError::Internal),
        }
    }

    pub fn detach_buffer(&self, sequence: SequenceNumber, from_producer: bool) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::DetachBuffer, Request::DetachBuffer { sequence, from_producer })
            .map(|_| ())
    }

    pub fn set_queue_size(&self, n: u32) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::SetQueueSize, Request::SetQueueSize { n })
            .map(|_| ())
    }

    pub fn get_queue_size(&self) -> Result<u32, SurfaceError> {
        match self.transport.call(Opcode::GetQueueSize, Request::GetQueueSize)? {
            Response::QueueSize(n) => Ok(n),
            _ => Err(SurfaceError::Internal),
        }
    }

    pub fn get_name_and_unique_id(&self) -> Result<(String, u64), SurfaceError> {
        match self
            .transport
            .call(Opcode::GetNameAndUniqueId, Request::GetNameAndUniqueId)?
        {
            Response::NameAndUniqueId(name, id) => Ok((name, id)),
            _ => Err(SurfaceError::Internal),
        }
    }

    pub fn connect(&self) -> Result<(), SurfaceError> {
        self.transport.call(Opcode::Connect, Request::Connect).map(|_| ())
    }

    pub fn disconnect(&self) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::Disconnect, Request::Disconnect)
            .map(|_| ())
    }

    pub fn connect_strictly(&self) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::ConnectStrictly, Request::ConnectStrictly)
            .map(|_| ())
    }

    pub fn disconnect_strictly(&self) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::DisconnectStrictly, Request::DisconnectStrictly)
            .map(|_| ())
    }

    pub fn set_transform(&self, transform: Transform) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::SetTransform, Request::SetTransform { transform })
            .map(|_| ())
    }

    pub fn set_scaling_mode(&self, sequence: Option<SequenceNumber>, mode: ScalingMode) -> Result<(), SurfaceError> {
        self.transport
            .call(Opcode::SetScalingMode, Request::SetScalingMode { sequence, mode })
            .map(|_| ())
    }

    pub fn get_last_flushed_buffer(
        &self,
    ) -> Result<(SequenceNumber, SyncFence, crate::transform::Matrix4), SurfaceError> {
        match self
            .transport
            .call(Opcode::GetLastFlushedBuffer, Request::GetLastFlushedBuffer)?
        {
            Response::LastFlushedBuffer { sequence, fence, matrix } => {
                Ok((sequence, SyncFence::from_wire("acquire", fence)?, matrix))
            }
            _ => Err(SurfaceError::Internal),
        }
    }
}

/// An in-process transport that calls straight into a [`BufferQueueProducer`]
/// with no actual process boundary — stands in for the real binder/socket
/// transport (spec §1's "external collaborator") in tests and single-process
/// embedders.
pub struct LoopbackTransport {
    producer: Arc<BufferQueueProducer>,
}

impl LoopbackTransport {
    pub fn new(producer: Arc<BufferQueueProducer>) -> Self {
        Self { producer }
    }
}

impl Transport for LoopbackTransport {
    fn call(&self, opcode: Opcode, request: Request) -> Result<Response, SurfaceError> {
        self.producer.dispatch(opcode, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::{usage, MockAllocator};
    use crate::config::EngineConfig;
    use crate::queue::listeners::ConsumerListener;

    struct NullConsumerListener;
    impl ConsumerListener for NullConsumerListener {}

    fn client() -> BufferClientProducer {
        let queue = BufferQueue::new("ipc-test", Arc::new(MockAllocator::new()), EngineConfig::default());
        queue.listeners().register_consumer_listener(Arc::new(NullConsumerListener));
        let producer = Arc::new(BufferQueueProducer::new(queue));
        BufferClientProducer::new(Arc::new(LoopbackTransport::new(producer)))
    }

    #[test]
    fn request_then_cancel_round_trips_over_loopback() {
        let client = client();
        let config = RequestConfig {
            width: 64,
            height: 64,
            format: 1,
            usage: usage::CPU_WRITE,
            ..Default::default()
        };
        let (sequence, ..) = client.request_buffer(config).unwrap();
        client.cancel_buffer(sequence).unwrap();
    }

    #[test]
    fn queue_size_round_trips() {
        let client = client();
        client.set_queue_size(5).unwrap();
        assert_eq!(client.get_queue_size().unwrap(), 5);
    }

    #[test]
    fn get_name_and_unique_id_matches_the_backing_queue() {
        let queue = BufferQueue::new("ipc-test-names", Arc::new(MockAllocator::new()), EngineConfig::default());
        queue.listeners().register_consumer_listener(Arc::new(NullConsumerListener));
        let unique_id = queue.unique_id().0;
        let producer = Arc::new(BufferQueueProducer::new(queue));
        let client = BufferClientProducer::new(Arc::new(LoopbackTransport::new(producer)));

        let (name, id) = client.get_name_and_unique_id().unwrap();
        assert_eq!(name, "ipc-test-names");
        assert_eq!(id, unique_id);
    }

    #[test]
    fn unsupported_opcode_is_reported() {
        let queue = BufferQueue::new("ipc-test2", Arc::new(MockAllocator::new()), EngineConfig::default());
        let producer = BufferQueueProducer::new(queue);
        assert_eq!(
            producer
                .dispatch(Opcode::NotSupported, Request::GetQueueSize)
                .unwrap_err(),
            SurfaceError::NotSupported
        );
    }
}

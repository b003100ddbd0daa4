//! `SurfaceBuffer` (spec §4.2): wraps one allocated buffer.

pub mod allocator;
pub mod parcel;

use crate::error::SurfaceError;
use crate::fence::SyncFence;
use crate::metadata::{BufferExtraData, MetadataMap};
use crate::sequence::{next_sequence, SequenceNumber};
use crate::transform::{ColorGamut, Rect, ScalingMode, Transform};
use allocator::{AccessType, BufferAllocator, BufferHandle, RequestConfig};
use std::sync::Arc;

/// 64-bit buffer id: process id in the high bits, sequence number's low bits
/// in the low half (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(pub u64);

impl BufferId {
    pub fn new(sequence: SequenceNumber) -> Self {
        let pid = std::process::id() as u64;
        BufferId((pid << 32) | sequence.0 as u64)
    }
}

/// One allocated graphics buffer plus everything attached to it.
pub struct SurfaceBuffer {
    pub sequence: SequenceNumber,
    pub id: BufferId,
    handle: BufferHandle,
    pub color_gamut: ColorGamut,
    pub transform: Transform,
    pub extra_data: BufferExtraData,
    metadata: MetadataMap,
    pub crop: Rect,
    pub scaling_mode: ScalingMode,
    is_reclaimed: bool,
    fence: SyncFence,
    pub request_config: RequestConfig,
}

impl SurfaceBuffer {
    /// `Alloc(config, previous?)`: delegates to the external allocator,
    /// reusing `previous`'s memory when possible (spec §4.2).
    pub fn alloc(
        allocator: &dyn BufferAllocator,
        config: RequestConfig,
        previous: Option<&SurfaceBuffer>,
    ) -> Result<Self, SurfaceError> {
        config.validate()?;
        let handle = match previous {
            Some(prev) => allocator.realloc(&config, &prev.handle)?,
            None => allocator.alloc(&config)?,
        };
        let sequence = next_sequence();
        Ok(Self {
            sequence,
            id: BufferId::new(sequence),
            handle,
            color_gamut: config.color_gamut,
            transform: config.transform,
            extra_data: BufferExtraData::new(),
            metadata: MetadataMap::new(),
            crop: Rect {
                x: 0,
                y: 0,
                w: config.width as i32,
                h: config.height as i32,
            },
            scaling_mode: ScalingMode::default(),
            is_reclaimed: false,
            fence: SyncFence::invalid(),
            request_config: config,
        })
    }

    /// Reconstruct a buffer from its serialized parts (spec §4.2
    /// `ReadFromMessageParcel`), bypassing the allocator since the handle
    /// already names memory a peer process allocated. The sequence is
    /// carried over the wire rather than freshly generated, since it must
    /// match the sender's slot.
    pub fn from_wire_parts(
        sequence: SequenceNumber,
        handle: BufferHandle,
        metadata: MetadataMap,
        extra_data: BufferExtraData,
        config: RequestConfig,
    ) -> Self {
        Self {
            sequence,
            id: BufferId::new(sequence),
            handle,
            color_gamut: config.color_gamut,
            transform: config.transform,
            extra_data,
            metadata,
            crop: Rect {
                x: 0,
                y: 0,
                w: config.width as i32,
                h: config.height as i32,
            },
            scaling_mode: ScalingMode::default(),
            is_reclaimed: false,
            fence: SyncFence::invalid(),
            request_config: config,
        }
    }

    pub fn handle(&self) -> &BufferHandle {
        &self.handle
    }

    pub fn width(&self) -> u32 {
        self.handle.width
    }

    pub fn height(&self) -> u32 {
        self.handle.height
    }

    pub fn access_type(&self) -> AccessType {
        allocator::access_type_for_usage(self.handle.usage)
    }

    pub fn map(&mut self, allocator: &dyn BufferAllocator) -> Result<(), SurfaceError> {
        allocator.map(&mut self.handle)
    }

    pub fn unmap(&mut self, allocator: &dyn BufferAllocator) -> Result<(), SurfaceError> {
        allocator.unmap(&mut self.handle)
    }

    pub fn flush_cache(&self, allocator: &dyn BufferAllocator) -> Result<(), SurfaceError> {
        allocator.flush_cache(&self.handle)
    }

    pub fn invalidate_cache(&self, allocator: &dyn BufferAllocator) -> Result<(), SurfaceError> {
        allocator.invalidate_cache(&self.handle)
    }

    /// `SetMetadata(key, bytes, enableCache)`.
    pub fn set_metadata(&mut self, key: u32, bytes: Vec<u8>, enable_cache: bool) -> Result<bool, SurfaceError> {
        self.metadata.set(key, bytes, enable_cache)
    }

    pub fn get_metadata(&self, key: u32) -> Option<&[u8]> {
        self.metadata.get(key)
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    pub fn fence(&self) -> &SyncFence {
        &self.fence
    }

    pub fn set_fence(&mut self, fence: SyncFence) {
        self.fence = fence;
    }

    /// `SetAndMergeSyncFence`: adopt `f` if there is no current fence,
    /// otherwise merge the two.
    pub fn set_and_merge_sync_fence(&mut self, f: SyncFence) {
        self.fence = if self.fence.is_valid() {
            SyncFence::merge(format!("merge-{}", self.sequence), &self.fence, &f)
        } else {
            f
        };
    }

    pub fn is_reclaimed(&self) -> bool {
        self.is_reclaimed
    }

    /// Best-effort hook to the memory-reclaim daemon (spec §4.2, §5
    /// "memory-reclaim symbols are dlopen'd once per process").
    pub fn try_reclaim(&mut self, reclaimer: &dyn crate::reclaim::ReclaimDaemon) -> Result<(), SurfaceError> {
        if self.is_reclaimed {
            return Err(SurfaceError::InvalidOperating);
        }
        reclaimer.reclaim(self.handle.fd)?;
        self.is_reclaimed = true;
        Ok(())
    }

    pub fn try_resume_if_needed(
        &mut self,
        reclaimer: &dyn crate::reclaim::ReclaimDaemon,
    ) -> Result<(), SurfaceError> {
        if !self.is_reclaimed {
            return Ok(());
        }
        reclaimer.resume(self.handle.fd)?;
        self.is_reclaimed = false;
        Ok(())
    }
}

impl Drop for SurfaceBuffer {
    fn drop(&mut self) {
        crate::sequence::release(self.sequence);
    }
}

impl std::fmt::Debug for SurfaceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceBuffer")
            .field("sequence", &self.sequence)
            .field("size", &(self.handle.width, self.handle.height))
            .field("format", &self.handle.format)
            .field("is_reclaimed", &self.is_reclaimed)
            .finish()
    }
}

/// Shared ownership handle used by producer/consumer façades and the slot
/// cache, mirroring the original's reference-counted `sptr<SurfaceBuffer>`.
pub type SurfaceBufferRef = Arc<std::sync::Mutex<SurfaceBuffer>>;

#[cfg(test)]
mod tests {
    use super::*;
    use allocator::MockAllocator;

    fn cfg(w: u32, h: u32) -> RequestConfig {
        RequestConfig {
            width: w,
            height: h,
            format: 1,
            usage: allocator::usage::CPU_WRITE | allocator::usage::HW_TEXTURE,
            ..Default::default()
        }
    }

    #[test]
    fn alloc_rejects_bad_stride_alignment() {
        let alloc = MockAllocator::new();
        let mut config = cfg(64, 64);
        config.stride_alignment = 3;
        assert_eq!(
            SurfaceBuffer::alloc(&alloc, config, None).unwrap_err(),
            SurfaceError::InvalidArguments
        );
    }

    #[test]
    fn reclaim_then_resume_round_trips() {
        let alloc = MockAllocator::new();
        let mut buffer = SurfaceBuffer::alloc(&alloc, cfg(16, 16), None).unwrap();
        let reclaimer = crate::reclaim::NullReclaimDaemon;
        buffer.try_reclaim(&reclaimer).unwrap();
        assert!(buffer.is_reclaimed());
        assert_eq!(
            buffer.try_reclaim(&reclaimer).unwrap_err(),
            SurfaceError::InvalidOperating
        );
        buffer.try_resume_if_needed(&reclaimer).unwrap();
        assert!(!buffer.is_reclaimed());
    }

    #[test]
    fn merge_fence_adopts_first_then_merges() {
        let alloc = MockAllocator::new();
        let mut buffer = SurfaceBuffer::alloc(&alloc, cfg(16, 16), None).unwrap();
        let f1 = SyncFence::signaled("f1");
        buffer.set_and_merge_sync_fence(f1.clone());
        assert_eq!(*buffer.fence(), f1);

        let f2 = SyncFence::signaled("f2");
        buffer.set_and_merge_sync_fence(f2.clone());
        assert!(buffer.fence().is_valid());
    }

    #[test]
    fn metadata_mut_edits_the_same_map_metadata_reads() {
        let alloc = MockAllocator::new();
        let mut buffer = SurfaceBuffer::alloc(&alloc, cfg(16, 16), None).unwrap();
        buffer.metadata_mut().set(1, vec![9, 9], false).unwrap();
        assert_eq!(buffer.metadata().get(1), Some([9, 9].as_slice()));
    }
}

//! The hardware buffer allocator is an external collaborator (spec §1): it
//! allocates/maps/unmaps/flushes buffers given width/height/format/usage and
//! returns a handle with a file descriptor. We model it as a trait, with one
//! real implementation and a test stub ([`MockAllocator`]) behind it.

use crate::error::SurfaceError;
use std::os::unix::io::RawFd;

/// Buffer usage bitflags. `PROTECTED` buffers are never mapped (spec §4.2).
pub mod usage {
    pub const CPU_READ: u64 = 1 << 0;
    pub const CPU_WRITE: u64 = 1 << 1;
    pub const HW_RENDER: u64 = 1 << 2;
    pub const HW_TEXTURE: u64 = 1 << 3;
    pub const HW_COMPOSER: u64 = 1 << 4;
    pub const PROTECTED: u64 = 1 << 5;
    pub const VIDEO_DECODER: u64 = 1 << 6;
    pub const CAMERA_READ: u64 = 1 << 7;
    pub const CAMERA_WRITE: u64 = 1 << 8;
}

/// Access-type tag written into metadata when usage implies CPU/HW duality
/// (spec §4.3 step 8), so the allocator can pick a mapping strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    CpuOnly,
    HwOnly,
    CpuAndHw,
}

pub fn access_type_for_usage(usage: u64) -> AccessType {
    let cpu = usage & (self::usage::CPU_READ | self::usage::CPU_WRITE) != 0;
    let hw = usage
        & (self::usage::HW_RENDER | self::usage::HW_TEXTURE | self::usage::HW_COMPOSER)
        != 0;
    match (cpu, hw) {
        (true, true) => AccessType::CpuAndHw,
        (true, false) => AccessType::CpuOnly,
        (false, true) => AccessType::HwOnly,
        (false, false) => AccessType::HwOnly,
    }
}

/// Snapshot of the width/height/format/usage/stride-alignment/timeout/color
/// config a `RequestBuffer` call used to allocate a buffer, stored on the
/// slot so `ReuseBuffer` can detect a config change (spec §4.3 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestConfig {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub usage: u64,
    pub stride_alignment: u32,
    pub timeout_ms: i64,
    pub color_gamut: crate::transform::ColorGamut,
    pub transform: crate::transform::Transform,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: 0,
            usage: 0,
            stride_alignment: 4,
            timeout_ms: -1,
            color_gamut: crate::transform::ColorGamut::SRGB,
            transform: crate::transform::Transform::NONE,
        }
    }
}

pub const STRIDE_ALIGNMENT_MIN: u32 = 4;
pub const STRIDE_ALIGNMENT_MAX: u32 = 4096;

impl RequestConfig {
    /// Validation from spec §4.3 step 2.
    pub fn validate(&self) -> Result<(), SurfaceError> {
        if !(STRIDE_ALIGNMENT_MIN..=STRIDE_ALIGNMENT_MAX).contains(&self.stride_alignment)
            || !self.stride_alignment.is_power_of_two()
        {
            return Err(SurfaceError::InvalidArguments);
        }
        if !self.color_gamut.is_valid() {
            return Err(SurfaceError::InvalidArguments);
        }
        if !self.transform.is_valid() {
            return Err(SurfaceError::InvalidArguments);
        }
        if self.width == 0 || self.height == 0 {
            return Err(SurfaceError::InvalidArguments);
        }
        Ok(())
    }
}

/// A handle to an allocated buffer: fd plus layout. `virtual_addr` is set
/// only after `Map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    pub fd: RawFd,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub usage: u64,
    pub size_bytes: u64,
    pub virtual_addr: Option<usize>,
}

/// External hardware allocator capability (spec §1). Implementors own the
/// real HDI/driver call; [`MockAllocator`] below exists purely for tests.
pub trait BufferAllocator: Send + Sync {
    fn alloc(&self, config: &RequestConfig) -> Result<BufferHandle, SurfaceError>;
    /// Reuse `previous`'s backing memory if possible (same usage group);
    /// otherwise behaves like `alloc`.
    fn realloc(
        &self,
        config: &RequestConfig,
        previous: &BufferHandle,
    ) -> Result<BufferHandle, SurfaceError>;
    fn map(&self, handle: &mut BufferHandle) -> Result<(), SurfaceError>;
    fn unmap(&self, handle: &mut BufferHandle) -> Result<(), SurfaceError>;
    fn flush_cache(&self, handle: &BufferHandle) -> Result<(), SurfaceError>;
    fn invalidate_cache(&self, handle: &BufferHandle) -> Result<(), SurfaceError>;
    fn free(&self, handle: &BufferHandle);
}

/// In-memory allocator used by tests and by any embedder that hasn't wired a
/// real HDI backend yet. Every "fd" is a monotonic counter, not a real
/// descriptor, which is fine since nothing here is actually transferred
/// across a process boundary in-test.
pub struct MockAllocator {
    next_fd: std::sync::atomic::AtomicI32,
}

impl MockAllocator {
    pub fn new() -> Self {
        Self {
            next_fd: std::sync::atomic::AtomicI32::new(1),
        }
    }
}

impl Default for MockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferAllocator for MockAllocator {
    fn alloc(&self, config: &RequestConfig) -> Result<BufferHandle, SurfaceError> {
        if config.width == 0 || config.height == 0 {
            return Err(SurfaceError::InvalidArguments);
        }
        let stride = (config.width * 4 + config.stride_alignment - 1)
            & !(config.stride_alignment - 1);
        let fd = self.next_fd.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(BufferHandle {
            fd,
            width: config.width,
            height: config.height,
            stride,
            format: config.format,
            usage: config.usage,
            size_bytes: stride as u64 * config.height as u64,
            virtual_addr: None,
        })
    }

    fn realloc(
        &self,
        config: &RequestConfig,
        previous: &BufferHandle,
    ) -> Result<BufferHandle, SurfaceError> {
        if previous.usage == config.usage
            && previous.width == config.width
            && previous.height == config.height
        {
            return Ok(*previous);
        }
        self.alloc(config)
    }

    fn map(&self, handle: &mut BufferHandle) -> Result<(), SurfaceError> {
        if handle.usage & usage::PROTECTED != 0 {
            return Err(SurfaceError::NoPermission);
        }
        handle.virtual_addr = Some(0x1000);
        Ok(())
    }

    fn unmap(&self, handle: &mut BufferHandle) -> Result<(), SurfaceError> {
        handle.virtual_addr = None;
        Ok(())
    }

    fn flush_cache(&self, _handle: &BufferHandle) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn invalidate_cache(&self, _handle: &BufferHandle) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn free(&self, _handle: &BufferHandle) {}
}

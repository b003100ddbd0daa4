//! `NativeWindow` / `NativeWindowBuffer` (spec §4.7): reference-counted
//! opaque handles for C-style callers, dispatched through a single opt-code
//! function. `ffi.rs` puts the actual `extern "C"` surface on top of this.

use crate::error::SurfaceError;
use crate::fence::SyncFence;
use crate::producer::ProducerSurface;
use crate::sequence::SequenceNumber;
use crate::transform::{ColorGamut, Rect, ScalingMode, SourceType, Transform};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// 4-byte magics so the FFI dispatch layer can reject foreign pointers
/// before dereferencing them (spec §4.7).
pub const NATIVE_WINDOW_MAGIC: u32 = u32::from_be_bytes(*b"WIND");
pub const NATIVE_WINDOW_BUFFER_MAGIC: u32 = u32::from_be_bytes(*b"WBUF");

/// Producer classification used by the compositor to pick a scheduling
/// policy (spec §4.7 "framework type").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkType {
    Jni,
    Native,
    ArkUi,
}

impl Default for FrameworkType {
    fn default() -> Self {
        FrameworkType::Native
    }
}

/// A lightweight mirror of one slot, enough to drive Flush/Cancel without
/// round-tripping through the `ProducerSurface` cache for geometry the
/// caller already has (spec §4.7's `{seq -> NativeWindowBuffer}` cache).
/// The `SurfaceBuffer` itself stays owned by the `ProducerSurface`.
pub struct NativeWindowBuffer {
    magic: u32,
    pub sequence: SequenceNumber,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
}

impl NativeWindowBuffer {
    pub fn is_valid(&self) -> bool {
        self.magic == NATIVE_WINDOW_BUFFER_MAGIC
    }
}

/// One opt-code per window property (spec §4.7's "opt-code dispatch
/// function"), expressed as a typed request/response pair the way the
/// producer IPC table is (§4.4) rather than a variadic C-style call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowRequest {
    SetUsage(u64),
    GetUsage,
    SetGeometry { width: u32, height: u32 },
    GetGeometry,
    SetFormat(u32),
    GetFormat,
    SetStrideAlignment(u32),
    GetStrideAlignment,
    SetTimeout(i64),
    GetTimeout,
    SetColorGamut(ColorGamut),
    GetColorGamut,
    SetTransform(Transform),
    GetTransform,
    SetSourceType(SourceType),
    GetSourceType,
    SetFrameworkType(FrameworkType),
    GetFrameworkType,
    SetWhitePointBrightness(f32),
    GetWhitePointBrightness,
    SetHoldFlag(bool),
    GetHoldFlag,
    SetScalingMode(ScalingMode),
    GetScalingMode,
    SetQueueSize(u32),
    GetQueueSize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowResponse {
    Status,
    Usage(u64),
    Geometry { width: u32, height: u32 },
    Format(u32),
    StrideAlignment(u32),
    Timeout(i64),
    ColorGamut(ColorGamut),
    Transform(Transform),
    SourceType(SourceType),
    FrameworkType(FrameworkType),
    WhitePointBrightness(f32),
    HoldFlag(bool),
    ScalingMode(ScalingMode),
    QueueSize(u32),
}

/// Reference-counted window handle (spec §4.7). Embeds a surface pointer (the
/// `ProducerSurface`), a UI timestamp, the `{seq -> NativeWindowBuffer}`
/// mirror cache, and the window-property store the opt-code dispatch reads
/// and writes.
pub struct NativeWindow {
    magic: u32,
    surface: Arc<ProducerSurface>,
    ui_timestamp: AtomicI64,
    buffer_cache: Mutex<HashMap<u32, Arc<NativeWindowBuffer>>>,
    usage: AtomicU64,
    width: AtomicU32,
    height: AtomicU32,
    stride_alignment: AtomicU32,
    format: AtomicU32,
    timeout_ms: AtomicI64,
    color_gamut: Mutex<ColorGamut>,
    transform: Mutex<Transform>,
    source_type: Mutex<SourceType>,
    framework_type: Mutex<FrameworkType>,
    white_point_brightness_bits: AtomicU32,
    hold_flag: AtomicBool,
    scaling_mode: Mutex<ScalingMode>,
}

impl NativeWindow {
    pub fn new(surface: Arc<ProducerSurface>) -> Arc<Self> {
        Arc::new(Self {
            magic: NATIVE_WINDOW_MAGIC,
            surface,
            ui_timestamp: AtomicI64::new(0),
            buffer_cache: Mutex::new(HashMap::new()),
            usage: AtomicU64::new(0),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            stride_alignment: AtomicU32::new(4),
            format: AtomicU32::new(0),
            timeout_ms: AtomicI64::new(-1),
            color_gamut: Mutex::new(ColorGamut::SRGB),
            transform: Mutex::new(Transform::NONE),
            source_type: Mutex::new(SourceType::Default),
            framework_type: Mutex::new(FrameworkType::Native),
            white_point_brightness_bits: AtomicU32::new(1.0f32.to_bits()),
            hold_flag: AtomicBool::new(false),
            scaling_mode: Mutex::new(ScalingMode::ScaleToWindow),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.magic == NATIVE_WINDOW_MAGIC
    }

    pub fn surface(&self) -> &Arc<ProducerSurface> {
        &self.surface
    }

    pub fn set_ui_timestamp(&self, ts: i64) {
        self.ui_timestamp.store(ts, Ordering::Relaxed);
    }

    pub fn ui_timestamp(&self) -> i64 {
        self.ui_timestamp.load(Ordering::Relaxed)
    }

    /// The single opt-code dispatch entry point (spec §4.7).
    pub fn handle(&self, request: WindowRequest) -> Result<WindowResponse, SurfaceError> {
        use WindowRequest::*;
        Ok(match request {
            SetUsage(v) => {
                self.usage.store(v, Ordering::Relaxed);
                WindowResponse::Status
            }
            GetUsage => WindowResponse::Usage(self.usage.load(Ordering::Relaxed)),
            SetGeometry { width, height } => {
                self.width.store(width, Ordering::Relaxed);
                self.height.store(height, Ordering::Relaxed);
                WindowResponse::Status
            }
            GetGeometry => WindowResponse::Geometry {
                width: self.width.load(Ordering::Relaxed),
                height: self.height.load(Ordering::Relaxed),
            },
            SetFormat(v) => {
                self.format.store(v, Ordering::Relaxed);
                WindowResponse::Status
            }
            GetFormat => WindowResponse::Format(self.format.load(Ordering::Relaxed)),
            SetStrideAlignment(v) => {
                self.stride_alignment.store(v, Ordering::Relaxed);
                WindowResponse::Status
            }
            GetStrideAlignment => WindowResponse::StrideAlignment(self.stride_alignment.load(Ordering::Relaxed)),
            SetTimeout(v) => {
                self.timeout_ms.store(v, Ordering::Relaxed);
                WindowResponse::Status
            }
            GetTimeout => WindowResponse::Timeout(self.timeout_ms.load(Ordering::Relaxed)),
            SetColorGamut(v) => {
                if !v.is_valid() {
                    return Err(SurfaceError::InvalidArguments);
                }
                *self.color_gamut.lock() = v;
                WindowResponse::Status
            }
            GetColorGamut => WindowResponse::ColorGamut(*self.color_gamut.lock()),
            SetTransform(v) => {
                if !v.is_valid() {
                    return Err(SurfaceError::InvalidArguments);
                }
                *self.transform.lock() = v;
                self.surface.set_transform(v)?;
                WindowResponse::Status
            }
            GetTransform => WindowResponse::Transform(*self.transform.lock()),
            SetSourceType(v) => {
                *self.source_type.lock() = v;
                WindowResponse::Status
            }
            GetSourceType => WindowResponse::SourceType(*self.source_type.lock()),
            SetFrameworkType(v) => {
                *self.framework_type.lock() = v;
                WindowResponse::Status
            }
            GetFrameworkType => WindowResponse::FrameworkType(*self.framework_type.lock()),
            SetWhitePointBrightness(v) => {
                if !(0.0..=1.0).contains(&v) {
                    return Err(SurfaceError::OutOfRange);
                }
                self.white_point_brightness_bits.store(v.to_bits(), Ordering::Relaxed);
                WindowResponse::Status
            }
            GetWhitePointBrightness => WindowResponse::WhitePointBrightness(f32::from_bits(
                self.white_point_brightness_bits.load(Ordering::Relaxed),
            )),
            SetHoldFlag(v) => {
                self.hold_flag.store(v, Ordering::Relaxed);
                WindowResponse::Status
            }
            GetHoldFlag => WindowResponse::HoldFlag(self.hold_flag.load(Ordering::Relaxed)),
            SetScalingMode(v) => {
                *self.scaling_mode.lock() = v;
                self.surface.set_scaling_mode(None, v)?;
                WindowResponse::Status
            }
            GetScalingMode => WindowResponse::ScalingMode(*self.scaling_mode.lock()),
            SetQueueSize(n) => {
                self.surface.set_queue_size(n)?;
                WindowResponse::Status
            }
            GetQueueSize => WindowResponse::QueueSize(self.surface.get_queue_size()?),
        })
    }

    fn window_config(&self) -> crate::producer::WindowConfig {
        crate::producer::WindowConfig {
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            stride_alignment: self.stride_alignment.load(Ordering::Relaxed),
            format: self.format.load(Ordering::Relaxed),
            usage: self.usage.load(Ordering::Relaxed),
            timeout_ms: self.timeout_ms.load(Ordering::Relaxed),
            color_gamut: *self.color_gamut.lock(),
            transform: *self.transform.lock(),
        }
    }

    /// `NativeWindowRequestBuffer`: pushes the window's current property
    /// store down as the producer's window config, then requests a slot.
    pub fn request_buffer(&self) -> Result<(Arc<NativeWindowBuffer>, SyncFence), SurfaceError> {
        self.surface.set_window_config(self.window_config());
        let (sequence, fence, _connected) = self.surface.request_buffer()?;
        let nwb = self.surface.with_buffer(sequence, |buf| {
            Arc::new(NativeWindowBuffer {
                magic: NATIVE_WINDOW_BUFFER_MAGIC,
                sequence,
                width: buf.width(),
                height: buf.height(),
                stride: buf.handle().stride,
                format: buf.handle().format,
            })
        })?;
        self.buffer_cache.lock().insert(sequence.0, nwb.clone());
        Ok((nwb, fence))
    }

    pub fn flush_buffer(
        &self,
        buffer: &NativeWindowBuffer,
        acquire_fence: &SyncFence,
        damages: Vec<Rect>,
    ) -> Result<(), SurfaceError> {
        if !buffer.is_valid() {
            return Err(SurfaceError::InvalidArguments);
        }
        self.surface
            .flush_buffer(buffer.sequence, acquire_fence, damages, self.ui_timestamp(), None)
    }

    pub fn cancel_buffer(&self, buffer: &NativeWindowBuffer) -> Result<(), SurfaceError> {
        if !buffer.is_valid() {
            return Err(SurfaceError::InvalidArguments);
        }
        self.buffer_cache.lock().remove(&buffer.sequence.0);
        self.surface.cancel_buffer(buffer.sequence)
    }

    pub fn cached_buffer_count(&self) -> usize {
        self.buffer_cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::{usage, MockAllocator};
    use crate::config::EngineConfig;
    use crate::producer::ipc::{BufferClientProducer, BufferQueueProducer, LoopbackTransport};
    use crate::queue::listeners::ConsumerListener;
    use crate::queue::BufferQueue;

    struct NullConsumerListener;
    impl ConsumerListener for NullConsumerListener {}

    fn window() -> Arc<NativeWindow> {
        let queue = BufferQueue::new("native-window-test", Arc::new(MockAllocator::new()), EngineConfig::default());
        queue.listeners().register_consumer_listener(Arc::new(NullConsumerListener));
        let producer = Arc::new(BufferQueueProducer::new(queue));
        let client = Arc::new(BufferClientProducer::new(Arc::new(LoopbackTransport::new(producer))));
        let surface = Arc::new(ProducerSurface::new(client));
        surface.connect().unwrap();
        let window = NativeWindow::new(surface);
        window.handle(WindowRequest::SetUsage(usage::CPU_WRITE)).unwrap();
        window
            .handle(WindowRequest::SetGeometry { width: 32, height: 32 })
            .unwrap();
        window.handle(WindowRequest::SetFormat(1)).unwrap();
        window
    }

    #[test]
    fn magic_tags_identify_owned_handles() {
        let window = window();
        assert!(window.is_valid());
    }

    #[test]
    fn ui_timestamp_round_trips() {
        let window = window();
        assert_eq!(window.ui_timestamp(), 0);
        window.set_ui_timestamp(123456789);
        assert_eq!(window.ui_timestamp(), 123456789);
    }

    #[test]
    fn request_flush_cancel_round_trip() {
        let window = window();
        let (buf, fence) = window.request_buffer().unwrap();
        assert_eq!(window.cached_buffer_count(), 1);
        window.flush_buffer(&buf, &fence, vec![]).unwrap();
    }

    #[test]
    fn cancel_evicts_the_mirror_cache() {
        let window = window();
        let (buf, _) = window.request_buffer().unwrap();
        window.cancel_buffer(&buf).unwrap();
        assert_eq!(window.cached_buffer_count(), 0);
    }

    #[test]
    fn rejects_out_of_range_white_point_brightness() {
        let window = window();
        assert_eq!(
            window
                .handle(WindowRequest::SetWhitePointBrightness(2.0))
                .unwrap_err(),
            SurfaceError::OutOfRange
        );
    }

    #[test]
    fn transform_round_trips_and_forwards_to_the_surface() {
        let window = window();
        window.handle(WindowRequest::SetTransform(Transform::ROTATE_90)).unwrap();
        assert_eq!(
            window.handle(WindowRequest::GetTransform).unwrap(),
            WindowResponse::Transform(Transform::ROTATE_90)
        );
    }
}

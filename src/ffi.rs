//! C-ABI surface for `NativeWindow` (spec §4.7): a `#[no_mangle] extern "C"`
//! / boxed-opaque-handle pattern instead of the `Result`-returning Rust API
//! the rest of the crate uses.
//!
//! Every call that can fail returns a `SurfaceError` status class from
//! [`crate::error::SurfaceError::class`] (`0` for success), the same stable
//! table the wire protocol uses, so a C caller gets one error vocabulary
//! regardless of which layer raised it.

use crate::buffer::allocator::MockAllocator;
use crate::config::EngineConfig;
use crate::error::SurfaceError;
use crate::fence::SyncFence;
use crate::producer::ipc::{BufferClientProducer, BufferQueueProducer, LoopbackTransport};
use crate::producer::ProducerSurface;
use crate::queue::listeners::ConsumerListener;
use crate::queue::BufferQueue;
use crate::transform::{Rect, Transform};
use crate::window::{NativeWindow, NativeWindowBuffer, WindowRequest, WindowResponse};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::os::unix::io::RawFd;
use std::sync::Arc;

const SQ_SUCCESS: i32 = 0;
const SQ_ERROR_NULL_POINTER: i32 = -1;

fn status_of<T>(result: Result<T, SurfaceError>) -> i32 {
    match result {
        Ok(_) => SQ_SUCCESS,
        Err(e) => e.class() as i32,
    }
}

/// Listener stub for windows created through the C ABI: nothing on the other
/// end of a same-process dispatch needs to be notified.
struct NullConsumerListener;
impl ConsumerListener for NullConsumerListener {}

/// Opaque handle wrapping a reference-counted [`NativeWindow`].
pub struct SqWindow {
    inner: Arc<NativeWindow>,
    unique_id: u64,
}

/// Opaque handle wrapping a reference-counted [`NativeWindowBuffer`], handed
/// back from `sq_window_request_buffer` and consumed by flush/cancel.
pub struct SqWindowBuffer {
    inner: Arc<NativeWindowBuffer>,
    fence: SyncFence,
}

/// Create a window backed by an in-process buffer queue named `name`.
///
/// The hardware allocator is an external collaborator the crate models but
/// does not implement (spec §1); this entry point backs the window with the
/// in-memory stand-in until an embedder wires a real one in over the Rust
/// API.
///
/// # Safety
/// `name` must be a valid, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn sq_window_create(name: *const c_char) -> *mut SqWindow {
    if name.is_null() {
        return std::ptr::null_mut();
    }
    let name = match CStr::from_ptr(name).to_str() {
        Ok(s) => s.to_string(),
        Err(_) => return std::ptr::null_mut(),
    };

    let queue = BufferQueue::new(name, Arc::new(MockAllocator::new()), EngineConfig::default());
    let unique_id = queue.unique_id().0;
    queue.listeners().register_consumer_listener(Arc::new(NullConsumerListener));
    let producer = Arc::new(BufferQueueProducer::new(queue));
    let transport = Arc::new(LoopbackTransport::new(producer));
    let client = Arc::new(BufferClientProducer::new(transport));
    let surface = Arc::new(ProducerSurface::new(client));
    if surface.connect().is_err() {
        return std::ptr::null_mut();
    }

    let window = NativeWindow::new(surface);
    crate::registry::global().add_native_window(unique_id, &window);

    Box::into_raw(Box::new(SqWindow { inner: window, unique_id }))
}

/// # Safety
/// `window` must be a pointer returned by `sq_window_create` and not already
/// destroyed.
#[no_mangle]
pub unsafe extern "C" fn sq_window_destroy(window: *mut SqWindow) {
    if !window.is_null() {
        let boxed = Box::from_raw(window);
        crate::registry::global().remove_native_window(boxed.unique_id);
    }
}

fn window_ref(window: *mut SqWindow) -> Result<&'static NativeWindow, i32> {
    if window.is_null() {
        return Err(SQ_ERROR_NULL_POINTER);
    }
    Ok(unsafe { &(*window).inner })
}

/// # Safety
/// `window` must be a live pointer from `sq_window_create`.
#[no_mangle]
pub unsafe extern "C" fn sq_window_set_usage(window: *mut SqWindow, usage: u64) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    status_of(window.handle(WindowRequest::SetUsage(usage)))
}

/// # Safety
/// `window` must be a live pointer from `sq_window_create`.
#[no_mangle]
pub unsafe extern "C" fn sq_window_set_geometry(window: *mut SqWindow, width: u32, height: u32) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    status_of(window.handle(WindowRequest::SetGeometry { width, height }))
}

/// # Safety
/// `window` must be a live pointer from `sq_window_create`.
#[no_mangle]
pub unsafe extern "C" fn sq_window_set_format(window: *mut SqWindow, format: u32) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    status_of(window.handle(WindowRequest::SetFormat(format)))
}

/// # Safety
/// `window` must be a live pointer from `sq_window_create`.
#[no_mangle]
pub unsafe extern "C" fn sq_window_set_transform(window: *mut SqWindow, transform: u32) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    status_of(window.handle(WindowRequest::SetTransform(Transform(transform))))
}

/// # Safety
/// `window` and `out_transform` must both be valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn sq_window_get_transform(window: *mut SqWindow, out_transform: *mut u32) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    if out_transform.is_null() {
        return SQ_ERROR_NULL_POINTER;
    }
    match window.handle(WindowRequest::GetTransform) {
        Ok(WindowResponse::Transform(t)) => {
            *out_transform = t.0;
            SQ_SUCCESS
        }
        Ok(_) => unreachable!("GetTransform always answers with WindowResponse::Transform"),
        Err(e) => e.class() as i32,
    }
}

/// # Safety
/// `window` must be a live pointer from `sq_window_create`.
#[no_mangle]
pub unsafe extern "C" fn sq_window_set_queue_size(window: *mut SqWindow, size: u32) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    status_of(window.handle(WindowRequest::SetQueueSize(size)))
}

/// # Safety
/// `window` and `out_size` must both be valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn sq_window_get_queue_size(window: *mut SqWindow, out_size: *mut u32) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    if out_size.is_null() {
        return SQ_ERROR_NULL_POINTER;
    }
    match window.handle(WindowRequest::GetQueueSize) {
        Ok(WindowResponse::QueueSize(n)) => {
            *out_size = n;
            SQ_SUCCESS
        }
        Ok(_) => unreachable!("GetQueueSize always answers with WindowResponse::QueueSize"),
        Err(e) => e.class() as i32,
    }
}

/// Request a buffer, writing its geometry into the `out_*` parameters and
/// handing back an opaque [`SqWindowBuffer`] for the matching flush/cancel
/// call. Returns `SQ_SUCCESS` (`0`) or a [`SurfaceError::class`] code.
///
/// # Safety
/// `window` must be a live pointer from `sq_window_create`; the `out_*`
/// pointers, if non-null, must be valid for a single write.
#[no_mangle]
pub unsafe extern "C" fn sq_window_request_buffer(
    window: *mut SqWindow,
    out_buffer: *mut *mut SqWindowBuffer,
    out_width: *mut u32,
    out_height: *mut u32,
    out_stride: *mut u32,
    out_fence_fd: *mut RawFd,
) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    if out_buffer.is_null() {
        return SQ_ERROR_NULL_POINTER;
    }

    match window.request_buffer() {
        Ok((buffer, fence)) => {
            if !out_width.is_null() {
                *out_width = buffer.width;
            }
            if !out_height.is_null() {
                *out_height = buffer.height;
            }
            if !out_stride.is_null() {
                *out_stride = buffer.stride;
            }
            if !out_fence_fd.is_null() {
                *out_fence_fd = fence.to_wire().fd;
            }
            *out_buffer = Box::into_raw(Box::new(SqWindowBuffer { inner: buffer, fence }));
            SQ_SUCCESS
        }
        Err(e) => e.class() as i32,
    }
}

/// # Safety
/// `window` must be a live pointer from `sq_window_create`; `buffer` must
/// have come from `sq_window_request_buffer` on the same window and not
/// already been consumed by a prior flush/cancel call.
#[no_mangle]
pub unsafe extern "C" fn sq_window_flush_buffer(
    window: *mut SqWindow,
    buffer: *mut SqWindowBuffer,
    damage_x: i32,
    damage_y: i32,
    damage_w: i32,
    damage_h: i32,
) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    if buffer.is_null() {
        return SQ_ERROR_NULL_POINTER;
    }
    let boxed = Box::from_raw(buffer);
    let damages = vec![Rect {
        x: damage_x,
        y: damage_y,
        w: damage_w,
        h: damage_h,
    }];
    status_of(window.flush_buffer(&boxed.inner, &boxed.fence, damages))
}

/// # Safety
/// Same preconditions as [`sq_window_flush_buffer`].
#[no_mangle]
pub unsafe extern "C" fn sq_window_cancel_buffer(window: *mut SqWindow, buffer: *mut SqWindowBuffer) -> i32 {
    let window = match window_ref(window) {
        Ok(w) => w,
        Err(code) => return code,
    };
    if buffer.is_null() {
        return SQ_ERROR_NULL_POINTER;
    }
    let boxed = Box::from_raw(buffer);
    status_of(window.cancel_buffer(&boxed.inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn create_window(name: &str) -> *mut SqWindow {
        let c_name = CString::new(name).unwrap();
        unsafe { sq_window_create(c_name.as_ptr()) }
    }

    #[test]
    fn create_and_destroy_round_trip() {
        let window = create_window("ffi-create-destroy");
        assert!(!window.is_null());
        unsafe { sq_window_destroy(window) };
    }

    #[test]
    fn create_registers_and_destroy_unregisters_the_native_window() {
        let window = create_window("ffi-registry-round-trip");
        let unique_id = unsafe { (*window).unique_id };
        assert!(crate::registry::global().get_native_window(unique_id).is_some());
        unsafe { sq_window_destroy(window) };
        assert!(crate::registry::global().get_native_window(unique_id).is_none());
    }

    #[test]
    fn null_window_pointer_is_rejected_without_crashing() {
        let code = unsafe { sq_window_set_usage(std::ptr::null_mut(), 0) };
        assert_eq!(code, SQ_ERROR_NULL_POINTER);
    }

    #[test]
    fn request_flush_round_trip_reports_geometry() {
        let window = create_window("ffi-request-flush");
        unsafe {
            assert_eq!(sq_window_set_usage(window, crate::buffer::allocator::usage::CPU_WRITE), 0);
            assert_eq!(sq_window_set_geometry(window, 32, 32), 0);
            assert_eq!(sq_window_set_format(window, 1), 0);

            let mut buffer = std::ptr::null_mut();
            let mut width = 0u32;
            let mut height = 0u32;
            let mut stride = 0u32;
            let mut fence_fd: RawFd = -1;
            let status = sq_window_request_buffer(
                window,
                &mut buffer,
                &mut width,
                &mut height,
                &mut stride,
                &mut fence_fd,
            );
            assert_eq!(status, 0);
            assert!(!buffer.is_null());
            assert_eq!(width, 32);
            assert_eq!(height, 32);

            assert_eq!(sq_window_flush_buffer(window, buffer, 0, 0, 32, 32), 0);
            sq_window_destroy(window);
        }
    }

    #[test]
    fn transform_round_trips_through_the_c_abi() {
        let window = create_window("ffi-transform");
        unsafe {
            assert_eq!(sq_window_set_transform(window, Transform::ROTATE_90.0), 0);
            let mut out = 0u32;
            assert_eq!(sq_window_get_transform(window, &mut out), 0);
            assert_eq!(out, Transform::ROTATE_90.0);
            sq_window_destroy(window);
        }
    }

    #[test]
    fn queue_size_round_trips_through_the_c_abi() {
        let window = create_window("ffi-queue-size");
        unsafe {
            assert_eq!(sq_window_set_queue_size(window, 5), 0);
            let mut out = 0u32;
            assert_eq!(sq_window_get_queue_size(window, &mut out), 0);
            assert_eq!(out, 5);
            sq_window_destroy(window);
        }
    }
}

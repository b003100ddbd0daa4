//! `SurfaceUtils` (spec §4.8): the process-wide registry mapping a unique
//! surface id to a weak surface reference and to its native-window pointer,
//! plus the two `ComputeTransformMatrix` variants. Modeled as a lazily
//! initialised singleton, the same shape as `sequence.rs`'s process-wide
//! counters and `reclaim.rs`'s resolved-flag.

use crate::consumer::ConsumerSurface;
use crate::error::SurfaceError;
use crate::transform::{Matrix4, Rect, Transform};
use crate::window::NativeWindow;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Which crop-normalisation convention `ComputeTransformMatrix` uses (spec
/// §9: "two ComputeTransformMatrix variants exist with subtly different
/// crop-normalisation; the spec treats them as separate operations; do not
/// unify"). Kept as a caller-supplied flag rather than inferred, matching
/// that decision (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixVariant {
    V1,
    V2,
}

#[derive(Default)]
pub struct SurfaceUtils {
    surfaces: RwLock<HashMap<u64, Weak<ConsumerSurface>>>,
    native_windows: RwLock<HashMap<u64, Weak<NativeWindow>>>,
}

impl SurfaceUtils {
    pub fn add_surface(&self, unique_id: u64, surface: &Arc<ConsumerSurface>) {
        self.surfaces.write().insert(unique_id, Arc::downgrade(surface));
    }

    pub fn remove_surface(&self, unique_id: u64) {
        self.surfaces.write().remove(&unique_id);
    }

    pub fn get_surface(&self, unique_id: u64) -> Option<Arc<ConsumerSurface>> {
        self.surfaces.read().get(&unique_id)?.upgrade()
    }

    pub fn add_native_window(&self, unique_id: u64, window: &Arc<NativeWindow>) {
        self.native_windows.write().insert(unique_id, Arc::downgrade(window));
    }

    pub fn remove_native_window(&self, unique_id: u64) {
        self.native_windows.write().remove(&unique_id);
    }

    pub fn get_native_window(&self, unique_id: u64) -> Option<Arc<NativeWindow>> {
        self.native_windows.read().get(&unique_id)?.upgrade()
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.read().len()
    }
}

lazy_static! {
    static ref REGISTRY: SurfaceUtils = SurfaceUtils::default();
}

/// The process-wide registry, initialised on first access (spec §5
/// "Process-wide state").
pub fn global() -> &'static SurfaceUtils {
    &REGISTRY
}

struct Affine2D {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

fn rotation_component(transform: Transform) -> Affine2D {
    let (a, b, c, d) = match transform {
        Transform::NONE => (1.0, 0.0, 0.0, 1.0),
        Transform::ROTATE_90 => (0.0, -1.0, 1.0, 0.0),
        Transform::ROTATE_180 => (-1.0, 0.0, 0.0, -1.0),
        Transform::ROTATE_270 => (0.0, 1.0, -1.0, 0.0),
        Transform::FLIP_H => (-1.0, 0.0, 0.0, 1.0),
        Transform::FLIP_V => (1.0, 0.0, 0.0, -1.0),
        Transform::FLIP_H_ROTATE_90 => (0.0, -1.0, -1.0, 0.0),
        Transform::FLIP_V_ROTATE_90 => (0.0, 1.0, 1.0, 0.0),
        _ => (1.0, 0.0, 0.0, 1.0),
    };
    // Rotate/mirror about the texture-space center (0.5, 0.5) rather than
    // the origin, so a half-turn keeps the unit square in place.
    let tx = 0.5 - (a * 0.5 + b * 0.5);
    let ty = 0.5 - (c * 0.5 + d * 0.5);
    Affine2D { a, b, c, d, tx, ty }
}

/// `ComputeTransformMatrix` (spec §4.8): maps `[0,1]²` texture coordinates
/// to `crop` inside a `width`x`height` buffer, with `transform` applied.
/// `V1` normalises the crop's vertical origin top-down; `V2` normalises it
/// bottom-up (spec §9's "differing crop-normalisation conventions").
pub fn compute_transform_matrix(
    variant: MatrixVariant,
    width: u32,
    height: u32,
    crop: Rect,
    transform: Transform,
) -> Result<Matrix4, SurfaceError> {
    if width == 0 || height == 0 || !crop.is_valid() || !transform.is_valid() {
        return Err(SurfaceError::InvalidArguments);
    }
    let w = width as f32;
    let h = height as f32;
    let scale_x = crop.w as f32 / w;
    let scale_y = crop.h as f32 / h;
    let trans_x = crop.x as f32 / w;
    let trans_y = match variant {
        MatrixVariant::V1 => crop.y as f32 / h,
        MatrixVariant::V2 => (h - crop.y as f32 - crop.h as f32) / h,
    };

    let rot = rotation_component(transform);
    let a = rot.a * scale_x;
    let b = rot.b * scale_y;
    let c = rot.c * scale_x;
    let d = rot.d * scale_y;
    let tx = rot.a * trans_x + rot.b * trans_y + rot.tx;
    let ty = rot.c * trans_x + rot.d * trans_y + rot.ty;

    #[rustfmt::skip]
    let m = [
        a,   b,   0.0, tx,
        c,   d,   0.0, ty,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];
    Ok(Matrix4(m))
}

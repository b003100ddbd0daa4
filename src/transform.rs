//! Packed enums shared across the buffer queue: transforms, scaling modes,
//! color gamut, and source types (spec §6 "Formats and enums").

use serde::{Deserialize, Serialize};

/// Rotation/mirror transform applied to a buffer before presentation.
/// Combinations (e.g. rotate-90 + flip-h) are represented as bitflags, the
/// way the original packs them into a single integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform(pub u32);

impl Transform {
    pub const NONE: Transform = Transform(0);
    pub const ROTATE_90: Transform = Transform(1);
    pub const ROTATE_180: Transform = Transform(2);
    pub const ROTATE_270: Transform = Transform(3);
    pub const FLIP_H: Transform = Transform(4);
    pub const FLIP_V: Transform = Transform(5);
    pub const FLIP_H_ROTATE_90: Transform = Transform(6);
    pub const FLIP_V_ROTATE_90: Transform = Transform(7);

    pub fn is_valid(self) -> bool {
        self.0 <= 7
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::NONE
    }
}

/// Scaling mode applied when a buffer's dimensions don't match its consumer
/// window (spec §4.9, §6 `SET_SCALING_MODE(_V2)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingMode {
    ScaleToWindow,
    ScaleCrop,
    ScaleFit,
    NoScaling,
}

impl Default for ScalingMode {
    fn default() -> Self {
        ScalingMode::ScaleToWindow
    }
}

/// Producer classification used by schedulers and metadata (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    Default,
    Video,
    Camera,
    Ui,
    Game,
    Cloud,
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::Default
    }
}

/// Color gamut / primaries, packed the way `ConvertColorSpaceTypeToInfo`
/// packs primaries + transfer function + matrix + range into one value
/// (spec §4.9, §8 round-trip law).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorGamut(pub u32);

impl ColorGamut {
    pub const SRGB: ColorGamut = ColorGamut(0);
    pub const DCI_P3: ColorGamut = ColorGamut(1);
    pub const ADOBE_RGB: ColorGamut = ColorGamut(2);
    pub const BT2020: ColorGamut = ColorGamut(3);
    pub const BT601: ColorGamut = ColorGamut(4);
    pub const BT709: ColorGamut = ColorGamut(5);

    pub fn is_valid(self) -> bool {
        self.0 <= 5
    }
}

impl Default for ColorGamut {
    fn default() -> Self {
        ColorGamut::SRGB
    }
}

/// Damage / crop rectangle shared by flush config, metadata crop, and the
/// transform-matrix computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn is_valid(self) -> bool {
        self.w >= 0 && self.h >= 0
    }
}

/// A 4x4 row-major matrix, as returned by `ComputeTransformMatrix` and the
/// `GET_LAST_FLUSHED_BUFFER` IPC opcode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix4(pub [f32; 16]);

impl Matrix4 {
    pub fn identity() -> Self {
        let mut m = [0.0f32; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Matrix4(m)
    }
}

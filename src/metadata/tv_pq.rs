//! TV PQ metadata (spec §4.9, `original_source/surface/include/tv_pq_metadata.h`):
//! a packed struct with scene tag, frame counters, video-window geometry,
//! scale mode, pixel format, and HDR/colorimetry, updated via a
//! merge-function pattern so a caller can change one field without reading
//! the whole struct back first.

use super::{MetadataKey, MetadataMap};
use crate::error::SurfaceError;
use crate::transform::{Rect, ScalingMode};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TvPqMetadata {
    pub scene_tag: u32,
    pub frame_count: u64,
    pub dropped_frame_count: u64,
    pub video_window: Rect,
    pub scale_mode: TvPqScaleMode,
    pub pixel_format: u32,
    pub is_hdr_vivid: bool,
    pub colorimetry: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TvPqScaleMode {
    ScaleToWindow,
    ScaleCrop,
    ScaleFit,
    NoScaling,
}

impl From<ScalingMode> for TvPqScaleMode {
    fn from(mode: ScalingMode) -> Self {
        match mode {
            ScalingMode::ScaleToWindow => TvPqScaleMode::ScaleToWindow,
            ScalingMode::ScaleCrop => TvPqScaleMode::ScaleCrop,
            ScalingMode::ScaleFit => TvPqScaleMode::ScaleFit,
            ScalingMode::NoScaling => TvPqScaleMode::NoScaling,
        }
    }
}

impl Default for TvPqMetadata {
    fn default() -> Self {
        Self {
            scene_tag: 0,
            frame_count: 0,
            dropped_frame_count: 0,
            video_window: Rect::default(),
            scale_mode: TvPqScaleMode::ScaleToWindow,
            pixel_format: 0,
            is_hdr_vivid: false,
            colorimetry: 0,
        }
    }
}

fn read(map: &MetadataMap) -> TvPqMetadata {
    map.get(MetadataKey::TvPqMetadata as u32)
        .and_then(|bytes| serde_json::from_slice(bytes).ok())
        .unwrap_or_default()
}

fn write(map: &mut MetadataMap, value: &TvPqMetadata) -> Result<(), SurfaceError> {
    let bytes = serde_json::to_vec(value).map_err(|_| SurfaceError::InvalidArguments)?;
    map.set(MetadataKey::TvPqMetadata as u32, bytes, true)?;
    Ok(())
}

pub fn get(map: &MetadataMap) -> TvPqMetadata {
    read(map)
}

/// Apply `f` to the current struct (read-modify-write) and persist the
/// result, so individual fields can be updated without the caller owning a
/// read-then-write race against other setters.
pub fn update(map: &mut MetadataMap, f: impl FnOnce(&mut TvPqMetadata)) -> Result<(), SurfaceError> {
    let mut current = read(map);
    f(&mut current);
    write(map, &current)
}

pub fn set_scene_tag(map: &mut MetadataMap, tag: u32) -> Result<(), SurfaceError> {
    update(map, |m| m.scene_tag = tag)
}

pub fn increment_frame_count(map: &mut MetadataMap) -> Result<(), SurfaceError> {
    update(map, |m| m.frame_count += 1)
}

pub fn increment_dropped_frame_count(map: &mut MetadataMap) -> Result<(), SurfaceError> {
    update(map, |m| m.dropped_frame_count += 1)
}

pub fn set_video_window(map: &mut MetadataMap, rect: Rect) -> Result<(), SurfaceError> {
    update(map, |m| m.video_window = rect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_updates_preserve_other_fields() {
        let mut map = MetadataMap::new();
        set_scene_tag(&mut map, 7).unwrap();
        set_video_window(
            &mut map,
            Rect {
                x: 0,
                y: 0,
                w: 1920,
                h: 1080,
            },
        )
        .unwrap();
        increment_frame_count(&mut map).unwrap();
        increment_frame_count(&mut map).unwrap();

        let meta = get(&map);
        assert_eq!(meta.scene_tag, 7);
        assert_eq!(meta.frame_count, 2);
        assert_eq!(meta.video_window.w, 1920);
    }

    #[test]
    fn dropped_frame_count_is_independent_of_frame_count() {
        let mut map = MetadataMap::new();
        increment_frame_count(&mut map).unwrap();
        increment_dropped_frame_count(&mut map).unwrap();
        increment_dropped_frame_count(&mut map).unwrap();

        let meta = get(&map);
        assert_eq!(meta.frame_count, 1);
        assert_eq!(meta.dropped_frame_count, 2);
    }
}

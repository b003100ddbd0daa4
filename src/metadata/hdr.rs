//! HDR static (SMPTE 2086 + CTA 861) and dynamic metadata wrappers
//! (spec §4.9).

use super::{MetadataKey, MetadataMap};
use crate::error::SurfaceError;

/// SMPTE 2086 mastering display color volume plus CTA 861.3 light levels.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HdrStaticMetadata {
    pub display_primaries_x: [f32; 3],
    pub display_primaries_y: [f32; 3],
    pub white_point_x: f32,
    pub white_point_y: f32,
    pub max_luminance: f32,
    pub min_luminance: f32,
    pub max_content_light_level: f32,
    pub max_frame_average_light_level: f32,
}

pub fn set_hdr_static_metadata(
    map: &mut MetadataMap,
    meta: &HdrStaticMetadata,
) -> Result<(), SurfaceError> {
    let bytes = serde_json::to_vec(meta).map_err(|_| SurfaceError::InvalidArguments)?;
    map.set(MetadataKey::HdrStaticMetadata as u32, bytes, true)?;
    Ok(())
}

pub fn get_hdr_static_metadata(map: &MetadataMap) -> Result<HdrStaticMetadata, SurfaceError> {
    let bytes = map
        .get(MetadataKey::HdrStaticMetadata as u32)
        .ok_or(SurfaceError::NoEntry)?;
    serde_json::from_slice(bytes).map_err(|_| SurfaceError::InvalidArguments)
}

/// HDR dynamic metadata is an opaque byte string (spec §4.9); the helper
/// is a thin pass-through that still enforces the reserved-key discipline.
pub fn set_hdr_dynamic_metadata(map: &mut MetadataMap, payload: Vec<u8>) -> Result<(), SurfaceError> {
    map.set(MetadataKey::HdrDynamicMetadata as u32, payload, true)?;
    Ok(())
}

pub fn get_hdr_dynamic_metadata(map: &MetadataMap) -> Result<&[u8], SurfaceError> {
    map.get(MetadataKey::HdrDynamicMetadata as u32)
        .ok_or(SurfaceError::NoEntry)
}

/// Adaptive field-of-view payload; also opaque, kept distinct from HDR
/// dynamic metadata because they're independently negotiated capabilities.
pub fn set_adaptive_fov(map: &mut MetadataMap, payload: Vec<u8>) -> Result<(), SurfaceError> {
    map.set(MetadataKey::AdaptiveFov as u32, payload, true)?;
    Ok(())
}

pub fn get_adaptive_fov(map: &MetadataMap) -> Result<&[u8], SurfaceError> {
    map.get(MetadataKey::AdaptiveFov as u32)
        .ok_or(SurfaceError::NoEntry)
}

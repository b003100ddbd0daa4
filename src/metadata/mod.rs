//! Buffer metadata: the raw uint32-keyed byte map plus the typed helpers
//! (spec §4.9 `MetadataHelper`) layered over it.

pub mod color_space;
pub mod extra_data;
pub mod hdr;
pub mod tv_pq;

pub use extra_data::{BufferExtraData, ExtraValue};

use std::collections::BTreeMap;

/// Reserved metadata-key range (spec §4.2: "keys must fall within the
/// reserved metadata-key range"). Keys outside this range are rejected before
/// ever reaching the allocator/native call.
pub const METADATA_KEY_MIN: u32 = 1;
pub const METADATA_KEY_MAX: u32 = 0xFFFF;

/// Well-known metadata keys used by [`MetadataHelper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MetadataKey {
    ColorSpaceInfo = 1,
    HdrStaticMetadata = 2,
    HdrDynamicMetadata = 3,
    CropRect = 4,
    AdaptiveFov = 5,
    TvPqMetadata = 6,
}

/// The raw `uint32 -> bytes` metadata map owned by a [`crate::buffer::SurfaceBuffer`]
/// slot. `SetMetadata`'s cache check (spec §4.2) lives here: identical values
/// skip the (simulated) native call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMap {
    entries: BTreeMap<u32, Vec<u8>>,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `SetMetadata(key, bytes, enableCache)`. Returns `Ok(true)` if the
    /// native call was (simulated to be) invoked, `Ok(false)` if the cached
    /// value was identical and the call was skipped.
    pub fn set(
        &mut self,
        key: u32,
        bytes: Vec<u8>,
        enable_cache: bool,
    ) -> Result<bool, crate::error::SurfaceError> {
        if !(METADATA_KEY_MIN..=METADATA_KEY_MAX).contains(&key) {
            return Err(crate::error::SurfaceError::OutOfRange);
        }
        if enable_cache {
            if let Some(existing) = self.entries.get(&key) {
                if *existing == bytes {
                    return Ok(false);
                }
            }
        }
        self.entries.insert(key, bytes);
        Ok(true)
    }

    pub fn get(&self, key: u32) -> Option<&[u8]> {
        self.entries.get(&key).map(|v| v.as_slice())
    }

    pub fn remove(&mut self, key: u32) -> Option<Vec<u8>> {
        self.entries.remove(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Vec<u8>)> {
        self.entries.iter()
    }
}

/// Typed crop-rect wrapper over `MetadataKey::CropRect`. `SurfaceBuffer::crop`
/// is the field clients normally read/write; this mirrors that same crop into
/// the metadata map for a consumer that only has a parceled `MetadataMap` and
/// no direct `SurfaceBuffer` (e.g. a listener callback).
pub fn set_crop_rect(map: &mut MetadataMap, rect: crate::transform::Rect) -> Result<(), crate::error::SurfaceError> {
    let bytes = encode_rect(rect);
    map.set(MetadataKey::CropRect as u32, bytes, true)?;
    Ok(())
}

pub fn get_crop_rect(map: &MetadataMap) -> Result<crate::transform::Rect, crate::error::SurfaceError> {
    let bytes = map
        .get(MetadataKey::CropRect as u32)
        .ok_or(crate::error::SurfaceError::NoEntry)?;
    decode_rect(bytes)
}

fn encode_rect(rect: crate::transform::Rect) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16);
    bytes.extend_from_slice(&rect.x.to_le_bytes());
    bytes.extend_from_slice(&rect.y.to_le_bytes());
    bytes.extend_from_slice(&rect.w.to_le_bytes());
    bytes.extend_from_slice(&rect.h.to_le_bytes());
    bytes
}

fn decode_rect(bytes: &[u8]) -> Result<crate::transform::Rect, crate::error::SurfaceError> {
    if bytes.len() != 16 {
        return Err(crate::error::SurfaceError::InvalidArguments);
    }
    let read = |range: std::ops::Range<usize>| i32::from_le_bytes(bytes[range].try_into().unwrap());
    Ok(crate::transform::Rect {
        x: read(0..4),
        y: read(4..8),
        w: read(8..12),
        h: read(12..16),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SurfaceError;

    #[test]
    fn rejects_keys_outside_reserved_range() {
        let mut map = MetadataMap::new();
        assert_eq!(
            map.set(0, vec![1], true),
            Err(SurfaceError::OutOfRange)
        );
    }

    #[test]
    fn cache_skips_identical_write() {
        let mut map = MetadataMap::new();
        assert_eq!(map.set(10, vec![1, 2, 3], true), Ok(true));
        assert_eq!(map.set(10, vec![1, 2, 3], true), Ok(false));
        assert_eq!(map.set(10, vec![1, 2, 4], true), Ok(true));
    }

    #[test]
    fn cache_disabled_always_writes() {
        let mut map = MetadataMap::new();
        assert_eq!(map.set(10, vec![1], false), Ok(true));
        assert_eq!(map.set(10, vec![1], false), Ok(true));
    }

    #[test]
    fn crop_rect_round_trips_through_the_metadata_map() {
        let mut map = MetadataMap::new();
        let rect = crate::transform::Rect { x: 1, y: 2, w: 3, h: 4 };
        set_crop_rect(&mut map, rect).unwrap();
        assert_eq!(get_crop_rect(&map).unwrap(), rect);
    }

    #[test]
    fn crop_rect_missing_reports_no_entry() {
        let map = MetadataMap::new();
        assert_eq!(get_crop_rect(&map).unwrap_err(), SurfaceError::NoEntry);
    }
}

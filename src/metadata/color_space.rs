//! Color-space info packed/unpacked as a single 32-bit value (spec §4.9, and
//! the §8 round-trip law `ConvertColorSpaceTypeToInfo ∘ ConvertColorSpaceInfoToType = identity`).

use super::{MetadataKey, MetadataMap};
use crate::error::SurfaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primaries {
    Bt601,
    Bt709,
    Bt2020,
    P3,
    AdobeRgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFunction {
    Bt709,
    Linear,
    Srgb,
    Pq,
    Hlg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixCoefficients {
    Bt601,
    Bt709,
    Bt2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Full,
    Limited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpaceInfo {
    pub primaries: Primaries,
    pub transfer: TransferFunction,
    pub matrix: MatrixCoefficients,
    pub range: Range,
}

/// Packs each field into its own byte of a `u32`, matching the "packed as a
/// 32-bit value" shape from spec §4.9. Field byte order: primaries, transfer,
/// matrix, range (low to high).
pub fn color_space_info_to_type(info: ColorSpaceInfo) -> u32 {
    let primaries = info.primaries as u32;
    let transfer = info.transfer as u32;
    let matrix = info.matrix as u32;
    let range = info.range as u32;
    primaries | (transfer << 8) | (matrix << 16) | (range << 24)
}

pub fn color_space_type_to_info(packed: u32) -> Result<ColorSpaceInfo, SurfaceError> {
    let primaries = match packed & 0xFF {
        0 => Primaries::Bt601,
        1 => Primaries::Bt709,
        2 => Primaries::Bt2020,
        3 => Primaries::P3,
        4 => Primaries::AdobeRgb,
        _ => return Err(SurfaceError::InvalidArguments),
    };
    let transfer = match (packed >> 8) & 0xFF {
        0 => TransferFunction::Bt709,
        1 => TransferFunction::Linear,
        2 => TransferFunction::Srgb,
        3 => TransferFunction::Pq,
        4 => TransferFunction::Hlg,
        _ => return Err(SurfaceError::InvalidArguments),
    };
    let matrix = match (packed >> 16) & 0xFF {
        0 => MatrixCoefficients::Bt601,
        1 => MatrixCoefficients::Bt709,
        2 => MatrixCoefficients::Bt2020,
        _ => return Err(SurfaceError::InvalidArguments),
    };
    let range = match (packed >> 24) & 0xFF {
        0 => Range::Full,
        1 => Range::Limited,
        _ => return Err(SurfaceError::InvalidArguments),
    };
    Ok(ColorSpaceInfo {
        primaries,
        transfer,
        matrix,
        range,
    })
}

/// Typed setter/getter pair over [`MetadataMap`], the `MetadataHelper` shape
/// from spec §4.9.
pub fn set_color_space_info(map: &mut MetadataMap, info: ColorSpaceInfo) -> Result<(), SurfaceError> {
    let packed = color_space_info_to_type(info);
    map.set(
        MetadataKey::ColorSpaceInfo as u32,
        packed.to_le_bytes().to_vec(),
        true,
    )?;
    Ok(())
}

pub fn get_color_space_info(map: &MetadataMap) -> Result<ColorSpaceInfo, SurfaceError> {
    let bytes = map
        .get(MetadataKey::ColorSpaceInfo as u32)
        .ok_or(SurfaceError::NoEntry)?;
    let arr: [u8; 4] = bytes.try_into().map_err(|_| SurfaceError::InvalidArguments)?;
    color_space_type_to_info(u32::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let info = ColorSpaceInfo {
            primaries: Primaries::Bt2020,
            transfer: TransferFunction::Pq,
            matrix: MatrixCoefficients::Bt2020,
            range: Range::Limited,
        };
        let packed = color_space_info_to_type(info);
        let back = color_space_type_to_info(packed).unwrap();
        assert_eq!(info, back);
    }

    #[test]
    fn metadata_round_trip() {
        let mut map = MetadataMap::new();
        let info = ColorSpaceInfo {
            primaries: Primaries::Bt709,
            transfer: TransferFunction::Srgb,
            matrix: MatrixCoefficients::Bt709,
            range: Range::Full,
        };
        set_color_space_info(&mut map, info).unwrap();
        assert_eq!(get_color_space_info(&map).unwrap(), info);
    }
}

//! `ReadFromMessageParcel` / `WriteToMessageParcel` (spec §4.2): serialize a
//! `SurfaceBuffer` as a validity flag, handle (with fd-passing), metadata
//! snapshot, extra data, and request config.

use crate::buffer::allocator::{BufferHandle, RequestConfig};
use crate::error::SurfaceError;
use crate::metadata::{BufferExtraData, MetadataMap};
use crate::sequence::SequenceNumber;
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;

/// `#[repr(C)]` so its field order is a stable ABI contract a C-side parser
/// of the same wire bytes can rely on (spec §4.2 message-parcel handle
/// header).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[repr(C)]
pub struct WireHandle {
    pub fd: RawFd,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub usage: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMetadata {
    pub entries: Vec<(u32, Vec<u8>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSurfaceBuffer {
    pub valid: bool,
    pub sequence: Option<SequenceNumber>,
    pub handle: Option<WireHandle>,
    pub metadata: WireMetadata,
    pub extra_data: BufferExtraData,
    pub config: RequestConfig,
}

/// Strategy for how a receiver turns a wire-level fd into a local one. The
/// default just trusts the fd as-is (appropriate for in-process transports);
/// a real cross-process transport supplies one that dup()s from the
/// descriptor-passing channel, matching spec §4.2's "optional safe-fd reader
/// strategy to let callers control fd duplication semantics".
pub trait SafeFdReader {
    fn resolve(&self, wire_fd: RawFd) -> Result<RawFd, SurfaceError>;
}

pub struct TrustingFdReader;
impl SafeFdReader for TrustingFdReader {
    fn resolve(&self, wire_fd: RawFd) -> Result<RawFd, SurfaceError> {
        Ok(wire_fd)
    }
}

pub fn write_to_parcel(
    sequence: Option<SequenceNumber>,
    handle: Option<&BufferHandle>,
    metadata: &MetadataMap,
    extra_data: &BufferExtraData,
    config: &RequestConfig,
) -> WireSurfaceBuffer {
    WireSurfaceBuffer {
        valid: handle.is_some(),
        sequence,
        handle: handle.map(|h| WireHandle {
            fd: h.fd,
            width: h.width,
            height: h.height,
            stride: h.stride,
            format: h.format,
            usage: h.usage,
            size_bytes: h.size_bytes,
        }),
        metadata: WireMetadata {
            entries: metadata.iter().map(|(k, v)| (*k, v.clone())).collect(),
        },
        extra_data: extra_data.clone(),
        config: *config,
    }
}

pub fn read_from_parcel(
    wire: &WireSurfaceBuffer,
    fd_reader: &dyn SafeFdReader,
) -> Result<Option<(SequenceNumber, BufferHandle, MetadataMap, BufferExtraData, RequestConfig)>, SurfaceError> {
    if !wire.valid {
        return Ok(None);
    }
    let wh = wire.handle.as_ref().ok_or(SurfaceError::InvalidArguments)?;
    let sequence = wire.sequence.ok_or(SurfaceError::InvalidArguments)?;
    let fd = fd_reader.resolve(wh.fd)?;
    let handle = BufferHandle {
        fd,
        width: wh.width,
        height: wh.height,
        stride: wh.stride,
        format: wh.format,
        usage: wh.usage,
        size_bytes: wh.size_bytes,
        virtual_addr: None,
    };
    let mut metadata = MetadataMap::new();
    for (k, v) in &wire.metadata.entries {
        metadata.set(*k, v.clone(), false)?;
    }
    Ok(Some((sequence, handle, metadata, wire.extra_data.clone(), wire.config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::MockAllocator;
    use crate::buffer::allocator::BufferAllocator;

    #[test]
    fn round_trips_through_json() {
        let alloc = MockAllocator::new();
        let config = RequestConfig {
            width: 256,
            height: 128,
            ..Default::default()
        };
        let handle = alloc.alloc(&config).unwrap();
        let mut metadata = MetadataMap::new();
        metadata.set(10, vec![1, 2, 3], false).unwrap();
        let extra = BufferExtraData::new();
        let sequence = crate::sequence::next_sequence();

        let wire = write_to_parcel(Some(sequence), Some(&handle), &metadata, &extra, &config);
        let json = serde_json::to_string(&wire).unwrap();
        let back: WireSurfaceBuffer = serde_json::from_str(&json).unwrap();
        let (seq2, h2, m2, _, c2) = read_from_parcel(&back, &TrustingFdReader).unwrap().unwrap();
        assert_eq!(seq2, sequence);
        assert_eq!(h2.width, handle.width);
        assert_eq!(m2.get(10), Some(&[1, 2, 3][..]));
        assert_eq!(c2.width, config.width);
    }

    #[test]
    fn invalid_buffer_round_trips_to_none() {
        let config = RequestConfig::default();
        let metadata = MetadataMap::new();
        let extra = BufferExtraData::new();
        let wire = write_to_parcel(None, None, &metadata, &extra, &config);
        assert!(read_from_parcel(&wire, &TrustingFdReader).unwrap().is_none());
    }

    /// Locks down `WireHandle`'s field order: a C-side parser reading the
    /// same bytes depends on `fd` staying the leading field.
    #[test]
    fn wire_handle_fd_leads_the_layout() {
        assert_eq!(memoffset::offset_of!(WireHandle, fd), 0);
        assert!(memoffset::offset_of!(WireHandle, width) > memoffset::offset_of!(WireHandle, fd));
    }
}

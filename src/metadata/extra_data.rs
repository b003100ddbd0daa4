//! `BufferExtraData` (spec §4.2): an ordered key→scalar map carried alongside
//! a buffer for out-of-band data, distinct from the uint32-keyed metadata map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtraValue {
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
}

/// Ordered (`BTreeMap`, so iteration/serialization order is stable) string-keyed
/// scalar map. Order matters for serialization parity across processes: both
/// sides must agree on layout/order without a handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferExtraData {
    values: BTreeMap<String, ExtraValue>,
}

impl BufferExtraData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: ExtraValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ExtraValue> {
        self.values.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut data = BufferExtraData::new();
        data.set("frame_number", ExtraValue::I64(42));
        data.set("tag", ExtraValue::Str("hdr".into()));

        let json = serde_json::to_string(&data).unwrap();
        let back: BufferExtraData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
    }
}

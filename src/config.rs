//! Engine-wide configuration, loaded from the environment the way
//! `chikof-momoi/daemon/src/config.rs` loads the daemon's settings: a plain
//! struct with typed defaults and a `from_env` constructor, backed by
//! `serde` for the on-disk/IPC representation.

use crate::buffer::allocator::{STRIDE_ALIGNMENT_MAX, STRIDE_ALIGNMENT_MIN};
use serde::{Deserialize, Serialize};

pub const SURFACE_MAX_QUEUE_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default queue size used when a `BufferQueue` isn't given one explicitly.
    pub default_queue_size: u32,
    /// Ceiling enforced by `SetQueueSize` (spec §4.3, §8 boundary behaviours).
    pub max_queue_size: u32,
    pub default_timeout_ms: i64,
    pub stride_alignment_min: u32,
    pub stride_alignment_max: u32,
    /// Mirrors the persistent parameter in spec §6 "Dump-to-file trigger".
    pub dump_to_file_enabled: bool,
    pub dump_sentinel_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_queue_size: 3,
            max_queue_size: SURFACE_MAX_QUEUE_SIZE,
            default_timeout_ms: 3000,
            stride_alignment_min: STRIDE_ALIGNMENT_MIN,
            stride_alignment_max: STRIDE_ALIGNMENT_MAX,
            dump_to_file_enabled: false,
            dump_sentinel_path: "/data/bq_dump".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read overrides from `SURFACEQUEUE_*` environment variables, falling
    /// back to [`EngineConfig::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SURFACEQUEUE_DEFAULT_QUEUE_SIZE") {
            if let Ok(v) = v.parse() {
                config.default_queue_size = v;
            }
        }
        if let Ok(v) = std::env::var("SURFACEQUEUE_MAX_QUEUE_SIZE") {
            if let Ok(v) = v.parse() {
                config.max_queue_size = v;
            }
        }
        if let Ok(v) = std::env::var("SURFACEQUEUE_DEFAULT_TIMEOUT_MS") {
            if let Ok(v) = v.parse() {
                config.default_timeout_ms = v;
            }
        }
        if let Ok(v) = std::env::var("SURFACEQUEUE_DUMP_TO_FILE") {
            config.dump_to_file_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("SURFACEQUEUE_DUMP_SENTINEL_PATH") {
            config.dump_sentinel_path = v;
        }

        config
    }
}

/// Initialise the `log`/`env_logger` facade once per process, the way
/// `chikof-momoi/daemon/src/main.rs` calls `env_logger::init()` at startup.
/// Safe to call more than once; only the first call takes effect.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_spec_bounds() {
        let config = EngineConfig::default();
        assert!(config.max_queue_size <= SURFACE_MAX_QUEUE_SIZE);
        assert!(config.default_queue_size >= 1);
    }

    #[test]
    fn from_env_overrides_defaults() {
        std::env::set_var("SURFACEQUEUE_DEFAULT_QUEUE_SIZE", "5");
        let config = EngineConfig::from_env();
        assert_eq!(config.default_queue_size, 5);
        std::env::remove_var("SURFACEQUEUE_DEFAULT_QUEUE_SIZE");
    }
}

//! Native dump support (spec §6 "Dump-to-file trigger"): when enabled and a
//! sentinel file is present, a flush writes the queue's textual dump
//! (`BufferQueue::dump`) out to a file named after the queue and the
//! buffer's dimensions, the way the original engine drops a raw dump on
//! that file's presence rather than requiring a rebuild.

use crate::config::EngineConfig;
use crate::queue::BufferQueue;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes `bq_<pid>_<name>_<nowUsec>_<w>x<h>.raw` under `dir` if dumping is
/// enabled and the sentinel file exists; a no-op otherwise.
pub fn maybe_dump_to_file(
    queue: &BufferQueue,
    config: &EngineConfig,
    dir: &Path,
    width: u32,
    height: u32,
) -> std::io::Result<Option<PathBuf>> {
    if !config.dump_to_file_enabled || !Path::new(&config.dump_sentinel_path).exists() {
        return Ok(None);
    }

    let now_usec = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let path = dir.join(format!(
        "bq_{}_{}_{}_{}x{}.raw",
        std::process::id(),
        queue.name(),
        now_usec,
        width,
        height
    ));
    let mut file = std::fs::File::create(&path)?;
    file.write_all(queue.dump().as_bytes())?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::allocator::MockAllocator;
    use std::sync::Arc;

    #[test]
    fn skips_dump_when_disabled() {
        let queue = BufferQueue::new("dump-test-disabled", Arc::new(MockAllocator::new()), EngineConfig::default());
        let config = EngineConfig {
            dump_to_file_enabled: false,
            ..EngineConfig::default()
        };
        let result = maybe_dump_to_file(&queue, &config, &std::env::temp_dir(), 64, 64).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn writes_dump_when_sentinel_present() {
        let dir = std::env::temp_dir().join(format!("surfacequeue-dump-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sentinel = dir.join("bq_dump_sentinel");
        std::fs::write(&sentinel, b"").unwrap();

        let queue = BufferQueue::new("dump-test-enabled", Arc::new(MockAllocator::new()), EngineConfig::default());
        let config = EngineConfig {
            dump_to_file_enabled: true,
            dump_sentinel_path: sentinel.to_string_lossy().into_owned(),
            ..EngineConfig::default()
        };

        let path = maybe_dump_to_file(&queue, &config, &dir, 64, 64).unwrap().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("dump-test-enabled"));

        std::fs::remove_dir_all(&dir).ok();
    }
}

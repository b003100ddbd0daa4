//! Producer-side walkthrough: requests, writes, and flushes a run of buffers
//! through a [`ProducerSurface`], reporting throughput the way a real
//! frame-producing client would track it.
//!
//! There is no real cross-process transport in this crate (the kernel/binder
//! side of that is an external collaborator this crate only models), so a
//! background thread plays the consumer here purely to keep buffers flowing
//! back to the free list; `demos/consumer.rs` shows the consumer side of the
//! same API from the other direction.

use std::env;
use std::sync::Arc;
use std::time::Instant;

use surfacequeue::buffer::allocator::{usage, MockAllocator};
use surfacequeue::config::EngineConfig;
use surfacequeue::consumer::ConsumerSurface;
use surfacequeue::producer::ipc::{BufferClientProducer, LoopbackTransport};
use surfacequeue::producer::{ProducerSurface, WindowConfig};
use surfacequeue::queue::listeners::ConsumerListener;

struct NullConsumerListener;
impl ConsumerListener for NullConsumerListener {}

fn main() {
    surfacequeue::init_logging();

    let args: Vec<String> = env::args().collect();
    let frame_count: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(200);
    let width: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1920);
    let height: u32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1080);

    println!("producer: requesting {frame_count} {width}x{height} frames");

    let consumer = ConsumerSurface::new("demo-producer-queue", Arc::new(MockAllocator::new()), EngineConfig::default());
    consumer.register_consumer_listener(Arc::new(NullConsumerListener));

    let client = Arc::new(BufferClientProducer::new(Arc::new(LoopbackTransport::new(consumer.producer()))));
    let surface = Arc::new(ProducerSurface::new(client));
    surface.connect().expect("connect");
    surface.set_window_config(WindowConfig {
        width,
        height,
        format: 1,
        usage: usage::CPU_WRITE,
        ..WindowConfig::default()
    });

    // Drain acquired frames on a background thread so the free list never
    // starves the producer once the queue fills up.
    let drained = std::thread::spawn(move || {
        let mut drained = 0usize;
        while drained < frame_count {
            match consumer.acquire_buffer() {
                Ok((seq, fence, ..)) => {
                    consumer.release_buffer(seq, fence).expect("release");
                    drained += 1;
                }
                Err(_) => std::thread::yield_now(),
            }
        }
        drained
    });

    let start = Instant::now();
    for frame in 0..frame_count {
        let (sequence, release_fence, _connected) = surface.request_buffer().expect("request_buffer");
        release_fence.wait(-1);
        surface
            .with_buffer(sequence, |buf| {
                buf.set_metadata(1, frame.to_le_bytes().to_vec(), false).ok();
            })
            .expect("with_buffer");
        surface
            .flush_buffer(sequence, &surfacequeue::SyncFence::invalid(), vec![], frame as i64, None)
            .expect("flush_buffer");
    }
    let elapsed = start.elapsed();

    let drained = drained.join().expect("drain thread");
    println!(
        "producer: flushed {frame_count} frames, consumer drained {drained}, {:.2} frames/sec",
        frame_count as f64 / elapsed.as_secs_f64()
    );
}
